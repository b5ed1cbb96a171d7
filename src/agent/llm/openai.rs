//! OpenAI-compatible LLM client (OpenRouter, OpenAI, Ollama, ...).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::Error;
use crate::tools::ToolDefinition;
use crate::Result;

use super::super::message::{Message, Role, ToolCallRequest};
use super::types::{CompletionResponse, ErrorBody};
use super::{ChatRequest, ChatResponse, Choice, LlmClient, Usage};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Chat-completions client authenticated with a bearer key.
#[derive(Clone)]
pub struct OpenAiClient {
    name: String,
    api_key: String,
    api_base: String,
    client: Client,
}

impl OpenAiClient {
    pub fn new(name: &str, api_key: &str, api_base: &str) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            name: name.to_string(),
            api_key: api_key.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn build_url(&self) -> String {
        format!("{}/chat/completions", self.api_base)
    }

    fn convert_messages(&self, messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .map(|m| match m.role {
                Role::Tool => json!({
                    "role": "tool",
                    "tool_call_id": m.tool_call_id.as_deref().unwrap_or_default(),
                    "content": m.content,
                }),
                Role::Assistant if !m.tool_calls().is_empty() => {
                    let calls: Vec<Value> = m
                        .tool_calls()
                        .iter()
                        .map(|tc| {
                            json!({
                                "id": tc.id,
                                "type": "function",
                                "function": {
                                    "name": tc.name,
                                    "arguments": tc.arguments,
                                }
                            })
                        })
                        .collect();

                    json!({
                        "role": "assistant",
                        "content": m.content,
                        "tool_calls": calls,
                    })
                }
                role => json!({
                    "role": role.as_str(),
                    "content": m.content,
                }),
            })
            .collect()
    }

    fn convert_tools(&self, tools: &[ToolDefinition]) -> Vec<Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect()
    }

    fn build_body(&self, request: &ChatRequest) -> Value {
        let mut body = json!({
            "model": request.model,
            "messages": self.convert_messages(&request.messages),
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });

        if !request.tools.is_empty() {
            body["tools"] = Value::Array(self.convert_tools(&request.tools));
        }

        body
    }

    fn parse_response(&self, response: CompletionResponse) -> ChatResponse {
        let choices = response
            .choices
            .into_iter()
            .map(|choice| {
                let tool_calls = choice
                    .message
                    .tool_calls
                    .unwrap_or_default()
                    .iter()
                    .enumerate()
                    .map(|(i, tc)| {
                        let id = if tc.id.is_empty() { format!("tc_{i}") } else { tc.id.clone() };
                        ToolCallRequest::new(id, &tc.function.name, tc.function.arguments_text())
                    })
                    .collect();

                Choice {
                    message: Message::assistant_with_tools(
                        choice.message.content.unwrap_or_default(),
                        tool_calls,
                    ),
                    finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
                }
            })
            .collect();

        let usage = response
            .usage
            .map(|u| Usage {
                prompt_tokens: u.prompt_tokens.unwrap_or(0),
                completion_tokens: u.completion_tokens.unwrap_or(0),
                total_tokens: u.total_tokens.unwrap_or(0),
            })
            .unwrap_or_default();

        ChatResponse { choices, usage }
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let body = self.build_body(request);
        debug!(model = %request.model, messages = request.messages.len(), "chat request");

        let mut builder = self.client.post(self.build_url()).json(&body);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }
        let response = builder.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await?;
            let detail = serde_json::from_str::<ErrorBody>(&error_text)
                .map(|b| b.error.message)
                .unwrap_or(error_text);
            return Err(Error::Llm(format!("{} API error ({status}): {detail}", self.name)));
        }

        let parsed: CompletionResponse = response.json().await?;
        Ok(self.parse_response(parsed))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
