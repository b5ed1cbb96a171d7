//! Wire types for OpenAI-compatible chat-completions responses.

use serde::Deserialize;
use serde_json::Value;

/// Top-level chat-completions response.
#[derive(Debug, Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
    pub usage: Option<CompletionUsage>,
}

/// A single response choice.
#[derive(Debug, Deserialize)]
pub struct CompletionChoice {
    pub message: CompletionMessage,
    pub finish_reason: Option<String>,
}

/// Assistant message inside a choice.
#[derive(Debug, Deserialize)]
pub struct CompletionMessage {
    pub content: Option<String>,
    /// Absent or `null` on plain replies, depending on the server.
    #[serde(default)]
    pub tool_calls: Option<Vec<WireToolCall>>,
}

/// Tool call requested by the model.
#[derive(Debug, Deserialize)]
pub struct WireToolCall {
    #[serde(default)]
    pub id: String,
    pub function: WireFunction,
}

#[derive(Debug, Deserialize)]
pub struct WireFunction {
    pub name: String,
    /// Usually a JSON-encoded string; a few servers send the object itself.
    #[serde(default)]
    pub arguments: Value,
}

impl WireFunction {
    /// Arguments as raw JSON text.
    pub fn arguments_text(&self) -> String {
        match &self.arguments {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

/// Token usage counters.
#[derive(Debug, Deserialize)]
pub struct CompletionUsage {
    pub prompt_tokens: Option<usize>,
    pub completion_tokens: Option<usize>,
    pub total_tokens: Option<usize>,
}

/// Error body returned by most compatible servers.
#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
}
