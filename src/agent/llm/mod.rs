//! LLM client abstraction layer.
//!
//! This module provides:
//! - [`LlmClient`] trait for swappable LLM providers
//! - [`ChatRequest`] / [`ChatResponse`], the envelope every provider speaks
//! - [`ProviderRegistry`] for creating a client from configuration
//! - [`OpenAiClient`], an OpenAI-compatible chat-completions client
//!
//! # Adding a New Provider
//!
//! 1. Create a new file (e.g., `anthropic.rs`)
//! 2. Implement `LlmClient` trait
//! 3. Add to `ProviderRegistry::create()`

mod types;
pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::Error;
use crate::tools::ToolDefinition;
use crate::Result;

pub use openai::OpenAiClient;

use super::message::{Message, ToolCallRequest};

/// One call to a provider.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_tokens: usize,
    pub tools: Vec<ToolDefinition>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: 0.7,
            max_tokens: 8192,
            tools: Vec::new(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }
}

/// A single completion choice.
#[derive(Debug, Clone)]
pub struct Choice {
    /// Assistant message, possibly carrying tool calls.
    pub message: Message,

    /// Reason the response finished.
    pub finish_reason: String,
}

/// Response from an LLM provider.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

impl ChatResponse {
    /// Create a simple text response.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            choices: vec![Choice {
                message: Message::assistant(content),
                finish_reason: "stop".to_string(),
            }],
            usage: Usage::default(),
        }
    }

    /// Create a response that requests tool calls.
    pub fn with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            choices: vec![Choice {
                message: Message::assistant_with_tools(content, tool_calls),
                finish_reason: "tool_calls".to_string(),
            }],
            usage: Usage::default(),
        }
    }

    /// First choice, the one the agent acts on.
    #[inline]
    pub fn first(&self) -> Option<&Choice> {
        self.choices.first()
    }
}

/// Token usage information.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// LLM client trait - swappable provider abstraction.
///
/// Implement this trait to add a new LLM provider. Used both by the agent loop
/// and by the history compressor.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a request and get the provider's choices.
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse>;

    /// Provider name, for logs and `/status`.
    fn name(&self) -> &str;
}

/// Provider registry - creates LLM clients dynamically.
///
/// # Example
///
/// ```ignore
/// let client = ProviderRegistry::create(&config)?;
/// let response = client.chat(&ChatRequest::new(&config.model, messages)).await?;
/// ```
pub struct ProviderRegistry;

impl ProviderRegistry {
    /// Create an LLM client from configuration.
    ///
    /// Every supported provider speaks the OpenAI chat-completions dialect;
    /// they differ only in default endpoint.
    pub fn create(config: &Config) -> Result<Box<dyn LlmClient>> {
        let provider = &config.provider;
        if provider.api_key.is_empty() && provider.name != "ollama" {
            return Err(Error::Config(format!(
                "No API key configured for provider {}",
                provider.name
            )));
        }

        match provider.name.as_str() {
            "openrouter" | "openai" | "ollama" | "custom" => {
                let client = OpenAiClient::new(&provider.name, &provider.api_key, &provider.api_base)?;
                Ok(Box::new(client))
            }
            other => Err(Error::Config(format!(
                "Unknown provider: {other} (available: {})",
                Self::available().join(", ")
            ))),
        }
    }

    /// List available provider names.
    pub fn available() -> &'static [&'static str] {
        &["openrouter", "openai", "ollama", "custom"]
    }
}
