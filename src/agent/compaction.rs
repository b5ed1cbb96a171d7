//! History compression.
//!
//! Turns a conversation that no longer fits the prompt budget into a single
//! block of text: the most recent messages verbatim when they fit, otherwise
//! a model-written summary, otherwise the tail of the transcript.

use std::sync::Arc;

use tracing::{debug, warn};

use super::llm::{ChatRequest, LlmClient};
use super::message::Message;
use super::tokens::{estimate_tokens, tail_within_budget};

/// Above this many messages a summarizing provider is used straight away.
const SUMMARIZE_ALL_THRESHOLD: usize = 50;

/// Completion cap for summaries.
const SUMMARY_MAX_TOKENS: usize = 200;

const SUMMARY_SYSTEM_PROMPT: &str =
    "You are a summarization assistant. Produce a concise summary that preserves important facts and decisions.";

/// Compacts message lists to fit a token budget.
#[derive(Clone, Default)]
pub struct Compressor {
    provider: Option<Arc<dyn LlmClient>>,
}

impl Compressor {
    /// Compressor that only truncates.
    pub fn new() -> Self {
        Self { provider: None }
    }

    /// Compressor that can ask `provider` for summaries.
    pub fn with_provider(provider: Arc<dyn LlmClient>) -> Self {
        Self { provider: Some(provider) }
    }

    /// Compress `messages` to roughly `budget` tokens.
    ///
    /// Never returns an empty string for non-empty input: the newest message
    /// is always kept, even when it alone exceeds the budget.
    pub async fn compress_messages(&self, model: &str, messages: &[Message], budget: usize) -> String {
        if messages.len() > SUMMARIZE_ALL_THRESHOLD {
            let transcript: String = messages
                .iter()
                .map(|m| format!("{}: {}\n\n", m.role, m.content))
                .collect();
            if let Some(summary) = self.summarize(model, &transcript).await {
                return summary;
            }
        }

        let mut kept = Vec::new();
        let mut tokens = 0;
        for m in messages.iter().rev() {
            let est = estimate_tokens(&m.content);
            if tokens + est > budget && !kept.is_empty() {
                break;
            }
            kept.push(format!("{}: {}", m.role, m.content));
            tokens += est;
        }
        kept.reverse();

        let joined = kept.join("\n\n");
        if estimate_tokens(&joined) <= budget {
            debug!(kept = kept.len(), total = messages.len(), "history fits after dropping older messages");
            return joined;
        }

        if let Some(summary) = self.summarize(model, &joined).await {
            return summary;
        }

        debug!(budget, "truncating history transcript");
        tail_within_budget(&joined, budget.max(1)).to_string()
    }

    async fn summarize(&self, model: &str, transcript: &str) -> Option<String> {
        let provider = self.provider.as_ref()?;

        let request = ChatRequest::new(
            model,
            vec![
                Message::system(SUMMARY_SYSTEM_PROMPT),
                Message::user(format!(
                    "Summarize the following conversation in under 200 tokens:\n\n{transcript}"
                )),
            ],
        )
        .with_max_tokens(SUMMARY_MAX_TOKENS);

        match provider.chat(&request).await {
            Ok(response) => match response.first() {
                Some(choice) if !choice.message.content.trim().is_empty() => {
                    Some(choice.message.content.clone())
                }
                _ => {
                    warn!("Summarizer returned no content");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "Summarization failed, falling back to truncation");
                None
            }
        }
    }
}
