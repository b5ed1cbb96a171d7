//! Messages crossing the bus boundary
//!
//! Channel adapters and schedulers produce [`InboundMessage`]s; the agent
//! produces [`OutboundMessage`]s for adapters to deliver.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Inbound message from a chat platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Unique identifier of the sender
    pub sender_id: String,
    /// Message text content
    pub content: String,
    /// Source channel (e.g. "telegram", "cli"); also the dispatch topic
    pub channel: String,
    pub timestamp: DateTime<Utc>,
    /// Adapter specific context (username, chat id, ...)
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl InboundMessage {
    pub fn new(channel: &str, sender_id: &str, content: &str) -> Self {
        Self {
            sender_id: sender_id.to_string(),
            content: content.to_string(),
            channel: channel.to_string(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Add a metadata entry (builder pattern)
    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Session key: `"<channel>:<sender_id>"`
    pub fn session_key(&self) -> String {
        format!("{}:{}", self.channel, self.sender_id)
    }

    /// Chat to answer in. Adapters put it in `metadata["chat_id"]` as a string
    /// or number; direct chats fall back to the sender.
    pub fn chat_id(&self) -> String {
        match self.metadata.get("chat_id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => self.sender_id.clone(),
        }
    }
}

/// Outbound message for a channel adapter to deliver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub content: String,
    /// Target channel; also the dispatch topic
    pub channel: String,
    /// Channel specific destination (chat id)
    pub channel_id: String,
    /// Sender of the message this answers, if any
    pub sender_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl OutboundMessage {
    pub fn new(channel: &str, channel_id: &str, content: &str) -> Self {
        Self {
            content: content.to_string(),
            channel: channel.to_string(),
            channel_id: channel_id.to_string(),
            sender_id: String::new(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Build the reply to an inbound message, routed back where it came from.
    pub fn reply_to(msg: &InboundMessage, content: &str) -> Self {
        let mut out = Self::new(&msg.channel, &msg.chat_id(), content);
        out.sender_id = msg.sender_id.clone();
        out.metadata = msg.metadata.clone();
        out
    }

    /// Add a metadata entry (builder pattern)
    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}
