//! Session and persisted message types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::{Message, Role, ToolCallRequest};

/// One entry of a session history, as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMessage {
    pub role: Role,
    pub content: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,

    /// Call this tool result answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Tool name, for tool results
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub timestamp: DateTime<Utc>,
}

impl SessionMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
            timestamp: Utc::now(),
        }
    }

    /// Provider-facing form of this entry.
    pub fn to_message(&self) -> Message {
        Message {
            role: self.role,
            content: self.content.clone(),
            tool_call_id: self.tool_call_id.clone(),
            name: self.name.clone(),
            tool_calls: if self.tool_calls.is_empty() {
                None
            } else {
                Some(self.tool_calls.clone())
            },
        }
    }
}

impl From<&Message> for SessionMessage {
    fn from(msg: &Message) -> Self {
        Self {
            role: msg.role,
            content: msg.content.clone(),
            tool_calls: msg.tool_calls().to_vec(),
            tool_call_id: msg.tool_call_id.clone(),
            name: msg.name.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// A conversation, keyed by `"<channel>:<sender>"`.
///
/// The message list is append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub key: String,
    pub messages: Vec<SessionMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(key: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn add_message(&mut self, msg: SessionMessage) {
        self.messages.push(msg);
        self.updated_at = Utc::now();
    }


    /// Full history in provider form, oldest first.
    pub fn history(&self) -> Vec<Message> {
        self.messages.iter().map(SessionMessage::to_message).collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
