//! Inbound and outbound messages exchanged with the chat transport

use crate::context::ConversationKey;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who wrote an inbound message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorIdentity {
    pub first_name: String,
    #[serde(default)]
    pub username: Option<String>,
}

impl AuthorIdentity {
    pub fn new(first_name: impl Into<String>, username: Option<String>) -> Self {
        Self {
            first_name: first_name.into(),
            username,
        }
    }
}

/// A message the transport decided to forward
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundTurn {
    pub conversation_key: ConversationKey,
    pub author: AuthorIdentity,
    pub text: String,
    pub message_id: i64,
    pub received_at: DateTime<Utc>,
}

impl InboundTurn {
    pub fn new(
        conversation_key: impl Into<ConversationKey>,
        author: AuthorIdentity,
        text: impl Into<String>,
        message_id: i64,
    ) -> Self {
        Self {
            conversation_key: conversation_key.into(),
            author,
            text: text.into(),
            message_id,
            received_at: Utc::now(),
        }
    }

    /// User turn content, attributed so the model can tell speakers apart
    pub fn render(&self) -> String {
        match self.author.username.as_deref().filter(|u| !u.is_empty()) {
            Some(username) => format!("{} ({}): {}", self.author.first_name, username, self.text),
            None => format!("{}: {}", self.author.first_name, self.text),
        }
    }
}

/// A reply for the transport to send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundReply {
    pub conversation_key: ConversationKey,
    pub text: String,
    /// Set only while the conversation has a backlog, so the reply stays attributable
    pub in_reply_to_message_id: Option<i64>,
}

/// Delivers replies back to the chat transport
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn deliver(&self, reply: OutboundReply) -> anyhow::Result<()>;
}

/// Shows a "typing..." hint in a conversation
#[async_trait]
pub trait TypingIndicator: Send + Sync {
    async fn typing(&self, key: &ConversationKey);
}

/// Typing indicator for transports without one
pub struct NoTyping;

#[async_trait]
impl TypingIndicator for NoTyping {
    async fn typing(&self, _key: &ConversationKey) {}
}
