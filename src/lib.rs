//! Relaybot: bridges chat-platform message events to a remote
//! chat-completion endpoint, with retry/rotation around the endpoint and
//! one-in-flight-turn-per-conversation serialization in front of it.

pub mod agent;
pub mod config;
pub mod conversation;
pub mod error;
pub mod llm;
pub mod messaging;

pub use error::{Error, Result};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Conversation identifier type: an opaque key grouping a sequence of turns
/// (a chat channel, a DM, a thread).
pub type ConversationId = Arc<str>;

/// Inbound message event from the chat platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub text: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl InboundMessage {
    pub fn new(
        conversation_id: impl Into<String>,
        sender_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            sender_id: sender_id.into(),
            text: text.into(),
            timestamp: chrono::Utc::now(),
            metadata: HashMap::new(),
        }
    }
}
