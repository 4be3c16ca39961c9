//! Ordered message history with budget-driven trimming.

use crate::llm::client::{ChatMessage, Role};

/// Ordered sequence of {role, text} messages for one conversation.
///
/// Invariant: before every outbound call the estimated token count is
/// brought under the configured ceiling by dropping the oldest non-system
/// messages. System messages are never dropped, and the newest non-system
/// message always survives.
#[derive(Debug, Clone, Default)]
pub struct MessageHistory {
    messages: Vec<ChatMessage>,
}

/// Rough chars-per-token ratio. The endpoint's actual tokenizer is not
/// available locally, so the estimate is a deliberately loose heuristic and
/// the budget it feeds is a tunable policy.
const CHARS_PER_TOKEN: usize = 4;

/// Fixed per-message overhead (role framing, separators).
const PER_MESSAGE_OVERHEAD_TOKENS: usize = 4;

impl MessageHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a history with a system prompt as its first entry.
    pub fn with_system_prompt(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::system(prompt)],
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Roll back to a previous length (used after failed or cancelled turns).
    pub fn truncate(&mut self, len: usize) {
        self.messages.truncate(len);
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Estimated token count for the whole history.
    pub fn estimated_tokens(&self) -> usize {
        self.messages.iter().map(estimate_message_tokens).sum()
    }

    /// Drop oldest non-system messages until the estimate fits the budget or
    /// a single non-system message remains. Returns how many messages were
    /// dropped.
    pub fn trim_to_budget(&mut self, token_budget: usize) -> usize {
        let mut dropped = 0;

        while self.estimated_tokens() > token_budget && self.non_system_count() > 1 {
            let Some(oldest) = self
                .messages
                .iter()
                .position(|message| message.role != Role::System)
            else {
                break;
            };
            self.messages.remove(oldest);
            dropped += 1;
        }

        if dropped > 0 {
            tracing::debug!(
                dropped,
                estimated_tokens = self.estimated_tokens(),
                token_budget,
                "trimmed history to fit token budget"
            );
        }

        dropped
    }

    fn non_system_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|message| message.role != Role::System)
            .count()
    }
}

fn estimate_message_tokens(message: &ChatMessage) -> usize {
    message.text.chars().count() / CHARS_PER_TOKEN + PER_MESSAGE_OVERHEAD_TOKENS
}
