//! Conversation state: message history and per-conversation turn gating.

pub mod gate;
pub mod history;

pub use gate::ConversationGate;
pub use history::MessageHistory;
