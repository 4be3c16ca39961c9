//! LLM completion layer: endpoint client, credential rotation, retry policy.

pub mod budget;
pub mod classify;
pub mod client;
pub mod credentials;
pub mod retry;

pub use budget::TokenBudget;
pub use client::{ChatMessage, CompletionClient, CompletionRequest, HttpCompletionClient, Role};
pub use credentials::CredentialPool;
pub use retry::RetryingClient;
