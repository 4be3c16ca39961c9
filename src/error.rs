//! Top-level error types for Relaybot.

use std::time::Duration;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Gate(#[from] GateError),

    #[error(transparent)]
    Messaging(#[from] MessagingError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required config key: {0}")]
    MissingKey(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Completion endpoint errors, classified by recovery strategy.
///
/// The first four variants are handled transparently by the retry layer:
/// `RateLimited` and `ServerError` back off and retry, `InvalidCredential`
/// counts toward credential rotation, `ContextTooLarge` tightens the token
/// budget and retries with a shorter history. `Cancelled`,
/// `RetryBudgetExhausted`, and `Fatal` propagate to the caller.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("rate limited: {message}")]
    RateLimited {
        /// Server-suggested delay, when the error payload carries one.
        retry_after: Option<Duration>,
        message: String,
    },

    #[error("server error ({status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    #[error("request exceeds context window: {0}")]
    ContextTooLarge(String),

    #[error("completion cancelled")]
    Cancelled,

    #[error("retry budget exhausted after {elapsed:?} of continuous failures")]
    RetryBudgetExhausted { elapsed: Duration },

    #[error("no credentials configured")]
    NoCredentials,

    #[error("completion failed: {0}")]
    Fatal(String),
}

/// Conversation gate errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GateError {
    #[error("conversation {conversation_id} already has a turn in flight")]
    Busy { conversation_id: String },
}

/// Outbound delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    #[error("failed to deliver message to {conversation_id}: {message}")]
    DeliveryFailed {
        conversation_id: String,
        message: String,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
