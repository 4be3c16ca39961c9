//! Configuration loading and validation.

use crate::error::{ConfigError, Result};
use std::time::Duration;

/// Relaybot configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Completion endpoint configuration.
    pub llm: LlmConfig,

    /// Retry and rotation policy.
    pub retry: RetryConfig,

    /// Context window budget settings.
    pub context: ContextConfig,

    /// Outbound delivery settings.
    pub messaging: MessagingConfig,
}

/// Completion endpoint configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Base URL of the chat-completion endpoint.
    pub base_url: String,

    /// Model name sent with every request.
    pub model: String,

    /// Ordered credential pool (never empty after load).
    pub credentials: Vec<String>,

    /// Sampling temperature.
    pub temperature: f64,

    /// Maximum tokens to generate per reply.
    pub max_tokens: u64,

    /// System prompt seeded into every conversation.
    pub system_prompt: String,
}

/// Retry and credential rotation policy.
///
/// Defaults mirror the long-standing production values: 1s base backoff
/// doubling up to a 5 minute cap, rotation after 3 consecutive failures on
/// the active credential, and an 8 hour wall-clock ceiling before a turn is
/// abandoned outright.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Base delay for exponential backoff.
    pub base_backoff: Duration,

    /// Cap on any single backoff delay.
    pub max_backoff: Duration,

    /// Consecutive failures on one credential before rotating to the next.
    pub rotate_after_failures: u32,

    /// Wall-clock retry ceiling for a single turn.
    pub max_elapsed: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(300),
            rotate_after_failures: 3,
            max_elapsed: Duration::from_secs(8 * 60 * 60),
        }
    }
}

/// Token budget configuration.
///
/// The budget is a soft ceiling on the *estimated* request size, used to
/// decide when to trim history. Estimation is a heuristic, so the ceiling is
/// a tunable policy rather than a precise contract.
#[derive(Debug, Clone, Copy)]
pub struct ContextConfig {
    /// Initial token budget for outbound requests.
    pub token_budget: usize,

    /// Floor below which context-overflow tightening stops.
    pub min_token_budget: usize,

    /// Multiplier applied to the budget on a context-too-large error.
    pub tighten_factor: f64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            token_budget: 100_000,
            min_token_budget: 1_000,
            tighten_factor: 0.8,
        }
    }
}

/// Outbound delivery configuration.
#[derive(Debug, Clone, Copy)]
pub struct MessagingConfig {
    /// Platform maximum outbound message length (chars). Replies longer than
    /// this are chunked.
    pub max_message_len: usize,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            max_message_len: 2000,
        }
    }
}

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self> {
        // Credentials: comma-separated pool, falling back to a single key.
        let mut credentials: Vec<String> = std::env::var("RELAYBOT_API_KEYS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(String::from)
            .collect();

        if credentials.is_empty()
            && let Ok(single_key) = std::env::var("RELAYBOT_API_KEY")
            && !single_key.trim().is_empty()
        {
            credentials.push(single_key.trim().to_string());
        }

        if credentials.is_empty() {
            return Err(ConfigError::MissingKey(
                "RELAYBOT_API_KEYS (or RELAYBOT_API_KEY)".into(),
            )
            .into());
        }

        let llm = LlmConfig {
            base_url: std::env::var("RELAYBOT_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com".into()),
            model: std::env::var("RELAYBOT_MODEL").unwrap_or_else(|_| "gpt-4.1-mini".into()),
            credentials,
            temperature: parse_env("RELAYBOT_TEMPERATURE", 0.7)?,
            max_tokens: parse_env("RELAYBOT_MAX_TOKENS", 2048)?,
            system_prompt: std::env::var("RELAYBOT_SYSTEM_PROMPT")
                .unwrap_or_else(|_| "You are a helpful assistant.".into()),
        };

        let retry_defaults = RetryConfig::default();
        let retry = RetryConfig {
            base_backoff: Duration::from_millis(parse_env(
                "RELAYBOT_BASE_BACKOFF_MS",
                retry_defaults.base_backoff.as_millis() as u64,
            )?),
            max_backoff: Duration::from_millis(parse_env(
                "RELAYBOT_MAX_BACKOFF_MS",
                retry_defaults.max_backoff.as_millis() as u64,
            )?),
            rotate_after_failures: parse_env(
                "RELAYBOT_ROTATE_AFTER_FAILURES",
                retry_defaults.rotate_after_failures,
            )?,
            max_elapsed: Duration::from_secs(parse_env(
                "RELAYBOT_MAX_ELAPSED_SECS",
                retry_defaults.max_elapsed.as_secs(),
            )?),
        };

        if retry.rotate_after_failures == 0 {
            return Err(
                ConfigError::Invalid("RELAYBOT_ROTATE_AFTER_FAILURES must be >= 1".into()).into(),
            );
        }

        let context_defaults = ContextConfig::default();
        let context = ContextConfig {
            token_budget: parse_env("RELAYBOT_TOKEN_BUDGET", context_defaults.token_budget)?,
            min_token_budget: parse_env(
                "RELAYBOT_MIN_TOKEN_BUDGET",
                context_defaults.min_token_budget,
            )?,
            tighten_factor: context_defaults.tighten_factor,
        };

        if context.min_token_budget == 0 || context.token_budget < context.min_token_budget {
            return Err(ConfigError::Invalid(
                "RELAYBOT_TOKEN_BUDGET must be >= RELAYBOT_MIN_TOKEN_BUDGET (>= 1)".into(),
            )
            .into());
        }

        let messaging = MessagingConfig {
            max_message_len: parse_env(
                "RELAYBOT_MAX_MESSAGE_LEN",
                MessagingConfig::default().max_message_len,
            )?,
        };

        if messaging.max_message_len == 0 {
            return Err(
                ConfigError::Invalid("RELAYBOT_MAX_MESSAGE_LEN must be >= 1".into()).into(),
            );
        }

        Ok(Self {
            llm,
            retry,
            context,
            messaging,
        })
    }
}

/// Parse an environment variable, falling back to a default when unset.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("{key}={raw} is not a valid value")).into()),
        Err(_) => Ok(default),
    }
}
