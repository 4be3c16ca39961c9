//! Retrying completion client: backoff, credential rotation, budget trimming.

use crate::config::RetryConfig;
use crate::conversation::history::MessageHistory;
use crate::error::LlmError;
use crate::llm::budget::TokenBudget;
use crate::llm::client::{CompletionClient, CompletionRequest};
use crate::llm::credentials::CredentialPool;

use rand::Rng as _;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Exponent cap so the backoff shift never overflows. The delay is clamped
/// to `max_backoff` long before this matters.
const MAX_BACKOFF_EXPONENT: u32 = 20;

/// Sampling parameters applied to every dispatched request.
#[derive(Debug, Clone, Copy)]
pub struct SamplingParams {
    pub temperature: f64,
    pub max_tokens: u64,
}

/// Wraps a [`CompletionClient`] with the full recovery policy: exponential
/// backoff with jitter for rate limits and server errors (honoring a
/// server-suggested delay when one is present), credential rotation after
/// consecutive auth failures, token-budget tightening on context overflow,
/// and a wall-clock ceiling after which the turn is abandoned.
///
/// Cancellation is cooperative: the token is checked before every attempt
/// and raced against backoff sleeps. An in-flight network call itself is
/// never interrupted.
pub struct RetryingClient<C: CompletionClient> {
    client: C,
    credentials: Arc<CredentialPool>,
    budget: Arc<TokenBudget>,
    policy: RetryConfig,
    sampling: SamplingParams,
}

impl<C: CompletionClient> RetryingClient<C> {
    pub fn new(
        client: C,
        credentials: Arc<CredentialPool>,
        budget: Arc<TokenBudget>,
        policy: RetryConfig,
        sampling: SamplingParams,
    ) -> Self {
        Self {
            client,
            credentials,
            budget,
            policy,
            sampling,
        }
    }

    /// Run one conversation turn to completion, retrying as policy allows.
    /// Returns the assistant's reply text.
    pub async fn complete(
        &self,
        history: &MessageHistory,
        cancel: &CancellationToken,
    ) -> Result<String, LlmError> {
        let started = Instant::now();
        let mut attempt: u32 = 0;
        // Backoff doubles only on load-related failures. Auth and overflow
        // retries must not inflate the delay applied to a later rate limit.
        let mut backoff_exponent: u32 = 0;
        // Total auth failures across the whole pool. Once every credential
        // has burned through its rotation threshold, auth errors propagate.
        let mut invalid_credential_failures: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(LlmError::Cancelled);
            }

            let elapsed = started.elapsed();
            if elapsed > self.policy.max_elapsed {
                tracing::error!(
                    ?elapsed,
                    attempt,
                    "giving up: wall-clock retry budget exhausted"
                );
                return Err(LlmError::RetryBudgetExhausted { elapsed });
            }

            // Re-trim every attempt: the shared budget may have tightened
            // since the last dispatch.
            let mut working = history.clone();
            working.trim_to_budget(self.budget.get());

            let request = CompletionRequest {
                messages: working.messages().to_vec(),
                temperature: self.sampling.temperature,
                max_tokens: self.sampling.max_tokens,
            };

            let credential = self.credentials.current();

            match self.client.complete(&request, &credential).await {
                Ok(text) => {
                    self.credentials.record_success();
                    return Ok(text);
                }
                Err(LlmError::RateLimited {
                    retry_after,
                    message,
                }) => {
                    let delay = retry_after.unwrap_or_else(|| self.backoff_delay(backoff_exponent));
                    tracing::warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        server_delay = retry_after.is_some(),
                        %message,
                        "rate limited, backing off"
                    );
                    attempt += 1;
                    backoff_exponent += 1;
                    self.sleep_or_cancel(delay, cancel).await?;
                }
                Err(LlmError::ServerError { status, message }) => {
                    let delay = self.backoff_delay(backoff_exponent);
                    tracing::warn!(
                        attempt = attempt + 1,
                        status,
                        delay_ms = delay.as_millis() as u64,
                        %message,
                        "server error, backing off"
                    );
                    attempt += 1;
                    backoff_exponent += 1;
                    self.sleep_or_cancel(delay, cancel).await?;
                }
                Err(LlmError::InvalidCredential(message)) => {
                    invalid_credential_failures += 1;
                    attempt += 1;

                    let exhausted = invalid_credential_failures
                        >= self.credentials.rotate_after_failures()
                            * self.credentials.len() as u32;
                    if exhausted {
                        tracing::error!(%message, "every credential rejected, giving up");
                        return Err(LlmError::InvalidCredential(message));
                    }

                    let rotated = self.credentials.record_failure();
                    tracing::warn!(
                        attempt,
                        rotated,
                        %message,
                        "credential rejected, retrying"
                    );
                    // No backoff: auth failures are not load-related.
                }
                Err(LlmError::ContextTooLarge(message)) => {
                    attempt += 1;
                    match self.budget.tighten() {
                        Some(token_budget) => {
                            tracing::warn!(
                                attempt,
                                token_budget,
                                %message,
                                "context too large, trimming harder"
                            );
                        }
                        None => {
                            tracing::error!(
                                %message,
                                "context too large at minimum budget, giving up"
                            );
                            return Err(LlmError::ContextTooLarge(message));
                        }
                    }
                }
                Err(error) => {
                    // Cancelled, Fatal, and everything unclassified propagate
                    // verbatim and immediately.
                    tracing::error!(%error, attempt = attempt + 1, "non-retriable completion error");
                    return Err(error);
                }
            }
        }
    }

    /// Exponential backoff with multiplicative jitter: `base × 2^exponent`,
    /// clamped to `max_backoff`, scaled by a uniform 1.0–1.3 factor.
    fn backoff_delay(&self, backoff_exponent: u32) -> Duration {
        let exponent = backoff_exponent.min(MAX_BACKOFF_EXPONENT);
        let exponential = self
            .policy
            .base_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.policy.max_backoff);

        let jitter = rand::rng().random_range(1.0..1.3);
        exponential.mul_f64(jitter)
    }

    async fn sleep_or_cancel(
        &self,
        delay: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), LlmError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(LlmError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}
