//! Completion endpoint client: request types and the HTTP implementation.

use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::llm::classify;

use serde::{Deserialize, Serialize};

/// Message role in a completion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single {role, text} entry in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            text: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// An outbound completion request: ordered messages plus sampling parameters.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: u64,
}

/// The dispatch seam between the retry layer and the remote endpoint.
///
/// Implementations perform exactly one network call per invocation and
/// classify failures into [`LlmError`] variants; all retry, rotation, and
/// trimming policy lives above this trait.
#[async_trait::async_trait]
pub trait CompletionClient: Send + Sync {
    /// Dispatch one completion request using the given credential. Returns
    /// the assistant's reply text.
    async fn complete(
        &self,
        request: &CompletionRequest,
        credential: &str,
    ) -> Result<String, LlmError>;
}

/// HTTP client for an OpenAI-style `/v1/chat/completions` endpoint.
pub struct HttpCompletionClient {
    http_client: reqwest::Client,
    base_url: String,
    model: String,
}

impl HttpCompletionClient {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| LlmError::Fatal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }
}

#[async_trait::async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(
        &self,
        request: &CompletionRequest,
        credential: &str,
    ) -> Result<String, LlmError> {
        let chat_completions_url = format!("{}/v1/chat/completions", self.base_url);

        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|message| {
                serde_json::json!({
                    "role": match message.role {
                        Role::System => "system",
                        Role::User => "user",
                        Role::Assistant => "assistant",
                    },
                    "content": message.text,
                })
            })
            .collect();

        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });

        let response = self
            .http_client
            .post(&chat_completions_url)
            .header("authorization", format!("Bearer {credential}"))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                // Transport failures are transient provider issues.
                LlmError::ServerError {
                    status: 0,
                    message: format!("request failed: {e}"),
                }
            })?;

        let status = response.status();
        let retry_after_header = response
            .headers()
            .get("retry-after")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(std::time::Duration::from_secs);

        let response_text = response.text().await.map_err(|e| LlmError::ServerError {
            status: status.as_u16(),
            message: format!("failed to read response body: {e}"),
        })?;

        if !status.is_success() {
            return Err(classify_http_failure(
                status.as_u16(),
                &response_text,
                retry_after_header,
            ));
        }

        let response_body: serde_json::Value =
            serde_json::from_str(&response_text).map_err(|e| LlmError::ServerError {
                status: status.as_u16(),
                message: format!(
                    "response is not valid JSON: {e}\nBody: {}",
                    truncate_body(&response_text)
                ),
            })?;

        let reply = response_body["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("");

        if reply.is_empty() {
            // Empty responses are transient provider issues; let the retry
            // layer have another go.
            return Err(LlmError::ServerError {
                status: status.as_u16(),
                message: "empty response from provider".into(),
            });
        }

        Ok(reply.to_string())
    }
}

/// Map a non-success HTTP response onto the error taxonomy.
fn classify_http_failure(
    status: u16,
    response_text: &str,
    retry_after_header: Option<std::time::Duration>,
) -> LlmError {
    let message = serde_json::from_str::<serde_json::Value>(response_text)
        .ok()
        .and_then(|body| body["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| truncate_body(response_text).to_string());

    match status {
        429 => LlmError::RateLimited {
            retry_after: retry_after_header.or_else(|| classify::retry_delay_from_message(&message)),
            message,
        },
        401 | 403 => LlmError::InvalidCredential(message),
        400 if classify::is_context_overflow_message(&message) => {
            LlmError::ContextTooLarge(message)
        }
        _ if classify::is_retriable_status(status) => LlmError::ServerError { status, message },
        // Some gateways hide transient failures behind unexpected statuses;
        // check the body text before giving up on the request.
        _ if classify::is_retriable_message(&message) => {
            LlmError::ServerError { status, message }
        }
        _ => LlmError::Fatal(format!("API error ({status}): {message}")),
    }
}

/// Truncate a response body for error messages to avoid dumping megabytes of HTML.
fn truncate_body(body: &str) -> &str {
    let limit = 500;
    if body.len() <= limit {
        body
    } else {
        let mut end = limit;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        &body[..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_status_maps_to_rate_limited() {
        let error = classify_http_failure(429, r#"{"error":{"message":"slow down"}}"#, None);
        assert!(matches!(error, LlmError::RateLimited { .. }));
    }

    #[test]
    fn rate_limit_honors_server_delay_in_body() {
        let body = r#"{"error":{"message":"quota exceeded. retry_delay { seconds: 42 }"}}"#;
        let error = classify_http_failure(429, body, None);
        match error {
            LlmError::RateLimited { retry_after, .. } => {
                assert_eq!(retry_after, Some(std::time::Duration::from_secs(42)));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn auth_statuses_map_to_invalid_credential() {
        for status in [401, 403] {
            let error = classify_http_failure(status, r#"{"error":{"message":"bad key"}}"#, None);
            assert!(matches!(error, LlmError::InvalidCredential(_)));
        }
    }

    #[test]
    fn context_overflow_400_maps_to_context_too_large() {
        let body = r#"{"error":{"message":"This model's maximum context length is 8192 tokens"}}"#;
        let error = classify_http_failure(400, body, None);
        assert!(matches!(error, LlmError::ContextTooLarge(_)));
    }

    #[test]
    fn plain_400_is_fatal() {
        let error = classify_http_failure(400, r#"{"error":{"message":"bad request"}}"#, None);
        assert!(matches!(error, LlmError::Fatal(_)));
    }

    #[test]
    fn server_errors_map_to_server_error() {
        let error = classify_http_failure(503, "overloaded", None);
        assert!(matches!(error, LlmError::ServerError { status: 503, .. }));
    }

    #[test]
    fn retriable_body_on_unexpected_status_maps_to_server_error() {
        let body = r#"{"error":{"message":"upstream connection reset before headers"}}"#;
        let error = classify_http_failure(404, body, None);
        assert!(matches!(error, LlmError::ServerError { status: 404, .. }));
    }

    #[test]
    fn timeout_phrased_400_maps_to_server_error() {
        let body = r#"{"error":{"message":"Request timeout while waiting for model"}}"#;
        let error = classify_http_failure(400, body, None);
        assert!(matches!(error, LlmError::ServerError { status: 400, .. }));
    }

    #[test]
    fn truncate_body_respects_char_boundaries() {
        let body = "é".repeat(400);
        let truncated = truncate_body(&body);
        assert!(truncated.len() <= 500);
        assert!(body.starts_with(truncated));
    }
}
