//! Error-signature classification helpers.
//!
//! Providers are inconsistent about how they report transient failures, so
//! classification falls back to message-text matching when the HTTP status
//! alone is ambiguous.

use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;

/// Whether an HTTP status code indicates a transient failure worth retrying.
/// Status 0 stands in for transport failures that never produced a response.
pub fn is_retriable_status(status: u16) -> bool {
    status == 0 || status == 429 || (500..=599).contains(&status)
}

/// Whether a completion error message indicates a retriable failure.
pub fn is_retriable_message(error_message: &str) -> bool {
    let lower = error_message.to_lowercase();
    // Rate limits and server errors
    lower.contains("429")
        || lower.contains("500")
        || lower.contains("502")
        || lower.contains("503")
        || lower.contains("504")
        || lower.contains("rate limit")
        || lower.contains("quota")
        || lower.contains("overloaded")
        || lower.contains("timeout")
        || lower.contains("connection")
        // Empty/malformed responses are transient provider issues
        || lower.contains("empty response")
        || lower.contains("failed to read response body")
}

/// Whether a completion error indicates context window overflow.
///
/// Providers return 400 with various phrasings when the request exceeds the
/// model's context limit. Matching these lets the retry layer tighten the
/// token budget and trim instead of giving up.
pub fn is_context_overflow_message(error_message: &str) -> bool {
    let lower = error_message.to_lowercase();
    lower.contains("context length")
        || lower.contains("maximum context")
        || lower.contains("context window")
        || lower.contains("token limit")
        || lower.contains("too many tokens")
        || lower.contains("request too large")
        || lower.contains("content_too_large")
        || (lower.contains("maximum") && lower.contains("tokens"))
}

/// Extract a server-suggested retry delay from an error payload, if present.
///
/// Matches both the protobuf-style `retry_delay { seconds: N }` some
/// providers embed in quota errors and the plainer `retry after N seconds`
/// phrasing.
pub fn retry_delay_from_message(error_message: &str) -> Option<Duration> {
    static RE_DELAY: OnceLock<Regex> = OnceLock::new();
    let re = RE_DELAY.get_or_init(|| {
        Regex::new(r"(?i)retry[_ ]?(?:delay\s*\{\s*seconds:\s*|after\s+)(\d+)")
            .expect("retry delay regex is valid")
    });

    re.captures(error_message)
        .and_then(|captures| captures.get(1))
        .and_then(|seconds| seconds.as_str().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriable_statuses() {
        assert!(is_retriable_status(0));
        assert!(is_retriable_status(429));
        assert!(is_retriable_status(503));
        assert!(is_retriable_status(599));
        assert!(!is_retriable_status(401));
        assert!(!is_retriable_status(400));
    }

    #[test]
    fn retriable_messages_match_rate_limits_and_server_errors() {
        assert!(is_retriable_message("429 Too Many Requests"));
        assert!(is_retriable_message("Resource has been exhausted (quota)"));
        assert!(is_retriable_message("upstream connection reset"));
        assert!(!is_retriable_message("invalid api key"));
    }

    #[test]
    fn context_overflow_phrasings() {
        assert!(is_context_overflow_message(
            "This model's maximum context length is 8192 tokens"
        ));
        assert!(is_context_overflow_message("Request too large for model"));
        assert!(!is_context_overflow_message("invalid request"));
    }

    #[test]
    fn extracts_protobuf_style_retry_delay() {
        let message = "429 quota exceeded. retry_delay {\n  seconds: 37\n}";
        assert_eq!(
            retry_delay_from_message(message),
            Some(Duration::from_secs(37))
        );
    }

    #[test]
    fn extracts_plain_retry_after() {
        assert_eq!(
            retry_delay_from_message("rate limited, retry after 12 seconds"),
            Some(Duration::from_secs(12))
        );
    }

    #[test]
    fn no_delay_when_absent() {
        assert_eq!(retry_delay_from_message("503 service unavailable"), None);
    }
}
