//! Round-robin credential pool with failure-triggered rotation.

use crate::error::LlmError;
use std::sync::Mutex;

/// Ordered pool of interchangeable credentials with a round-robin cursor.
///
/// The cursor and per-credential failure count are guarded by a single lock
/// so that rotation decisions from concurrent conversations never race. The
/// pool is never empty after construction.
pub struct CredentialPool {
    credentials: Vec<String>,
    state: Mutex<PoolState>,
    /// Consecutive failures on the active credential before rotating.
    rotate_after_failures: u32,
}

struct PoolState {
    cursor: usize,
    failures_on_current: u32,
}

impl CredentialPool {
    pub fn new(credentials: Vec<String>, rotate_after_failures: u32) -> Result<Self, LlmError> {
        if credentials.is_empty() {
            return Err(LlmError::NoCredentials);
        }

        Ok(Self {
            credentials,
            state: Mutex::new(PoolState {
                cursor: 0,
                failures_on_current: 0,
            }),
            rotate_after_failures: rotate_after_failures.max(1),
        })
    }

    /// The credential the next attempt should use.
    pub fn current(&self) -> String {
        let state = self.state.lock().expect("credential pool lock poisoned");
        self.credentials[state.cursor].clone()
    }

    /// Record a failure attributable to the active credential. Rotates to the
    /// next credential once the failure threshold is reached (when an
    /// alternative exists) and returns `true` if rotation happened.
    pub fn record_failure(&self) -> bool {
        let mut state = self.state.lock().expect("credential pool lock poisoned");
        state.failures_on_current += 1;

        if state.failures_on_current >= self.rotate_after_failures && self.credentials.len() > 1 {
            state.cursor = (state.cursor + 1) % self.credentials.len();
            state.failures_on_current = 0;
            tracing::info!(
                credential = %redact(&self.credentials[state.cursor]),
                "rotated to next credential"
            );
            return true;
        }

        false
    }

    /// Record a successful call, clearing the active credential's failure count.
    pub fn record_success(&self) {
        let mut state = self.state.lock().expect("credential pool lock poisoned");
        state.failures_on_current = 0;
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        // Constructor guarantees non-empty; kept for the len/is_empty pair.
        self.credentials.is_empty()
    }

    /// Failures the active credential must still accumulate before rotation.
    pub fn rotate_after_failures(&self) -> u32 {
        self.rotate_after_failures
    }

    #[cfg(test)]
    fn cursor(&self) -> usize {
        self.state.lock().expect("credential pool lock poisoned").cursor
    }
}

/// Last four characters of a credential, for log lines.
fn redact(credential: &str) -> String {
    let tail: String = credential
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("****{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_pool_is_rejected() {
        assert!(matches!(
            CredentialPool::new(vec![], 3),
            Err(LlmError::NoCredentials)
        ));
    }

    #[test]
    fn rotation_fires_at_threshold_and_skips_failing_credential() {
        let pool = CredentialPool::new(vec!["key-a".into(), "key-b".into()], 3).unwrap();
        assert_eq!(pool.current(), "key-a");

        assert!(!pool.record_failure());
        assert!(!pool.record_failure());
        assert!(pool.record_failure());

        // After rotation the previously failing credential is not next up.
        assert_eq!(pool.current(), "key-b");
    }

    #[test]
    fn cursor_wraps_around_the_configured_set() {
        let pool =
            CredentialPool::new(vec!["a".into(), "b".into(), "c".into()], 1).unwrap();

        for _ in 0..7 {
            pool.record_failure();
            assert!(pool.cursor() < pool.len());
        }
        // 7 single-failure rotations over 3 keys: 0 → 1 → 2 → 0 → 1 → 2 → 0 → 1
        assert_eq!(pool.current(), "b");
    }

    #[test]
    fn single_credential_pool_never_rotates() {
        let pool = CredentialPool::new(vec!["only".into()], 1).unwrap();
        for _ in 0..5 {
            assert!(!pool.record_failure());
            assert_eq!(pool.current(), "only");
        }
    }

    #[test]
    fn success_resets_failure_count() {
        let pool = CredentialPool::new(vec!["a".into(), "b".into()], 3).unwrap();
        pool.record_failure();
        pool.record_failure();
        pool.record_success();

        // Two more failures stay below the threshold again.
        assert!(!pool.record_failure());
        assert!(!pool.record_failure());
        assert_eq!(pool.current(), "a");
    }

    #[test]
    fn redact_keeps_only_tail() {
        assert_eq!(redact("sk-abcdef1234"), "****1234");
        assert_eq!(redact("ab"), "****ab");
    }
}
