//! Process-wide token budget with context-overflow tightening.

use crate::config::ContextConfig;
use std::sync::Mutex;

/// Soft ceiling on estimated request size, shared across conversations.
///
/// Tightening from concurrent turns is serialized by the lock; the budget
/// only ever shrinks (down to the configured floor), so a tightened value
/// observed by one conversation holds for all later dispatches.
pub struct TokenBudget {
    current: Mutex<usize>,
    min: usize,
    tighten_factor: f64,
}

impl TokenBudget {
    pub fn new(config: ContextConfig) -> Self {
        Self {
            current: Mutex::new(config.token_budget.max(config.min_token_budget)),
            min: config.min_token_budget,
            tighten_factor: config.tighten_factor,
        }
    }

    /// The ceiling to trim against before the next dispatch.
    pub fn get(&self) -> usize {
        *self.current.lock().expect("token budget lock poisoned")
    }

    /// Shrink the ceiling after a context-too-large failure. Returns the new
    /// value, or `None` when the budget is already at the floor (no further
    /// trimming is possible and the error should propagate).
    pub fn tighten(&self) -> Option<usize> {
        let mut current = self.current.lock().expect("token budget lock poisoned");
        if *current <= self.min {
            return None;
        }

        let tightened = ((*current as f64) * self.tighten_factor) as usize;
        *current = tightened.max(self.min);
        tracing::info!(token_budget = *current, "tightened token budget");
        Some(*current)
    }
}
