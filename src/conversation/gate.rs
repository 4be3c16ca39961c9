//! Per-conversation mutual exclusion with out-of-band cancellation.

use crate::ConversationId;
use crate::error::GateError;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Ensures at most one in-flight turn per conversation.
///
/// Callers that find a turn already running are rejected immediately with
/// [`GateError::Busy`] rather than queued. `cancel` interrupts the active
/// turn's token; the turn observes it cooperatively (between retry attempts)
/// and releases its slot on the way out.
///
/// Slots live for the process lifetime: a conversation's entry is created on
/// first use and flips between idle and running, never removed.
#[derive(Default)]
pub struct ConversationGate {
    slots: Mutex<HashMap<ConversationId, Slot>>,
}

struct Slot {
    running: bool,
    cancel: CancellationToken,
}

/// Releases the slot when the turn finishes, including on panic.
struct SlotGuard<'a> {
    gate: &'a ConversationGate,
    conversation_id: ConversationId,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        let mut slots = self.gate.slots.lock().expect("gate lock poisoned");
        if let Some(slot) = slots.get_mut(&self.conversation_id) {
            slot.running = false;
        }
    }
}

impl ConversationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` as the conversation's sole in-flight turn. The task
    /// receives a fresh cancellation token tied to this turn. Returns
    /// `Err(Busy)` without running anything when a turn is already active.
    pub async fn run_exclusive<F, Fut, T>(
        &self,
        conversation_id: &ConversationId,
        task: F,
    ) -> Result<T, GateError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = T>,
    {
        let cancel = self.claim(conversation_id)?;
        let _guard = SlotGuard {
            gate: self,
            conversation_id: conversation_id.clone(),
        };

        Ok(task(cancel).await)
    }

    /// Cancel the conversation's active turn, if any. Returns whether a turn
    /// was running.
    pub fn cancel(&self, conversation_id: &ConversationId) -> bool {
        let slots = self.slots.lock().expect("gate lock poisoned");
        match slots.get(conversation_id) {
            Some(slot) if slot.running => {
                tracing::info!(%conversation_id, "cancelling active turn");
                slot.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Whether the conversation currently has a turn in flight.
    pub fn is_running(&self, conversation_id: &ConversationId) -> bool {
        let slots = self.slots.lock().expect("gate lock poisoned");
        slots
            .get(conversation_id)
            .is_some_and(|slot| slot.running)
    }

    /// Mark the conversation running and hand back a fresh token, or reject
    /// with Busy. The lock is held only for the claim itself.
    fn claim(&self, conversation_id: &ConversationId) -> Result<CancellationToken, GateError> {
        let mut slots = self.slots.lock().expect("gate lock poisoned");
        let slot = slots
            .entry(conversation_id.clone())
            .or_insert_with(|| Slot {
                running: false,
                cancel: CancellationToken::new(),
            });

        if slot.running {
            return Err(GateError::Busy {
                conversation_id: conversation_id.to_string(),
            });
        }

        slot.running = true;
        // A fresh token per turn so a stale cancel can't poison the next one.
        slot.cancel = CancellationToken::new();
        Ok(slot.cancel.clone())
    }
}
