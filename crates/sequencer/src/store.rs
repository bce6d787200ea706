use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use outreach_core::types::{ProspectSequenceState, SequenceKey, SequenceStatus};
use outreach_store::{PersistenceBackend, StoreError};

use crate::state_machine;

/// Versioned state store. Every write is a compare-and-swap against the
/// version the caller read, and every status change is checked against the
/// transition table before it reaches the backend.
#[derive(Clone)]
pub struct StateStore {
    backend: Arc<dyn PersistenceBackend>,
}

impl StateStore {
    pub fn new(backend: Arc<dyn PersistenceBackend>) -> Self {
        Self { backend }
    }

    /// Writes a freshly enrolled state. Fails with `AlreadyExists` when the
    /// key is taken.
    pub async fn create(&self, mut state: ProspectSequenceState) -> Result<ProspectSequenceState, StoreError> {
        let key = state.key();
        if state.status != SequenceStatus::Pending {
            return Err(StoreError::InvalidTransition {
                key,
                from: SequenceStatus::Pending,
                to: state.status,
            });
        }
        if !self.backend.compare_and_swap(&key, 0, &state).await? {
            return Err(StoreError::AlreadyExists(key));
        }
        state.version = 1;
        Ok(state)
    }

    pub async fn load(&self, key: &SequenceKey) -> Result<Option<ProspectSequenceState>, StoreError> {
        self.backend.load(key).await
    }

    pub async fn require(&self, key: &SequenceKey) -> Result<ProspectSequenceState, StoreError> {
        self.backend
            .load(key)
            .await?
            .ok_or(StoreError::NotFound(*key))
    }

    /// Replaces `current` with `next` in one atomic write.
    ///
    /// Rejected without touching the backend when the status change is not
    /// in the transition table or the step index would go backwards. A lost
    /// race surfaces as `Conflict`; the caller reloads and re-evaluates.
    pub async fn transition(
        &self,
        current: &ProspectSequenceState,
        mut next: ProspectSequenceState,
    ) -> Result<ProspectSequenceState, StoreError> {
        let key = current.key();
        let trigger = state_machine::trigger_for(current.status, next.status).ok_or(
            StoreError::InvalidTransition {
                key,
                from: current.status,
                to: next.status,
            },
        )?;
        if next.key() != key || next.current_step_index < current.current_step_index {
            return Err(StoreError::InvalidTransition {
                key,
                from: current.status,
                to: next.status,
            });
        }

        if !self
            .backend
            .compare_and_swap(&key, current.version, &next)
            .await?
        {
            return Err(StoreError::Conflict {
                key,
                expected: current.version,
            });
        }

        next.version = current.version + 1;
        if current.status != next.status {
            metrics::counter!("sequencer.transitions", "to" => next.status.as_str()).increment(1);
        }
        debug!(
            key = %key,
            from = %current.status,
            to = %next.status,
            trigger,
            step_index = next.current_step_index,
            version = next.version,
            "State transition"
        );
        Ok(next)
    }

    pub async fn list_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<SequenceKey>, StoreError> {
        self.backend.list_due_before(now, limit).await
    }

    pub async fn list_campaign(&self, campaign_id: Uuid) -> Result<Vec<SequenceKey>, StoreError> {
        self.backend.list_campaign(campaign_id).await
    }
}
