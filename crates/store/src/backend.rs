use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use outreach_core::types::{ProspectSequenceState, SequenceKey, SequenceStatus};

#[derive(Error, Debug)]
pub enum StoreError {
    /// The backend could not be reached or rejected the write. Nothing was
    /// advanced; the caller retries on its next cycle.
    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Another writer advanced the state first.
    #[error("version conflict on {key} (expected version {expected})")]
    Conflict { key: SequenceKey, expected: u64 },

    #[error("invalid transition {from} -> {to} for {key}")]
    InvalidTransition {
        key: SequenceKey,
        from: SequenceStatus,
        to: SequenceStatus,
    },

    #[error("no sequence state for {0}")]
    NotFound(SequenceKey),

    #[error("sequence state for {0} already exists")]
    AlreadyExists(SequenceKey),
}

/// Persistence collaborator. All writes go through `compare_and_swap`.
#[async_trait]
pub trait PersistenceBackend: Send + Sync {
    async fn load(&self, key: &SequenceKey) -> Result<Option<ProspectSequenceState>, StoreError>;

    /// Atomically replaces the state at `key` if its stored version equals
    /// `expected_version` (`0` means the key must not exist yet). The stored
    /// copy gets version `expected_version + 1`; `new_state.version` is
    /// ignored. Returns `false` when the version did not match.
    async fn compare_and_swap(
        &self,
        key: &SequenceKey,
        expected_version: u64,
        new_state: &ProspectSequenceState,
    ) -> Result<bool, StoreError>;

    /// Non-terminal states whose `next_eligible_at` is at or before `ts`,
    /// earliest first.
    async fn list_due_before(
        &self,
        ts: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SequenceKey>, StoreError>;

    /// Every key enrolled in `campaign_id`, terminal or not.
    async fn list_campaign(&self, campaign_id: Uuid) -> Result<Vec<SequenceKey>, StoreError>;
}
