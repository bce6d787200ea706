//! In-process backend on DashMap. State does not outlive the process, so
//! "restart" in tests means building a new engine over the same backend.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use outreach_core::types::{ProspectSequenceState, SequenceKey};

use crate::backend::{PersistenceBackend, StoreError};

#[derive(Default)]
pub struct InMemoryBackend {
    states: DashMap<SequenceKey, ProspectSequenceState>,
    failing_writes: AtomicU32,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` writes fail with `StoreError::Persistence`.
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl PersistenceBackend for InMemoryBackend {
    async fn load(&self, key: &SequenceKey) -> Result<Option<ProspectSequenceState>, StoreError> {
        Ok(self.states.get(key).map(|s| s.clone()))
    }

    async fn compare_and_swap(
        &self,
        key: &SequenceKey,
        expected_version: u64,
        new_state: &ProspectSequenceState,
    ) -> Result<bool, StoreError> {
        if self.take_injected_failure() {
            return Err(StoreError::Persistence("injected write failure".into()));
        }

        let mut stored = new_state.clone();
        stored.version = expected_version + 1;

        match self.states.entry(*key) {
            Entry::Occupied(mut entry) => {
                if entry.get().version != expected_version {
                    return Ok(false);
                }
                entry.insert(stored);
                Ok(true)
            }
            Entry::Vacant(entry) => {
                if expected_version != 0 {
                    return Ok(false);
                }
                entry.insert(stored);
                Ok(true)
            }
        }
    }

    async fn list_due_before(
        &self,
        ts: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SequenceKey>, StoreError> {
        let mut due: Vec<(DateTime<Utc>, SequenceKey)> = self
            .states
            .iter()
            .filter(|s| !s.is_terminal() && s.next_eligible_at <= ts)
            .map(|s| (s.next_eligible_at, *s.key()))
            .collect();
        due.sort();
        Ok(due.into_iter().take(limit).map(|(_, key)| key).collect())
    }

    async fn list_campaign(&self, campaign_id: Uuid) -> Result<Vec<SequenceKey>, StoreError> {
        Ok(self
            .states
            .iter()
            .filter(|s| s.key().campaign_id == campaign_id)
            .map(|s| *s.key())
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Duration;
    use outreach_core::types::{SendWindow, SequenceStatus, TemplateBinding};

    use super::*;

    fn state(campaign_id: Uuid, due: DateTime<Utc>, status: SequenceStatus) -> ProspectSequenceState {
        ProspectSequenceState {
            prospect_id: Uuid::new_v4(),
            campaign_id,
            channel_account_id: "acct-1".into(),
            recipient_identifier: "recipient".into(),
            binding: TemplateBinding::default(),
            current_step_index: 0,
            status,
            next_eligible_at: due,
            last_sent_at: None,
            attempt_count: 0,
            step_started_at: None,
            idempotency_keys_used: BTreeMap::new(),
            send_window: SendWindow::always(),
            last_error: None,
            enrolled_at: due,
            updated_at: due,
            version: 0,
        }
    }

    #[tokio::test]
    async fn test_cas_create_then_update() {
        let backend = InMemoryBackend::new();
        let s = state(Uuid::new_v4(), Utc::now(), SequenceStatus::Pending);
        let key = s.key();

        assert!(backend.compare_and_swap(&key, 0, &s).await.unwrap());
        // Creating again must lose the race.
        assert!(!backend.compare_and_swap(&key, 0, &s).await.unwrap());

        let loaded = backend.load(&key).await.unwrap().unwrap();
        assert_eq!(loaded.version, 1);

        let mut next = loaded.clone();
        next.status = SequenceStatus::Sending;
        assert!(backend.compare_and_swap(&key, 1, &next).await.unwrap());
        // Stale writer holding version 1.
        assert!(!backend.compare_and_swap(&key, 1, &loaded).await.unwrap());

        let loaded = backend.load(&key).await.unwrap().unwrap();
        assert_eq!(loaded.version, 2);
        assert_eq!(loaded.status, SequenceStatus::Sending);
    }

    #[tokio::test]
    async fn test_due_listing_skips_future_and_terminal() {
        let backend = InMemoryBackend::new();
        let campaign = Uuid::new_v4();
        let now = Utc::now();

        let early = state(campaign, now - Duration::hours(2), SequenceStatus::Waiting);
        let late = state(campaign, now - Duration::minutes(5), SequenceStatus::Waiting);
        let future = state(campaign, now + Duration::hours(1), SequenceStatus::Waiting);
        let done = state(campaign, now - Duration::hours(3), SequenceStatus::Completed);
        for s in [&late, &early, &future, &done] {
            backend.compare_and_swap(&s.key(), 0, s).await.unwrap();
        }

        let due = backend.list_due_before(now, 10).await.unwrap();
        assert_eq!(due, vec![early.key(), late.key()]);

        let limited = backend.list_due_before(now, 1).await.unwrap();
        assert_eq!(limited, vec![early.key()]);

        assert_eq!(backend.list_campaign(campaign).await.unwrap().len(), 4);
        assert!(backend.list_campaign(Uuid::new_v4()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_injected_write_failure() {
        let backend = InMemoryBackend::new();
        let s = state(Uuid::new_v4(), Utc::now(), SequenceStatus::Pending);
        backend.fail_next_writes(1);
        assert!(matches!(
            backend.compare_and_swap(&s.key(), 0, &s).await,
            Err(StoreError::Persistence(_))
        ));
        assert!(backend.is_empty());
        assert!(backend.compare_and_swap(&s.key(), 0, &s).await.unwrap());
        assert_eq!(backend.len(), 1);
    }
}
