//! Core data types shared across the outreach sequencing engine.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of one prospect's run through one campaign's sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SequenceKey {
    pub campaign_id: Uuid,
    pub prospect_id: Uuid,
}

impl SequenceKey {
    pub fn new(campaign_id: Uuid, prospect_id: Uuid) -> Self {
        Self {
            campaign_id,
            prospect_id,
        }
    }

    /// Parses the `campaign_id:prospect_id` form produced by `Display`.
    pub fn parse(raw: &str) -> Option<Self> {
        let (campaign, prospect) = raw.split_once(':')?;
        Some(Self {
            campaign_id: Uuid::parse_str(campaign).ok()?,
            prospect_id: Uuid::parse_str(prospect).ok()?,
        })
    }
}

impl fmt::Display for SequenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.campaign_id, self.prospect_id)
    }
}

/// Lifecycle status of a prospect's sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceStatus {
    Pending,
    Waiting,
    GateChecking,
    Sending,
    Completed,
    StoppedReplied,
    StoppedNotConnected,
    StoppedDisengaged,
    /// Injected by an external stop-prospect or stop-campaign signal.
    StoppedCancelled,
    Failed,
}

impl SequenceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SequenceStatus::Completed
                | SequenceStatus::StoppedReplied
                | SequenceStatus::StoppedNotConnected
                | SequenceStatus::StoppedDisengaged
                | SequenceStatus::StoppedCancelled
                | SequenceStatus::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SequenceStatus::Pending => "pending",
            SequenceStatus::Waiting => "waiting",
            SequenceStatus::GateChecking => "gate_checking",
            SequenceStatus::Sending => "sending",
            SequenceStatus::Completed => "completed",
            SequenceStatus::StoppedReplied => "stopped_replied",
            SequenceStatus::StoppedNotConnected => "stopped_not_connected",
            SequenceStatus::StoppedDisengaged => "stopped_disengaged",
            SequenceStatus::StoppedCancelled => "stopped_cancelled",
            SequenceStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SequenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A confirmed send, keyed by step id in `idempotency_keys_used`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentRecord {
    pub step_id: String,
    pub message_id: String,
    pub sent_at: DateTime<Utc>,
}

/// Preferred local-time send window, chosen once per prospect at enrollment.
/// Hours are in the engine's configured UTC offset; `end_hour` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendWindow {
    pub start_hour: u32,
    pub end_hour: u32,
    pub weekdays_only: bool,
}

impl SendWindow {
    /// A window that accepts every instant.
    pub fn always() -> Self {
        Self {
            start_hour: 0,
            end_hour: 24,
            weekdays_only: false,
        }
    }

    pub fn contains_hour(&self, hour: u32) -> bool {
        hour >= self.start_hour && hour < self.end_hour
    }
}

/// The fixed variable set available to message templates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateBinding {
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

impl TemplateBinding {
    /// Resolves a declared variable name. Unknown names return `None`.
    pub fn lookup(&self, variable: &str) -> Option<&str> {
        match variable {
            "first_name" => Some(self.first_name.as_str()),
            "last_name" => self.last_name.as_deref(),
            "company_name" => self.company_name.as_deref(),
            "title" => self.title.as_deref(),
            _ => None,
        }
    }
}

/// Durable per-prospect sequence state. `version` is owned by the
/// persistence layer and bumped on every successful compare-and-swap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProspectSequenceState {
    pub prospect_id: Uuid,
    pub campaign_id: Uuid,
    pub channel_account_id: String,
    pub recipient_identifier: String,
    #[serde(default)]
    pub binding: TemplateBinding,
    pub current_step_index: usize,
    pub status: SequenceStatus,
    pub next_eligible_at: DateTime<Utc>,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub attempt_count: u32,
    /// When the first counted attempt of the current step was persisted.
    /// Becomes the step's `sent_at`, so a send recovered after a restart
    /// keeps the time it actually went out.
    #[serde(default)]
    pub step_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub idempotency_keys_used: BTreeMap<String, SentRecord>,
    pub send_window: SendWindow,
    #[serde(default)]
    pub last_error: Option<String>,
    pub enrolled_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl ProspectSequenceState {
    pub fn key(&self) -> SequenceKey {
        SequenceKey::new(self.campaign_id, self.prospect_id)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn sent_record(&self, step_id: &str) -> Option<&SentRecord> {
        self.idempotency_keys_used.get(step_id)
    }

    /// Deterministic token for one logical send of `step_id`. The same
    /// step always maps to the same token, across retries and restarts.
    pub fn idempotency_token(&self, step_id: &str) -> String {
        let name = format!("{}:{}:{}", self.campaign_id, self.prospect_id, step_id);
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display_parse() {
        let key = SequenceKey::new(Uuid::new_v4(), Uuid::new_v4());
        let raw = key.to_string();
        assert_eq!(SequenceKey::parse(&raw), Some(key));
        assert!(SequenceKey::parse("not-a-key").is_none());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!SequenceStatus::Pending.is_terminal());
        assert!(!SequenceStatus::Waiting.is_terminal());
        assert!(!SequenceStatus::GateChecking.is_terminal());
        assert!(!SequenceStatus::Sending.is_terminal());
        assert!(SequenceStatus::Completed.is_terminal());
        assert!(SequenceStatus::StoppedReplied.is_terminal());
        assert!(SequenceStatus::StoppedCancelled.is_terminal());
        assert!(SequenceStatus::Failed.is_terminal());
    }

    #[test]
    fn test_status_serde_names() {
        let json = serde_json::to_string(&SequenceStatus::StoppedNotConnected).unwrap();
        assert_eq!(json, "\"stopped_not_connected\"");
        assert_eq!(SequenceStatus::GateChecking.to_string(), "gate_checking");
    }

    #[test]
    fn test_idempotency_token_is_stable_per_step() {
        let now = Utc::now();
        let state = ProspectSequenceState {
            prospect_id: Uuid::new_v4(),
            campaign_id: Uuid::new_v4(),
            channel_account_id: "acct".into(),
            recipient_identifier: "urn:li:1".into(),
            binding: TemplateBinding::default(),
            current_step_index: 0,
            status: SequenceStatus::Pending,
            next_eligible_at: now,
            last_sent_at: None,
            attempt_count: 0,
            step_started_at: None,
            idempotency_keys_used: BTreeMap::new(),
            send_window: SendWindow::always(),
            last_error: None,
            enrolled_at: now,
            updated_at: now,
            version: 0,
        };
        assert_eq!(state.idempotency_token("cr"), state.idempotency_token("cr"));
        assert_ne!(state.idempotency_token("cr"), state.idempotency_token("fu1"));
    }

    #[test]
    fn test_binding_lookup() {
        let binding = TemplateBinding {
            first_name: "Ada".into(),
            company_name: Some("Analytical".into()),
            ..Default::default()
        };
        assert_eq!(binding.lookup("first_name"), Some("Ada"));
        assert_eq!(binding.lookup("company_name"), Some("Analytical"));
        assert_eq!(binding.lookup("title"), None);
        assert_eq!(binding.lookup("favourite_colour"), None);
    }
}
