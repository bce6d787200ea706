//! Status reporting: a trait for emitting sequence status changes to
//! downstream collaborators.
//!
//! Reporting is fire-and-forget: a sink must never block or fail the state
//! machine. Implementations route reports to a webhook (see
//! `outreach-channels`), a test capture buffer, or nowhere.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ProspectSequenceState, SequenceStatus};

/// Emitted on every successful send and every terminal transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub campaign_id: Uuid,
    pub prospect_id: Uuid,
    pub status: SequenceStatus,
    pub step_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

pub trait StatusSink: Send + Sync {
    fn emit(&self, report: StatusReport);
}

/// No-op sink for tests and deployments without a webhook.
pub struct NoOpSink;

impl StatusSink for NoOpSink {
    fn emit(&self, _report: StatusReport) {}
}

/// In-memory sink that captures reports for testing.
#[derive(Default)]
pub struct CaptureSink {
    reports: Mutex<Vec<StatusReport>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            reports: Mutex::new(Vec::new()),
        }
    }

    pub fn reports(&self) -> Vec<StatusReport> {
        self.reports.lock().expect("status sink mutex poisoned").clone()
    }

    pub fn count(&self) -> usize {
        self.reports.lock().expect("status sink mutex poisoned").len()
    }

    pub fn count_status(&self, status: SequenceStatus) -> usize {
        self.reports
            .lock()
            .expect("status sink mutex poisoned")
            .iter()
            .filter(|r| r.status == status)
            .count()
    }

    pub fn clear(&self) {
        self.reports.lock().expect("status sink mutex poisoned").clear();
    }
}

impl StatusSink for CaptureSink {
    fn emit(&self, report: StatusReport) {
        self.reports
            .lock()
            .expect("status sink mutex poisoned")
            .push(report);
    }
}

/// Builds a report from the state as persisted after a transition.
pub fn make_report(
    state: &ProspectSequenceState,
    step_id: Option<&str>,
    timestamp: DateTime<Utc>,
) -> StatusReport {
    StatusReport {
        campaign_id: state.campaign_id,
        prospect_id: state.prospect_id,
        status: state.status,
        step_id: step_id.map(str::to_string),
        timestamp,
    }
}

pub fn noop_sink() -> Arc<dyn StatusSink> {
    Arc::new(NoOpSink)
}

pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}
