//! Webhook status sink. Posts `StatusReport`s to a configured endpoint from
//! a background task. `emit` only enqueues onto a bounded queue, so a slow
//! or failing endpoint never holds up or rolls back a sequence transition;
//! when the queue is full the report is dropped and counted.

use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use outreach_core::config::WebhookConfig;
use outreach_core::event_bus::{StatusReport, StatusSink};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &WebhookConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self
            .backoff_multiplier
            .saturating_pow(retry.saturating_sub(1));
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

pub struct WebhookStatusSink {
    tx: mpsc::Sender<StatusReport>,
}

impl WebhookStatusSink {
    /// Starts the delivery task. The task ends once every sink handle is dropped.
    pub fn spawn(url: String, config: &WebhookConfig) -> Result<(Self, JoinHandle<()>), reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        let policy = RetryPolicy::from_config(config);
        let (tx, mut rx) = mpsc::channel::<StatusReport>(config.queue_capacity.max(1));

        let handle = tokio::spawn(async move {
            while let Some(report) = rx.recv().await {
                deliver(&http, &url, &policy, &report).await;
            }
            debug!("Status webhook queue closed");
        });

        Ok((Self { tx }, handle))
    }
}

async fn deliver(http: &reqwest::Client, url: &str, policy: &RetryPolicy, report: &StatusReport) {
    let mut attempt = 0;
    loop {
        let result = http
            .post(url)
            .json(report)
            .send()
            .await
            .and_then(|r| r.error_for_status());

        match result {
            Ok(_) => {
                metrics::counter!("status_webhook.delivered").increment(1);
                return;
            }
            Err(e) if attempt < policy.max_retries => {
                attempt += 1;
                debug!(error = %e, attempt, "Status webhook delivery failed, retrying");
                tokio::time::sleep(policy.delay_for(attempt)).await;
            }
            Err(e) => {
                metrics::counter!("status_webhook.delivery_failures").increment(1);
                warn!(
                    error = %e,
                    campaign_id = %report.campaign_id,
                    prospect_id = %report.prospect_id,
                    status = %report.status,
                    "Status webhook delivery abandoned"
                );
                return;
            }
        }
    }
}

impl StatusSink for WebhookStatusSink {
    fn emit(&self, report: StatusReport) {
        match self.tx.try_send(report) {
            Ok(()) => {}
            Err(TrySendError::Full(report)) => {
                metrics::counter!("status_webhook.dropped", "reason" => "queue_full").increment(1);
                warn!(
                    campaign_id = %report.campaign_id,
                    prospect_id = %report.prospect_id,
                    status = %report.status,
                    "Status webhook queue full, dropping report"
                );
            }
            Err(TrySendError::Closed(_)) => {
                metrics::counter!("status_webhook.dropped", "reason" => "closed").increment(1);
                warn!("Status webhook task is gone, dropping report");
            }
        }
    }
}
