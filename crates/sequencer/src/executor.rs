//! Idempotent step execution with bounded, persisted retries.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use outreach_core::channels::{ChannelClient, ChannelError, LimitReset, SentMessage};
use outreach_core::config::RetryConfig;
use outreach_core::templates::MessageRenderer;
use outreach_core::types::{ProspectSequenceState, SentRecord};
use outreach_store::StoreError;

use crate::clock::Clock;
use crate::store::StateStore;
use crate::types::Step;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total send attempts per step, first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub factor: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            factor: config.factor.max(1),
        }
    }

    /// Wait before attempt number `attempt` (1-based). The first attempt
    /// goes out immediately.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let multiplier = self.factor.saturating_pow(attempt - 2);
        self.base_delay.saturating_mul(multiplier)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendResult {
    Sent(SentRecord),
    /// The step's key was already recorded; nothing was sent.
    AlreadySent(SentRecord),
    Failed { reason: String, permanent: bool },
    /// The provider refused on quota. Nothing was delivered and the refused
    /// attempt is not charged: `attempt_count` is the count to keep.
    Throttled {
        reason: String,
        reset: LimitReset,
        attempt_count: u32,
    },
}

/// Latest persisted state plus what happened to the send.
#[derive(Debug, Clone)]
pub struct Execution {
    pub state: ProspectSequenceState,
    pub result: SendResult,
}

pub struct StepExecutor {
    channel: Arc<dyn ChannelClient>,
    renderer: Arc<dyn MessageRenderer>,
    store: StateStore,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl StepExecutor {
    pub fn new(
        channel: Arc<dyn ChannelClient>,
        renderer: Arc<dyn MessageRenderer>,
        store: StateStore,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            channel,
            renderer,
            store,
            clock,
            retry,
        }
    }

    /// Sends `step` for a state in `sending`.
    ///
    /// The attempt counter is persisted before each channel call, so a
    /// restart resumes the retry budget instead of resetting it. Every
    /// attempt carries the same idempotency token. A state that arrives
    /// with the budget already spent was interrupted after its last
    /// attempt; that attempt may have been delivered, so it is replayed
    /// once with the same token to recover the message id. The caller
    /// records the returned `SentRecord` and advances the state.
    pub async fn execute(&self, state: ProspectSequenceState, step: &Step) -> Result<Execution, StoreError> {
        if let Some(record) = state.sent_record(&step.step_id) {
            let result = SendResult::AlreadySent(record.clone());
            return Ok(Execution { state, result });
        }

        let text = match self.renderer.render(&step.message_key, &state.binding) {
            Ok(text) => text,
            Err(e) => {
                let result = SendResult::Failed {
                    reason: e.to_string(),
                    permanent: true,
                };
                return Ok(Execution { state, result });
            }
        };

        let token = state.idempotency_token(&step.step_id);
        if state.attempt_count >= self.retry.max_attempts {
            return Ok(self.recover(state, step, &text, &token).await);
        }

        let mut state = state;
        let mut last_error = if state.attempt_count > 0 {
            state.last_error.clone()
        } else {
            None
        };

        loop {
            if state.attempt_count >= self.retry.max_attempts {
                let reason = last_error.unwrap_or_else(|| "retry budget exhausted".to_string());
                let result = SendResult::Failed {
                    reason,
                    permanent: false,
                };
                return Ok(Execution { state, result });
            }

            let attempt = state.attempt_count + 1;
            let delay = self.retry.delay_before(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let now = self.clock.now();
            let mut next = state.clone();
            next.attempt_count = attempt;
            next.last_error = last_error.clone();
            next.step_started_at = Some(state.step_started_at.unwrap_or(now));
            next.updated_at = now;
            state = self.store.transition(&state, next).await?;

            match self
                .channel
                .send(
                    &state.channel_account_id,
                    &state.recipient_identifier,
                    &text,
                    &token,
                )
                .await
            {
                Ok(sent) => {
                    info!(
                        key = %state.key(),
                        step_id = %step.step_id,
                        attempt,
                        message_id = %sent.message_id,
                        "Step sent"
                    );
                    return Ok(self.sent(state, step, sent));
                }
                Err(ChannelError::RateLimited { reason, reset }) => {
                    metrics::counter!("sequencer.send_failures", "kind" => "rate_limited").increment(1);
                    warn!(
                        key = %state.key(),
                        step_id = %step.step_id,
                        attempt,
                        reason = %reason,
                        "Provider rate limit, send postponed"
                    );
                    let result = SendResult::Throttled {
                        reason,
                        reset,
                        attempt_count: attempt - 1,
                    };
                    return Ok(Execution { state, result });
                }
                Err(e) if e.is_retryable() => {
                    metrics::counter!("sequencer.send_failures", "kind" => "transient").increment(1);
                    warn!(
                        key = %state.key(),
                        step_id = %step.step_id,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        error = %e,
                        "Send attempt failed"
                    );
                    last_error = Some(e.to_string());
                }
                Err(e) => {
                    metrics::counter!("sequencer.send_failures", "kind" => "permanent").increment(1);
                    let result = SendResult::Failed {
                        reason: e.to_string(),
                        permanent: true,
                    };
                    return Ok(Execution { state, result });
                }
            }
        }
    }

    async fn recover(&self, state: ProspectSequenceState, step: &Step, text: &str, token: &str) -> Execution {
        let sent = self
            .channel
            .send(&state.channel_account_id, &state.recipient_identifier, text, token)
            .await;
        match sent {
            Ok(sent) => {
                info!(
                    key = %state.key(),
                    step_id = %step.step_id,
                    attempts = state.attempt_count,
                    message_id = %sent.message_id,
                    "Recovered send from an interrupted final attempt"
                );
                self.sent(state, step, sent)
            }
            Err(ChannelError::RateLimited { reason, reset }) => {
                let attempt_count = state.attempt_count;
                Execution {
                    state,
                    result: SendResult::Throttled {
                        reason,
                        reset,
                        attempt_count,
                    },
                }
            }
            Err(e) => {
                let permanent = !e.is_retryable();
                let reason = match &state.last_error {
                    Some(previous) if !permanent => format!("{previous}; {e}"),
                    _ => e.to_string(),
                };
                Execution {
                    state,
                    result: SendResult::Failed { reason, permanent },
                }
            }
        }
    }

    /// Sent at the first counted attempt of the step, so a delivery
    /// recovered later keeps its original time.
    fn sent(&self, state: ProspectSequenceState, step: &Step, sent: SentMessage) -> Execution {
        let record = SentRecord {
            step_id: step.step_id.clone(),
            message_id: sent.message_id,
            sent_at: state.step_started_at.unwrap_or_else(|| self.clock.now()),
        };
        Execution {
            state,
            result: SendResult::Sent(record),
        }
    }
}
