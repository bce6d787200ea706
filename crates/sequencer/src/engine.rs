use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use outreach_core::channels::{ChannelClient, LimitReset, PlainReplyClassifier, ReplyClassifier};
use outreach_core::config::{RateLimitConfig, SendWindowConfig};
use outreach_core::event_bus::{make_report, noop_sink, StatusSink};
use outreach_core::templates::MessageRenderer;
use outreach_core::types::{
    ProspectSequenceState, SequenceKey, SequenceStatus, TemplateBinding,
};
use outreach_store::{PersistenceBackend, StoreError};

use crate::clock::{Clock, SystemClock};
use crate::executor::{Execution, RetryPolicy, SendResult, StepExecutor};
use crate::gate::{GateEvaluator, GateResult};
use crate::jitter::JitterGenerator;
use crate::rate_limit::{Acquire, AccountRateLimiter};
use crate::store::StateStore;
use crate::types::{SequenceDefinition, SequenceRegistry, Step};

/// How many times `cancel` re-reads after losing a write race.
const CANCEL_ATTEMPTS: usize = 5;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("no sequence registered for campaign {0}")]
    UnknownCampaign(Uuid),

    #[error("step index {index} is out of range for campaign {campaign_id}")]
    StepOutOfRange { campaign_id: Uuid, index: usize },
}

/// Where `drive` left a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveOutcome {
    /// Live and scheduled for later.
    NotDue { next_eligible_at: DateTime<Utc> },
    /// Ready to send but held back by the send window or a rate limit.
    /// Stays in `sending` and becomes due again at `next_eligible_at`.
    Deferred { next_eligible_at: DateTime<Utc> },
    Terminal(SequenceStatus),
}

enum SendPhase {
    Advanced(ProspectSequenceState),
    Deferred(ProspectSequenceState),
}

#[derive(Debug, Clone)]
pub struct EnrollRequest {
    pub campaign_id: Uuid,
    pub prospect_id: Uuid,
    pub channel_account_id: String,
    pub recipient_identifier: String,
    pub binding: TemplateBinding,
}

pub struct OrchestratorBuilder {
    registry: Arc<SequenceRegistry>,
    backend: Arc<dyn PersistenceBackend>,
    channel: Arc<dyn ChannelClient>,
    renderer: Arc<dyn MessageRenderer>,
    classifier: Arc<dyn ReplyClassifier>,
    clock: Arc<dyn Clock>,
    jitter: JitterGenerator,
    retry: RetryPolicy,
    rate_limiter: AccountRateLimiter,
    status_sink: Arc<dyn StatusSink>,
}

impl OrchestratorBuilder {
    pub fn classifier(mut self, classifier: Arc<dyn ReplyClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn jitter(mut self, jitter: JitterGenerator) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn rate_limiter(mut self, rate_limiter: AccountRateLimiter) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    /// Attach a sink for prospect status reports.
    pub fn status_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.status_sink = sink;
        self
    }

    pub fn build(self) -> Orchestrator {
        let store = StateStore::new(self.backend);
        Orchestrator {
            registry: self.registry,
            gate: GateEvaluator::new(self.channel.clone(), self.classifier),
            executor: StepExecutor::new(
                self.channel,
                self.renderer,
                store.clone(),
                self.clock.clone(),
                self.retry,
            ),
            store,
            jitter: self.jitter,
            rate_limiter: self.rate_limiter,
            clock: self.clock,
            status_sink: self.status_sink,
        }
    }
}

/// Drives prospect sequences: enrollment, the wait/gate/send loop, and
/// cancellation. Every status change is exactly one versioned write.
pub struct Orchestrator {
    registry: Arc<SequenceRegistry>,
    store: StateStore,
    gate: GateEvaluator,
    executor: StepExecutor,
    jitter: JitterGenerator,
    rate_limiter: AccountRateLimiter,
    clock: Arc<dyn Clock>,
    status_sink: Arc<dyn StatusSink>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("sequences", &self.registry.len())
            .finish()
    }
}

impl Orchestrator {
    pub fn builder(
        registry: Arc<SequenceRegistry>,
        backend: Arc<dyn PersistenceBackend>,
        channel: Arc<dyn ChannelClient>,
        renderer: Arc<dyn MessageRenderer>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            registry,
            backend,
            channel,
            renderer,
            classifier: Arc::new(PlainReplyClassifier),
            clock: Arc::new(SystemClock),
            jitter: JitterGenerator::new(&SendWindowConfig::default()),
            retry: RetryPolicy::default(),
            rate_limiter: AccountRateLimiter::new(&RateLimitConfig::default()),
            status_sink: noop_sink(),
        }
    }

    pub fn registry(&self) -> &SequenceRegistry {
        &self.registry
    }

    /// Creates a `pending` state at step 0 with a freshly chosen send window.
    pub async fn enroll(&self, request: EnrollRequest) -> Result<ProspectSequenceState, EngineError> {
        if self.registry.get(&request.campaign_id).is_none() {
            return Err(EngineError::UnknownCampaign(request.campaign_id));
        }

        let now = self.clock.now();
        let send_window = self.jitter.preferred_send_window();
        let state = ProspectSequenceState {
            prospect_id: request.prospect_id,
            campaign_id: request.campaign_id,
            channel_account_id: request.channel_account_id,
            recipient_identifier: request.recipient_identifier,
            binding: request.binding,
            current_step_index: 0,
            status: SequenceStatus::Pending,
            next_eligible_at: self.jitter.next_window_aligned(now, &send_window),
            last_sent_at: None,
            attempt_count: 0,
            step_started_at: None,
            idempotency_keys_used: Default::default(),
            send_window,
            last_error: None,
            enrolled_at: now,
            updated_at: now,
            version: 0,
        };

        let created = self.store.create(state).await?;
        info!(
            key = %created.key(),
            next_eligible_at = %created.next_eligible_at,
            window_start = created.send_window.start_hour,
            window_end = created.send_window.end_hour,
            "Enrolled prospect"
        );
        Ok(created)
    }

    pub async fn status(&self, key: &SequenceKey) -> Result<Option<ProspectSequenceState>, EngineError> {
        Ok(self.store.load(key).await?)
    }

    pub async fn due(&self, limit: usize) -> Result<Vec<SequenceKey>, EngineError> {
        Ok(self.store.list_due(self.clock.now(), limit).await?)
    }

    /// Advances one prospect as far as it can go right now.
    ///
    /// Safe to call at any time, any number of times: a state that is not
    /// due is left alone, a terminal state is reported as such, and a
    /// concurrent writer makes this call fail with a conflict rather than
    /// overwrite.
    pub async fn drive(&self, key: &SequenceKey) -> Result<DriveOutcome, EngineError> {
        let mut state = self.store.require(key).await?;

        loop {
            if state.is_terminal() {
                return Ok(DriveOutcome::Terminal(state.status));
            }

            let definition = self
                .registry
                .get(&state.campaign_id)
                .ok_or(EngineError::UnknownCampaign(state.campaign_id))?;
            let step = step_at(&definition, state.current_step_index)?;
            let now = self.clock.now();

            state = match state.status {
                SequenceStatus::Pending | SequenceStatus::Waiting | SequenceStatus::Sending
                    if now < state.next_eligible_at =>
                {
                    return Ok(DriveOutcome::NotDue {
                        next_eligible_at: state.next_eligible_at,
                    });
                }
                SequenceStatus::Pending => {
                    let mut next = state.clone();
                    next.status = SequenceStatus::Sending;
                    next.attempt_count = 0;
                    next.updated_at = now;
                    self.store.transition(&state, next).await?
                }
                SequenceStatus::Waiting => {
                    let mut next = state.clone();
                    next.status = SequenceStatus::GateChecking;
                    next.updated_at = now;
                    self.store.transition(&state, next).await?
                }
                SequenceStatus::GateChecking => self.run_gate(state, step).await?,
                SequenceStatus::Sending => match self.run_send(state, step, &definition).await? {
                    SendPhase::Advanced(next) => next,
                    SendPhase::Deferred(held) => {
                        return Ok(DriveOutcome::Deferred {
                            next_eligible_at: held.next_eligible_at,
                        });
                    }
                },
                _ => return Ok(DriveOutcome::Terminal(state.status)),
            };
        }
    }

    async fn run_gate(
        &self,
        state: ProspectSequenceState,
        step: &Step,
    ) -> Result<ProspectSequenceState, EngineError> {
        let result = self.gate.evaluate_gate(&state, step).await;
        metrics::counter!("sequencer.gate.outcome", "outcome" => result.label()).increment(1);

        let mut next = state.clone();
        next.updated_at = self.clock.now();
        next.status = match &result {
            GateResult::Proceed => SequenceStatus::Sending,
            GateResult::Inconclusive(reason) => {
                metrics::counter!("sequencer.gate.inconclusive").increment(1);
                warn!(
                    key = %state.key(),
                    step_id = %step.step_id,
                    reason = %reason,
                    "Gate inconclusive, proceeding with send"
                );
                next.last_error = Some(reason.clone());
                SequenceStatus::Sending
            }
            GateResult::StopReplied => SequenceStatus::StoppedReplied,
            GateResult::StopDisengaged => SequenceStatus::StoppedDisengaged,
            GateResult::StopNotConnected => SequenceStatus::StoppedNotConnected,
        };
        next.attempt_count = 0;

        let stored = self.store.transition(&state, next).await?;
        if stored.is_terminal() {
            info!(
                key = %stored.key(),
                step_id = %step.step_id,
                status = %stored.status,
                "Sequence stopped by gate"
            );
            self.report(&stored, Some(&step.step_id));
        }
        Ok(stored)
    }

    /// Sends the current step unless the send window is closed or a limit
    /// holds it back, in which case the state is rescheduled in `sending`.
    async fn run_send(
        &self,
        state: ProspectSequenceState,
        step: &Step,
        definition: &SequenceDefinition,
    ) -> Result<SendPhase, EngineError> {
        if state.sent_record(&step.step_id).is_none() {
            let now = self.clock.now();
            let opens = self.jitter.next_window_aligned(now, &state.send_window);
            if opens > now {
                let attempts = state.attempt_count;
                return self.defer(state, opens, attempts, "outside_send_window").await;
            }

            let day = now.with_timezone(&self.jitter.offset()).date_naive();
            if let Acquire::Deferred { reason, retry_after } =
                self.rate_limiter.acquire(&state.channel_account_id, day).await
            {
                let candidate = retry_after
                    .and_then(|wait| chrono::Duration::from_std(wait).ok())
                    .map(|wait| now + wait)
                    .unwrap_or_else(|| self.jitter.start_of_next_day(now));
                let resume = self.jitter.next_window_aligned(candidate, &state.send_window);
                let attempts = state.attempt_count;
                return self.defer(state, resume, attempts, reason).await;
            }
        }

        let Execution { state, result } = self.executor.execute(state, step).await?;
        let now = self.clock.now();
        let mut next = state.clone();
        next.updated_at = now;
        next.attempt_count = 0;

        match result {
            SendResult::Sent(record) | SendResult::AlreadySent(record) => {
                next.idempotency_keys_used
                    .insert(step.step_id.clone(), record.clone());
                next.last_sent_at = Some(record.sent_at);
                next.last_error = None;
                next.step_started_at = None;
                next.current_step_index += 1;

                match definition.step(next.current_step_index) {
                    Some(following) => {
                        let candidate =
                            record.sent_at + self.jitter.jitter(following.delay_min_hours, following.delay_max_hours);
                        next.next_eligible_at = self.jitter.next_window_aligned(candidate, &state.send_window);
                        next.status = SequenceStatus::Waiting;
                    }
                    None => next.status = SequenceStatus::Completed,
                }

                let stored = self.store.transition(&state, next).await?;
                metrics::counter!("sequencer.sends").increment(1);
                info!(
                    key = %stored.key(),
                    step_id = %step.step_id,
                    message_id = %record.message_id,
                    status = %stored.status,
                    next_eligible_at = %stored.next_eligible_at,
                    "Step recorded"
                );
                self.report(&stored, Some(&step.step_id));
                Ok(SendPhase::Advanced(stored))
            }
            SendResult::Throttled {
                reason,
                reset,
                attempt_count,
            } => {
                let candidate = match reset {
                    LimitReset::After(wait) => chrono::Duration::from_std(wait)
                        .map(|wait| now + wait)
                        .unwrap_or_else(|_| self.jitter.start_of_next_day(now)),
                    LimitReset::NextWeek => self.jitter.start_of_next_week(now),
                };
                let resume = self.jitter.next_window_aligned(candidate, &state.send_window);
                next.last_error = Some(reason);
                self.defer(next, resume, attempt_count, "provider_limit").await
            }
            SendResult::Failed { reason, permanent } => {
                next.status = SequenceStatus::Failed;
                next.last_error = Some(reason.clone());
                let stored = self.store.transition(&state, next).await?;
                error!(
                    key = %stored.key(),
                    step_id = %step.step_id,
                    permanent,
                    error = %reason,
                    "Sequence failed"
                );
                self.report(&stored, Some(&step.step_id));
                Ok(SendPhase::Advanced(stored))
            }
        }
    }

    /// `sending -> sending` with a later `next_eligible_at`. Deferral never
    /// spends an attempt; `attempt_count` is what the step has used so far.
    async fn defer(
        &self,
        state: ProspectSequenceState,
        next_eligible_at: DateTime<Utc>,
        attempt_count: u32,
        reason: &'static str,
    ) -> Result<SendPhase, EngineError> {
        let mut next = state.clone();
        next.next_eligible_at = next_eligible_at;
        next.attempt_count = attempt_count;
        if attempt_count == 0 {
            next.step_started_at = None;
        }
        next.updated_at = self.clock.now();

        let stored = self.store.transition(&state, next).await?;
        metrics::counter!("sequencer.send_deferred", "reason" => reason).increment(1);
        info!(
            key = %stored.key(),
            account_id = %stored.channel_account_id,
            reason,
            next_eligible_at = %stored.next_eligible_at,
            "Send deferred"
        );
        Ok(SendPhase::Deferred(stored))
    }

    /// Moves a live sequence to `stopped_cancelled`; a terminal one is
    /// returned unchanged.
    pub async fn cancel(&self, key: &SequenceKey) -> Result<ProspectSequenceState, EngineError> {
        let mut attempts = 0;
        loop {
            let state = self.store.require(key).await?;
            if state.is_terminal() {
                return Ok(state);
            }

            let mut next = state.clone();
            next.status = SequenceStatus::StoppedCancelled;
            next.updated_at = self.clock.now();
            match self.store.transition(&state, next).await {
                Ok(stored) => {
                    info!(key = %key, from = %state.status, "Sequence cancelled");
                    self.report(&stored, None);
                    return Ok(stored);
                }
                Err(StoreError::Conflict { .. }) if attempts + 1 < CANCEL_ATTEMPTS => attempts += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Cancels every live sequence in a campaign. Returns how many moved.
    pub async fn cancel_campaign(&self, campaign_id: Uuid) -> Result<usize, EngineError> {
        let mut cancelled = 0;
        for key in self.store.list_campaign(campaign_id).await? {
            let before = self.store.require(&key).await?;
            if before.is_terminal() {
                continue;
            }
            if self.cancel(&key).await?.status == SequenceStatus::StoppedCancelled {
                cancelled += 1;
            }
        }
        info!(campaign_id = %campaign_id, cancelled, "Campaign cancelled");
        Ok(cancelled)
    }

    fn report(&self, state: &ProspectSequenceState, step_id: Option<&str>) {
        self.status_sink
            .emit(make_report(state, step_id, self.clock.now()));
    }
}

fn step_at(definition: &SequenceDefinition, index: usize) -> Result<&Step, EngineError> {
    definition.step(index).ok_or(EngineError::StepOutOfRange {
        campaign_id: definition.campaign_id(),
        index,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use outreach_channels::SimulatedChannel;
    use outreach_core::channels::ChannelError;
    use outreach_core::event_bus::{capture_sink, CaptureSink};
    use outreach_core::templates::TemplateRenderer;
    use outreach_store::InMemoryBackend;

    use super::*;
    use crate::clock::ManualClock;

    struct Fixture {
        orchestrator: Orchestrator,
        channel: Arc<SimulatedChannel>,
        clock: Arc<ManualClock>,
        sink: Arc<CaptureSink>,
        campaign_id: Uuid,
    }

    fn fixture() -> Fixture {
        let campaign_id = Uuid::new_v4();
        let registry = Arc::new(SequenceRegistry::new());
        registry
            .register(
                SequenceDefinition::new(
                    campaign_id,
                    vec![
                        Step::initial("cr", "cr"),
                        Step::follow_up("fu1", "fu1", 48, 72),
                    ],
                )
                .unwrap(),
            )
            .unwrap();

        let mut renderer = TemplateRenderer::new();
        renderer.register_template("cr", "Hi {first_name}");
        renderer.register_template("fu1", "Following up, {first_name}");

        let channel = Arc::new(SimulatedChannel::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let sink = capture_sink();
        let orchestrator = Orchestrator::builder(
            registry,
            Arc::new(InMemoryBackend::new()),
            channel.clone(),
            Arc::new(renderer),
        )
        .clock(clock.clone())
        .jitter(JitterGenerator::unrestricted())
        .rate_limiter(AccountRateLimiter::unlimited())
        .status_sink(sink.clone())
        .build();

        Fixture {
            orchestrator,
            channel,
            clock,
            sink,
            campaign_id,
        }
    }

    fn request(campaign_id: Uuid) -> EnrollRequest {
        EnrollRequest {
            campaign_id,
            prospect_id: Uuid::new_v4(),
            channel_account_id: "acct".into(),
            recipient_identifier: "ada".into(),
            binding: TemplateBinding {
                first_name: "Ada".into(),
                ..TemplateBinding::default()
            },
        }
    }

    #[tokio::test]
    async fn test_enroll_creates_pending_state() {
        let f = fixture();
        let state = f.orchestrator.enroll(request(f.campaign_id)).await.unwrap();
        assert_eq!(state.status, SequenceStatus::Pending);
        assert_eq!(state.current_step_index, 0);
        assert_eq!(state.version, 1);
        assert_eq!(state.next_eligible_at, f.clock.now());
    }

    #[tokio::test]
    async fn test_double_enroll_is_rejected() {
        let f = fixture();
        let req = request(f.campaign_id);
        f.orchestrator.enroll(req.clone()).await.unwrap();
        assert!(matches!(
            f.orchestrator.enroll(req).await,
            Err(EngineError::Store(StoreError::AlreadyExists(_)))
        ));
    }

    #[tokio::test]
    async fn test_unknown_campaign_is_rejected() {
        let f = fixture();
        assert!(matches!(
            f.orchestrator.enroll(request(Uuid::new_v4())).await,
            Err(EngineError::UnknownCampaign(_))
        ));
    }

    #[tokio::test]
    async fn test_drive_sends_first_step_and_waits() {
        let f = fixture();
        let state = f.orchestrator.enroll(request(f.campaign_id)).await.unwrap();
        let outcome = f.orchestrator.drive(&state.key()).await.unwrap();

        let stored = f.orchestrator.status(&state.key()).await.unwrap().unwrap();
        assert_eq!(stored.status, SequenceStatus::Waiting);
        assert_eq!(stored.current_step_index, 1);
        assert!(stored.sent_record("cr").is_some());
        assert!(stored.next_eligible_at > f.clock.now() + Duration::hours(48));
        assert_eq!(
            outcome,
            DriveOutcome::NotDue {
                next_eligible_at: stored.next_eligible_at
            }
        );
        assert_eq!(f.channel.deliveries_to("ada").len(), 1);
        assert_eq!(f.sink.count_status(SequenceStatus::Waiting), 1);
    }

    #[tokio::test]
    async fn test_drive_before_due_does_nothing() {
        let f = fixture();
        let state = f.orchestrator.enroll(request(f.campaign_id)).await.unwrap();
        f.orchestrator.drive(&state.key()).await.unwrap();
        let before = f.orchestrator.status(&state.key()).await.unwrap().unwrap();

        f.clock.advance(Duration::hours(24));
        f.orchestrator.drive(&state.key()).await.unwrap();
        let after = f.orchestrator.status(&state.key()).await.unwrap().unwrap();
        assert_eq!(before, after);
        assert_eq!(f.channel.send_attempts(), 1);
    }

    #[tokio::test]
    async fn test_completes_after_final_step() {
        let f = fixture();
        let state = f.orchestrator.enroll(request(f.campaign_id)).await.unwrap();
        f.orchestrator.drive(&state.key()).await.unwrap();
        f.clock.advance(Duration::hours(74));

        let outcome = f.orchestrator.drive(&state.key()).await.unwrap();
        assert_eq!(outcome, DriveOutcome::Terminal(SequenceStatus::Completed));
        assert_eq!(f.channel.deliveries_to("ada").len(), 2);
        assert_eq!(f.sink.count_status(SequenceStatus::Completed), 1);
    }

    #[tokio::test]
    async fn test_cancel_is_terminal_and_idempotent() {
        let f = fixture();
        let state = f.orchestrator.enroll(request(f.campaign_id)).await.unwrap();
        let cancelled = f.orchestrator.cancel(&state.key()).await.unwrap();
        assert_eq!(cancelled.status, SequenceStatus::StoppedCancelled);

        let again = f.orchestrator.cancel(&state.key()).await.unwrap();
        assert_eq!(again.version, cancelled.version);
        assert_eq!(
            f.orchestrator.drive(&state.key()).await.unwrap(),
            DriveOutcome::Terminal(SequenceStatus::StoppedCancelled)
        );
        assert_eq!(f.channel.send_attempts(), 0);
        assert_eq!(f.sink.count_status(SequenceStatus::StoppedCancelled), 1);
    }

    #[tokio::test]
    async fn test_cancel_campaign_skips_terminal_states() {
        let f = fixture();
        let first = f.orchestrator.enroll(request(f.campaign_id)).await.unwrap();
        f.orchestrator.enroll(request(f.campaign_id)).await.unwrap();
        f.orchestrator.cancel(&first.key()).await.unwrap();

        let moved = f.orchestrator.cancel_campaign(f.campaign_id).await.unwrap();
        assert_eq!(moved, 1);
        assert!(f.orchestrator.due(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_provider_limit_reschedules_without_spending_attempts() {
        let f = fixture();
        f.channel.fail_next_sends(
            ChannelError::RateLimited {
                reason: "429".into(),
                reset: LimitReset::After(std::time::Duration::from_secs(1800)),
            },
            1,
        );
        let state = f.orchestrator.enroll(request(f.campaign_id)).await.unwrap();

        let resume = f.clock.now() + Duration::minutes(30);
        let outcome = f.orchestrator.drive(&state.key()).await.unwrap();
        assert_eq!(outcome, DriveOutcome::Deferred { next_eligible_at: resume });
        let held = f.orchestrator.status(&state.key()).await.unwrap().unwrap();
        assert_eq!(held.status, SequenceStatus::Sending);
        assert_eq!(held.attempt_count, 0);
        assert!(f.orchestrator.due(10).await.unwrap().is_empty());

        f.clock.advance(Duration::minutes(10));
        assert_eq!(
            f.orchestrator.drive(&state.key()).await.unwrap(),
            DriveOutcome::NotDue { next_eligible_at: resume }
        );
        assert_eq!(f.channel.send_attempts(), 1);

        f.clock.advance(Duration::minutes(20));
        f.orchestrator.drive(&state.key()).await.unwrap();
        let sent = f.orchestrator.status(&state.key()).await.unwrap().unwrap();
        assert_eq!(sent.status, SequenceStatus::Waiting);
        assert_eq!(sent.current_step_index, 1);
        assert_eq!(f.channel.deliveries_to("ada").len(), 1);
    }
}
