//! Periodic due-state sweep feeding a bounded worker pool.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use outreach_core::config::SweepConfig;
use outreach_core::types::SequenceKey;
use outreach_store::StoreError;

use crate::engine::{DriveOutcome, EngineError, Orchestrator};

pub struct Sweeper {
    orchestrator: Arc<Orchestrator>,
    interval: Duration,
    batch_size: usize,
    drain_timeout: Duration,
    permits: Arc<Semaphore>,
    in_flight: Arc<DashSet<SequenceKey>>,
}

impl Sweeper {
    pub fn new(orchestrator: Arc<Orchestrator>, config: &SweepConfig) -> Self {
        Self {
            orchestrator,
            interval: Duration::from_millis(config.interval_ms.max(1)),
            batch_size: config.batch_size.max(1),
            drain_timeout: Duration::from_millis(config.drain_timeout_ms),
            permits: Arc::new(Semaphore::new(config.workers.max(1))),
            in_flight: Arc::new(DashSet::new()),
        }
    }

    /// Dispatches every due key not already being driven onto `workers`.
    /// Returns how many were dispatched.
    pub async fn sweep_once(&self, workers: &mut JoinSet<()>) -> Result<usize, EngineError> {
        let due = self.orchestrator.due(self.batch_size).await?;
        let mut dispatched = 0;

        for key in due {
            if !self.in_flight.insert(key) {
                continue;
            }
            let orchestrator = self.orchestrator.clone();
            let permits = self.permits.clone();
            let in_flight = self.in_flight.clone();

            dispatched += 1;
            workers.spawn(async move {
                if let Ok(_permit) = permits.acquire_owned().await {
                    match orchestrator.drive(&key).await {
                        Ok(DriveOutcome::Terminal(status)) => {
                            debug!(key = %key, status = %status, "Sequence finished");
                        }
                        Ok(outcome) => debug!(key = %key, ?outcome, "Sequence driven"),
                        Err(EngineError::Store(StoreError::Conflict { .. })) => {
                            debug!(key = %key, "Lost write race, will re-evaluate next sweep");
                        }
                        Err(e) => error!(key = %key, error = %e, "Failed to drive sequence"),
                    }
                }
                in_flight.remove(&key);
            });
        }

        if dispatched > 0 {
            metrics::counter!("sequencer.sweep.dispatched").increment(dispatched as u64);
        }
        Ok(dispatched)
    }

    /// Sweeps on a fixed interval until `shutdown` flips to `true`, then
    /// waits up to the drain timeout for in-flight drives before returning.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            batch_size = self.batch_size,
            "Sweeper started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut workers = JoinSet::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once(&mut workers).await {
                        warn!(error = %e, "Sweep failed, retrying next tick");
                    }
                }
                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Sweep worker panicked");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if !workers.is_empty() {
            info!(in_flight = workers.len(), "Waiting for in-flight sequences");
            let drained = tokio::time::timeout(self.drain_timeout, async {
                while workers.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                warn!(
                    abandoned = workers.len(),
                    drain_timeout_ms = self.drain_timeout.as_millis() as u64,
                    "In-flight sequences did not finish before shutdown"
                );
                workers.abort_all();
            }
        }
        info!("Sweeper stopped");
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration as ChronoDuration, Utc};
    use uuid::Uuid;

    use outreach_channels::SimulatedChannel;
    use outreach_core::channels::ChannelError;
    use outreach_core::templates::TemplateRenderer;
    use outreach_core::types::{SequenceStatus, TemplateBinding};
    use outreach_store::InMemoryBackend;

    use super::*;
    use crate::clock::ManualClock;
    use crate::engine::EnrollRequest;
    use crate::jitter::JitterGenerator;
    use crate::rate_limit::AccountRateLimiter;
    use crate::types::{SequenceDefinition, SequenceRegistry, Step};

    fn setup() -> (Arc<Orchestrator>, Arc<SimulatedChannel>, Arc<ManualClock>, Uuid) {
        let campaign_id = Uuid::new_v4();
        let registry = Arc::new(SequenceRegistry::new());
        registry
            .register(
                SequenceDefinition::new(
                    campaign_id,
                    vec![
                        Step::initial("cr", "cr"),
                        Step::follow_up("fu1", "cr", 24, 24),
                    ],
                )
                .unwrap(),
            )
            .unwrap();
        let mut renderer = TemplateRenderer::new();
        renderer.register_template("cr", "Hello {first_name}");
        let channel = Arc::new(SimulatedChannel::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let orchestrator = Orchestrator::builder(
            registry,
            Arc::new(InMemoryBackend::new()),
            channel.clone(),
            Arc::new(renderer),
        )
        .clock(clock.clone())
        .jitter(JitterGenerator::unrestricted())
        .rate_limiter(AccountRateLimiter::unlimited())
        .build();
        (Arc::new(orchestrator), channel, clock, campaign_id)
    }

    async fn enroll(orchestrator: &Orchestrator, campaign_id: Uuid, recipient: &str) -> SequenceKey {
        orchestrator
            .enroll(EnrollRequest {
                campaign_id,
                prospect_id: Uuid::new_v4(),
                channel_account_id: "acct".into(),
                recipient_identifier: recipient.into(),
                binding: TemplateBinding {
                    first_name: recipient.into(),
                    ..TemplateBinding::default()
                },
            })
            .await
            .unwrap()
            .key()
    }

    async fn sweep_and_wait(sweeper: &Sweeper) -> usize {
        let mut workers = JoinSet::new();
        let dispatched = sweeper.sweep_once(&mut workers).await.unwrap();
        while let Some(joined) = workers.join_next().await {
            joined.unwrap();
        }
        dispatched
    }

    #[tokio::test]
    async fn test_sweep_drives_every_due_prospect() {
        let (orchestrator, channel, clock, campaign_id) = setup();
        let sweeper = Sweeper::new(orchestrator.clone(), &SweepConfig::default());
        for name in ["ada", "grace", "linus"] {
            enroll(&orchestrator, campaign_id, name).await;
        }

        assert_eq!(sweep_and_wait(&sweeper).await, 3);
        assert_eq!(channel.deliveries().len(), 3);
        assert_eq!(sweeper.in_flight(), 0);

        // nothing due until the follow-up delay passes
        assert_eq!(sweep_and_wait(&sweeper).await, 0);

        clock.advance(ChronoDuration::hours(26));
        assert_eq!(sweep_and_wait(&sweeper).await, 3);
        assert_eq!(channel.deliveries().len(), 6);
        assert!(orchestrator.due(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (orchestrator, channel, _clock, campaign_id) = setup();
        let key = enroll(&orchestrator, campaign_id, "ada").await;
        let sweeper = Sweeper::new(
            orchestrator.clone(),
            &SweepConfig {
                interval_ms: 10,
                ..SweepConfig::default()
            },
        );
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(sweeper.run(rx));

        for _ in 0..100 {
            let state = orchestrator.status(&key).await.unwrap().unwrap();
            if state.status == SequenceStatus::Waiting {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tx.send(true).unwrap();
        task.await.unwrap();
        assert_eq!(channel.deliveries_to("ada").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_in_flight_drive() {
        let (orchestrator, channel, _clock, campaign_id) = setup();
        channel.fail_next_sends(ChannelError::TransientSend("503".into()), 1);
        let key = enroll(&orchestrator, campaign_id, "ada").await;
        let sweeper = Sweeper::new(
            orchestrator.clone(),
            &SweepConfig {
                interval_ms: 10,
                ..SweepConfig::default()
            },
        );
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(sweeper.run(rx));

        // the worker is now sleeping out its retry backoff
        for _ in 0..1000 {
            if channel.send_attempts() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(channel.send_attempts(), 1);
        tx.send(true).unwrap();
        task.await.unwrap();

        let state = orchestrator.status(&key).await.unwrap().unwrap();
        assert_eq!(state.status, SequenceStatus::Waiting);
        assert_eq!(channel.send_attempts(), 2);
        assert_eq!(channel.deliveries_to("ada").len(), 1);
    }
}
