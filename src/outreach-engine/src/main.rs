//! Outreach Engine: durable per-prospect outreach sequencing.
//!
//! Loads configuration and sequence definitions, wires the Redis state store
//! and the messaging API client, then sweeps due prospects until shutdown.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use outreach_channels::{HttpChannelClient, KeywordReplyClassifier, WebhookStatusSink};
use outreach_core::config::AppConfig;
use outreach_core::event_bus::{noop_sink, StatusSink};
use outreach_core::templates::TemplateRenderer;
use outreach_sequencer::{
    AccountRateLimiter, JitterGenerator, Orchestrator, RetryPolicy, SequenceDefinition,
    SequenceRegistry, Sweeper,
};
use outreach_store::RedisBackend;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "outreach-engine")]
#[command(about = "Durable multi-step outreach sequencing engine")]
#[command(version)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, env = "OUTREACH_CONFIG")]
    config: Option<String>,

    /// Node identifier (overrides config)
    #[arg(long, env = "OUTREACH__NODE_ID")]
    node_id: Option<String>,

    /// Concurrent prospect workers (overrides config)
    #[arg(long, env = "OUTREACH__SWEEP__WORKERS")]
    workers: Option<usize>,

    /// Milliseconds between due-state sweeps (overrides config)
    #[arg(long, env = "OUTREACH__SWEEP__INTERVAL_MS")]
    sweep_interval_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "outreach_engine=info,outreach_sequencer=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Outreach Engine starting up");

    let mut config = match cli.config.as_deref() {
        Some(path) => AppConfig::load(Some(path)).with_context(|| format!("loading config from {path}"))?,
        None => AppConfig::load(None).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load config, using defaults");
            AppConfig::default()
        }),
    };

    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(workers) = cli.workers {
        config.sweep.workers = workers;
    }
    if let Some(interval) = cli.sweep_interval_ms {
        config.sweep.interval_ms = interval;
    }

    info!(
        node_id = %config.node_id,
        workers = config.sweep.workers,
        sweep_interval_ms = config.sweep.interval_ms,
        drain_timeout_ms = config.sweep.drain_timeout_ms,
        sequences = config.sequences.len(),
        templates = config.templates.len(),
        "Configuration loaded"
    );

    let registry = Arc::new(SequenceRegistry::new());
    for sequence in &config.sequences {
        let definition = SequenceDefinition::try_from(sequence)
            .with_context(|| format!("invalid sequence for campaign {}", sequence.campaign_id))?;
        registry.register(definition)?;
    }
    if registry.is_empty() {
        warn!("No sequences configured; only already-enrolled prospects will be driven");
    }

    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(SocketAddr::new(
            Ipv4Addr::UNSPECIFIED.into(),
            config.metrics.port,
        ))
        .install()
        .context("starting metrics exporter")?;
    info!(port = config.metrics.port, "Metrics exporter started");

    let backend = Arc::new(
        RedisBackend::new(&config.redis)
            .await
            .context("connecting to Redis")?,
    );
    let channel = Arc::new(HttpChannelClient::new(&config.channel)?);
    let renderer = Arc::new(TemplateRenderer::from_map(config.templates.clone()));

    let mut webhook_task = None;
    let status_sink: Arc<dyn StatusSink> = match config.webhook.url.clone() {
        Some(url) => {
            let (sink, handle) = WebhookStatusSink::spawn(url, &config.webhook)?;
            webhook_task = Some(handle);
            Arc::new(sink)
        }
        None => noop_sink(),
    };

    let orchestrator = Arc::new(
        Orchestrator::builder(registry, backend, channel, renderer)
            .classifier(Arc::new(KeywordReplyClassifier::new()))
            .jitter(JitterGenerator::new(&config.send_window))
            .retry_policy(RetryPolicy::from_config(&config.retry))
            .rate_limiter(AccountRateLimiter::new(&config.rate_limit))
            .status_sink(status_sink)
            .build(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = Sweeper::new(orchestrator.clone(), &config.sweep);
    let sweep_task = tokio::spawn(sweeper.run(shutdown_rx));

    info!("Outreach Engine is running");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown signal received");

    // The sweeper returns only after its in-flight drives finish or the
    // drain timeout passes, so no drive outlives the orchestrator.
    let _ = shutdown_tx.send(true);
    if let Err(e) = sweep_task.await {
        error!(error = %e, "Sweeper task ended abnormally");
    }

    // Sinks drop with the orchestrator; give queued status reports a moment.
    drop(orchestrator);
    if let Some(handle) = webhook_task {
        if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
            warn!("Status webhook queue did not drain before shutdown");
        }
    }

    info!("Outreach Engine stopped");
    Ok(())
}
