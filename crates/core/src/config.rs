use std::collections::HashMap;

use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::OutreachResult;

/// Root application configuration. Loaded from an optional TOML file and
/// environment variables with the prefix `OUTREACH__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub send_window: SendWindowConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub templates: HashMap<String, String>,
    #[serde(default)]
    pub sequences: Vec<SequenceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

/// Credentials for the messaging network, handed to the channel client at
/// construction.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    #[serde(default = "default_channel_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_channel_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    #[serde(default = "default_sweep_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_sweep_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_sweep_workers")]
    pub workers: usize,
    /// How long shutdown waits for in-flight drives to finish.
    #[serde(default = "default_sweep_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

/// Send retry policy for transient channel failures.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub factor: u32,
}

/// Per sending account limits, shared by every prospect on that account.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_per_hour")]
    pub per_hour: u32,
    #[serde(default = "default_burst")]
    pub burst: u32,
    #[serde(default = "default_daily_limit")]
    pub daily_limit: u32,
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendWindowConfig {
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
    #[serde(default = "default_start_hour")]
    pub start_hour: u32,
    #[serde(default = "default_end_hour")]
    pub end_hour: u32,
    /// How far each prospect's window may shrink from either edge.
    #[serde(default = "default_spread_hours")]
    pub spread_hours: u32,
    #[serde(default = "default_weekdays_only")]
    pub weekdays_only: bool,
    #[serde(default)]
    pub holidays: Vec<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_webhook_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_webhook_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_webhook_timeout_ms")]
    pub timeout_ms: u64,
    /// Reports held for delivery; beyond this, new reports are dropped.
    #[serde(default = "default_webhook_queue_capacity")]
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// A campaign's sequence as written in configuration. Validated into a
/// `SequenceDefinition` before the engine accepts it.
#[derive(Debug, Clone, Deserialize)]
pub struct SequenceConfig {
    pub campaign_id: Uuid,
    pub steps: Vec<StepConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StepConfig {
    pub step_id: String,
    pub message_key: String,
    #[serde(default)]
    pub delay_min_hours: u32,
    #[serde(default)]
    pub delay_max_hours: u32,
    #[serde(default)]
    pub check_reply: bool,
    #[serde(default)]
    pub check_connection_accepted: bool,
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}
fn default_key_prefix() -> String {
    "outreach".to_string()
}
fn default_channel_base_url() -> String {
    "http://localhost:8700".to_string()
}
fn default_channel_timeout_ms() -> u64 {
    10_000
}
fn default_sweep_interval_ms() -> u64 {
    15_000
}
fn default_sweep_batch_size() -> usize {
    200
}
fn default_sweep_workers() -> usize {
    16
}
fn default_sweep_drain_timeout_ms() -> u64 {
    10_000
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    2_000
}
fn default_backoff_factor() -> u32 {
    2
}
fn default_per_hour() -> u32 {
    6
}
fn default_burst() -> u32 {
    2
}
fn default_daily_limit() -> u32 {
    15
}
fn default_max_wait_ms() -> u64 {
    30_000
}
fn default_utc_offset_minutes() -> i32 {
    -480
}
fn default_start_hour() -> u32 {
    5
}
fn default_end_hour() -> u32 {
    18
}
fn default_spread_hours() -> u32 {
    2
}
fn default_weekdays_only() -> bool {
    true
}
fn default_webhook_max_retries() -> u32 {
    5
}
fn default_webhook_initial_delay_ms() -> u64 {
    500
}
fn default_webhook_timeout_ms() -> u64 {
    5_000
}
fn default_webhook_queue_capacity() -> usize {
    1024
}
fn default_metrics_port() -> u16 {
    9091
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            base_url: default_channel_base_url(),
            api_key: String::new(),
            timeout_ms: default_channel_timeout_ms(),
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_sweep_interval_ms(),
            batch_size: default_sweep_batch_size(),
            workers: default_sweep_workers(),
            drain_timeout_ms: default_sweep_drain_timeout_ms(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            factor: default_backoff_factor(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_hour: default_per_hour(),
            burst: default_burst(),
            daily_limit: default_daily_limit(),
            max_wait_ms: default_max_wait_ms(),
        }
    }
}

impl Default for SendWindowConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: default_utc_offset_minutes(),
            start_hour: default_start_hour(),
            end_hour: default_end_hour(),
            spread_hours: default_spread_hours(),
            weekdays_only: default_weekdays_only(),
            holidays: Vec::new(),
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_retries: default_webhook_max_retries(),
            initial_delay_ms: default_webhook_initial_delay_ms(),
            timeout_ms: default_webhook_timeout_ms(),
            queue_capacity: default_webhook_queue_capacity(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            redis: RedisConfig::default(),
            channel: ChannelConfig::default(),
            sweep: SweepConfig::default(),
            retry: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            send_window: SendWindowConfig::default(),
            webhook: WebhookConfig::default(),
            metrics: MetricsConfig::default(),
            templates: HashMap::new(),
            sequences: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from an optional TOML file, then environment
    /// variables (`OUTREACH__SWEEP__WORKERS=32`), later sources winning.
    pub fn load(path: Option<&str>) -> OutreachResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("OUTREACH")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_send_policy() {
        let config = AppConfig::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 2_000);
        assert_eq!(config.retry.factor, 2);
        assert_eq!(config.rate_limit.daily_limit, 15);
        assert!(config.send_window.weekdays_only);
        assert!(config.webhook.url.is_none());
        assert_eq!(config.webhook.queue_capacity, 1024);
        assert_eq!(config.sweep.drain_timeout_ms, 10_000);
    }

    #[test]
    fn test_deserialize_sequence_section() {
        let raw = r#"{
            "sequences": [{
                "campaign_id": "6a1f5b8e-2d1c-4e07-9a57-1f2a3b4c5d6e",
                "steps": [
                    {"step_id": "cr", "message_key": "cr"},
                    {"step_id": "fu1", "message_key": "fu1",
                     "delay_min_hours": 48, "delay_max_hours": 72,
                     "check_reply": true, "check_connection_accepted": true}
                ]
            }],
            "send_window": {"holidays": ["2025-12-25"]}
        }"#;
        let config: AppConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.sequences.len(), 1);
        let steps = &config.sequences[0].steps;
        assert!(!steps[0].check_connection_accepted);
        assert_eq!(steps[1].delay_max_hours, 72);
        assert_eq!(config.send_window.holidays.len(), 1);
        assert_eq!(config.send_window.start_hour, 5);
    }
}
