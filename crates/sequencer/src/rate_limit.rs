//! Per-sender-account send throttling: a token bucket for pacing plus a
//! daily cap.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;

use outreach_core::config::RateLimitConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Granted,
    /// No token within the wait budget, or the daily cap is spent.
    /// `retry_after` is the refill wait for a token; `None` means the
    /// daily cap, which resets at the next local day.
    Deferred {
        reason: &'static str,
        retry_after: Option<Duration>,
    },
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
    day: Option<NaiveDate>,
    sent_today: u32,
}

#[derive(Debug)]
pub struct AccountRateLimiter {
    tokens_per_sec: f64,
    burst: f64,
    daily_limit: u32,
    max_wait: Duration,
    buckets: DashMap<String, Arc<Mutex<Bucket>>>,
}

impl AccountRateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            tokens_per_sec: f64::from(config.per_hour) / 3600.0,
            burst: f64::from(config.burst.max(1)),
            daily_limit: config.daily_limit,
            max_wait: Duration::from_millis(config.max_wait_ms),
            buckets: DashMap::new(),
        }
    }

    /// Never throttles.
    pub fn unlimited() -> Self {
        Self::new(&RateLimitConfig {
            per_hour: 0,
            burst: 1,
            daily_limit: 0,
            max_wait_ms: 0,
        })
    }

    /// Takes one send slot for `account_id` on local day `day`, waiting up to
    /// the configured budget for the bucket to refill.
    pub async fn acquire(&self, account_id: &str, day: NaiveDate) -> Acquire {
        let bucket = self
            .buckets
            .entry(account_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(Bucket {
                    tokens: self.burst,
                    last_refill: Instant::now(),
                    day: None,
                    sent_today: 0,
                }))
            })
            .clone();
        let deadline = Instant::now() + self.max_wait;

        loop {
            let wait = {
                let mut b = bucket.lock();
                if b.day != Some(day) {
                    b.day = Some(day);
                    b.sent_today = 0;
                }
                if self.daily_limit > 0 && b.sent_today >= self.daily_limit {
                    return Acquire::Deferred {
                        reason: "daily_limit",
                        retry_after: None,
                    };
                }
                if self.tokens_per_sec <= 0.0 {
                    b.sent_today += 1;
                    return Acquire::Granted;
                }

                let now = Instant::now();
                let elapsed = now.duration_since(b.last_refill).as_secs_f64();
                b.tokens = (b.tokens + elapsed * self.tokens_per_sec).min(self.burst);
                b.last_refill = now;

                if b.tokens >= 1.0 {
                    b.tokens -= 1.0;
                    b.sent_today += 1;
                    return Acquire::Granted;
                }
                Duration::from_secs_f64((1.0 - b.tokens) / self.tokens_per_sec)
            };

            if Instant::now() + wait > deadline {
                return Acquire::Deferred {
                    reason: "rate",
                    retry_after: Some(wait),
                };
            }
            tokio::time::sleep(wait).await;
        }
    }

    pub fn sent_today(&self, account_id: &str) -> u32 {
        self.buckets
            .get(account_id)
            .map(|b| b.lock().sent_today)
            .unwrap_or(0)
    }
}
