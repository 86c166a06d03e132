//! Process-local token bucket.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::clock::Clock;
use crate::config::RateLimitConfig;
use crate::observability::metrics;
use crate::rate_limit::bucket::BucketState;
use crate::rate_limit::{secs_to_duration, AcquireCounters, LimiterStats, RateLimiter, DEADLINE_SLACK};

/// A token bucket owned by one process.
#[derive(Debug)]
pub struct TokenBucketLimiter {
    name: String,
    bucket: Mutex<BucketState>,
    clock: Arc<dyn Clock>,
    default_pause: f64,
    max_pause: f64,
    counters: AcquireCounters,
}

impl TokenBucketLimiter {
    pub fn new(name: impl Into<String>, rate: f64, burst: u32, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            name: name.into(),
            bucket: Mutex::new(BucketState::new(rate, burst as f64, now)),
            clock,
            default_pause: 1.0,
            max_pause: 3_600.0,
            counters: AcquireCounters::default(),
        }
    }

    pub fn from_config(name: impl Into<String>, config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        let mut limiter = Self::new(name, config.requests_per_second, config.burst_size, clock);
        limiter.default_pause = config.default_pause_secs;
        limiter.max_pause = config.max_pause_secs;
        limiter
    }

    /// Current bucket contents, refilled to now.
    pub fn snapshot(&self) -> BucketState {
        let mut bucket = self.bucket.lock().expect("token bucket mutex poisoned");
        bucket.refill(self.clock.now());
        bucket.clone()
    }
}

#[async_trait]
impl RateLimiter for TokenBucketLimiter {
    async fn acquire(&self, timeout: Duration) -> bool {
        let start = self.clock.now();
        let deadline = start + timeout.as_secs_f64();

        loop {
            let now = self.clock.now();
            let outcome = {
                let mut bucket = self.bucket.lock().expect("token bucket mutex poisoned");
                bucket.try_take(now)
            };

            match outcome {
                Ok(()) => {
                    let waited = now - start;
                    self.counters.record(true, waited);
                    if waited > 0.0 {
                        metrics::record_limiter_wait(&self.name, waited);
                    }
                    return true;
                }
                Err(wait) => {
                    if now + wait > deadline + DEADLINE_SLACK {
                        tracing::debug!(limiter = %self.name, wait_secs = wait, "Acquire would exceed timeout");
                        self.counters.record(false, now - start);
                        return false;
                    }
                    self.clock.sleep(secs_to_duration(wait)).await;
                }
            }
        }
    }

    async fn notify_rate_limit(&self, retry_after: Option<f64>, reset_time: Option<f64>) {
        let now = self.clock.now();
        let update = {
            let mut bucket = self.bucket.lock().expect("token bucket mutex poisoned");
            bucket.apply_pause(now, retry_after, reset_time, self.default_pause, self.max_pause)
        };
        metrics::record_rate_limit_hit(&self.name);
        tracing::warn!(
            limiter = %self.name,
            retry_after = ?retry_after,
            reset_time = ?reset_time,
            paused_for_secs = update.paused_until - now,
            source = ?update.source,
            extended = update.changed,
            "Upstream throttling, pausing requests"
        );
    }

    async fn stats(&self) -> LimiterStats {
        let bucket = self.snapshot();
        let mut stats = LimiterStats {
            name: self.name.clone(),
            rate: bucket.rate,
            burst: bucket.burst,
            tokens: bucket.tokens,
            paused_until: bucket.paused_until,
            pause_source: bucket.pause_source,
            rate_limit_hits: bucket.rate_limit_hits,
            ..Default::default()
        };
        self.counters.fill(&mut stats);
        stats
    }
}
