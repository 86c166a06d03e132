//! Token bucket whose state lives in the [`StateStore`].
//!
//! Every `acquire`/`notify` is a read-modify-write of the
//! `bucket:{instance_key}` row. Writes go through `compare_and_put`; after
//! `cas_retries` conflicts the last computed state is written with a plain
//! `put`. Lost updates are acceptable here, lost pauses are rare and bounded.
//!
//! Store failures fail open: the request is admitted and a warning logged.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::config::RateLimitConfig;
use crate::observability::metrics;
use crate::rate_limit::bucket::BucketState;
use crate::rate_limit::{secs_to_duration, AcquireCounters, LimiterStats, RateLimiter, DEADLINE_SLACK};
use crate::store::{bucket_key, load_typed, StateStore, StoreError, StoreResult, BUCKET_NAMESPACE};

#[derive(Debug)]
pub struct SharedBucketLimiter {
    instance_key: String,
    store_key: String,
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    rate: f64,
    burst: f64,
    default_pause: f64,
    max_pause: f64,
    cas_retries: u32,
    /// Serializes this process's writers so they do not conflict with each other.
    local: Mutex<()>,
    counters: AcquireCounters,
}

impl SharedBucketLimiter {
    pub fn new(
        instance_key: impl Into<String>,
        store: Arc<dyn StateStore>,
        config: &RateLimitConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let instance_key = instance_key.into();
        Self {
            store_key: bucket_key(&instance_key),
            instance_key,
            store,
            clock,
            rate: config.requests_per_second,
            burst: config.burst_size as f64,
            default_pause: config.default_pause_secs,
            max_pause: config.max_pause_secs,
            cas_retries: config.shared_cas_retries,
            local: Mutex::new(()),
            counters: AcquireCounters::default(),
        }
    }

    pub fn instance_key(&self) -> &str {
        &self.instance_key
    }

    fn fresh_state(&self, now: f64) -> BucketState {
        let mut state = BucketState::new(self.rate, self.burst, now);
        state.instance_key = Some(self.instance_key.clone());
        state
    }

    /// Stored row, or a full bucket when none exists. Local rate and burst
    /// always win so a config change takes effect on the next write.
    async fn load(&self, now: f64) -> StoreResult<(BucketState, Option<u64>)> {
        match load_typed::<BucketState>(self.store.as_ref(), BUCKET_NAMESPACE, &self.store_key).await? {
            Some((mut state, version)) => {
                state.rate = self.rate;
                state.burst = self.burst;
                state.tokens = state.tokens.min(self.burst);
                state.instance_key = Some(self.instance_key.clone());
                Ok((state, Some(version)))
            }
            None => Ok((self.fresh_state(now), None)),
        }
    }

    async fn update<R, F>(&self, mut apply: F) -> StoreResult<(BucketState, R)>
    where
        F: FnMut(&mut BucketState, f64) -> R + Send,
        R: Send,
    {
        let _guard = self.local.lock().await;
        let mut attempt = 0;
        loop {
            let now = self.clock.now();
            let (mut state, version) = self.load(now).await?;
            let result = apply(&mut state, now);
            let value = serde_json::to_value(&state)?;

            match self
                .store
                .compare_and_put(BUCKET_NAMESPACE, &self.store_key, version, value.clone())
                .await
            {
                Ok(_) => return Ok((state, result)),
                Err(StoreError::VersionConflict { .. }) if attempt < self.cas_retries => {
                    attempt += 1;
                    tracing::debug!(instance = %self.instance_key, attempt, "Shared bucket write conflict, retrying");
                }
                Err(StoreError::VersionConflict { .. }) => {
                    tracing::debug!(instance = %self.instance_key, "Shared bucket still contended, last writer wins");
                    self.store.put(BUCKET_NAMESPACE, &self.store_key, value).await?;
                    return Ok((state, result));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl RateLimiter for SharedBucketLimiter {
    async fn acquire(&self, timeout: Duration) -> bool {
        let start = self.clock.now();
        let deadline = start + timeout.as_secs_f64();

        loop {
            let outcome = self.update(|state, now| state.try_take(now)).await;
            let now = self.clock.now();

            match outcome {
                Ok((_, Ok(()))) => {
                    let waited = now - start;
                    self.counters.record(true, waited);
                    if waited > 0.0 {
                        metrics::record_limiter_wait(&self.instance_key, waited);
                    }
                    return true;
                }
                Ok((_, Err(wait))) => {
                    if now + wait > deadline + DEADLINE_SLACK {
                        self.counters.record(false, now - start);
                        return false;
                    }
                    self.clock.sleep(secs_to_duration(wait)).await;
                }
                Err(e) => {
                    tracing::warn!(instance = %self.instance_key, error = %e, "Shared bucket unavailable, admitting request");
                    self.counters.record(true, now - start);
                    return true;
                }
            }
        }
    }

    async fn notify_rate_limit(&self, retry_after: Option<f64>, reset_time: Option<f64>) {
        let (default_pause, max_pause) = (self.default_pause, self.max_pause);
        let outcome = self
            .update(|state, now| state.apply_pause(now, retry_after, reset_time, default_pause, max_pause))
            .await;
        metrics::record_rate_limit_hit(&self.instance_key);

        match outcome {
            Ok((_, update)) => tracing::warn!(
                instance = %self.instance_key,
                retry_after = ?retry_after,
                reset_time = ?reset_time,
                paused_until = update.paused_until,
                source = ?update.source,
                extended = update.changed,
                "Upstream throttling, pausing shared bucket"
            ),
            Err(e) => tracing::warn!(
                instance = %self.instance_key,
                error = %e,
                "Failed to record throttle signal in shared bucket"
            ),
        }
    }

    async fn stats(&self) -> LimiterStats {
        let now = self.clock.now();
        let state = match self.load(now).await {
            Ok((mut state, _)) => {
                state.refill(now);
                state
            }
            Err(e) => {
                tracing::warn!(instance = %self.instance_key, error = %e, "Failed to read shared bucket");
                self.fresh_state(now)
            }
        };

        let mut stats = LimiterStats {
            name: self.store_key.clone(),
            rate: state.rate,
            burst: state.burst,
            tokens: state.tokens,
            paused_until: state.paused_until,
            pause_source: state.pause_source,
            rate_limit_hits: state.rate_limit_hits,
            ..Default::default()
        };
        self.counters.fill(&mut stats);
        stats
    }
}
