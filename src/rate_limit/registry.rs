//! Explicit per-instance limiter registry.
//!
//! Owned by the scheduler and handed to executors; replaces process-wide
//! limiter singletons.

use std::sync::Arc;

use dashmap::DashMap;

use crate::clock::Clock;
use crate::config::{ConfigHandle, GuardConfig, RateLimitConfig};
use crate::rate_limit::{CompositeLimiter, RateLimiter, SharedBucketLimiter, TokenBucketLimiter};
use crate::store::{bucket_key, StateStore, StoreResult, BUCKET_NAMESPACE};

/// A limiter and the settings it was built from.
#[derive(Debug)]
struct CachedLimiter {
    config: RateLimitConfig,
    limiter: Arc<dyn RateLimiter>,
}

#[derive(Debug)]
pub struct LimiterRegistry {
    config: ConfigHandle,
    store: Option<Arc<dyn StateStore>>,
    clock: Arc<dyn Clock>,
    limiters: DashMap<String, CachedLimiter>,
}

impl LimiterRegistry {
    /// Registry with fixed settings. `store` is only used when
    /// `shared_enabled` is set.
    pub fn new(config: RateLimitConfig, store: Option<Arc<dyn StateStore>>, clock: Arc<dyn Clock>) -> Self {
        let handle = ConfigHandle::new(GuardConfig {
            rate_limit: config,
            ..Default::default()
        });
        Self::with_handle(handle, store, clock)
    }

    /// Registry following a live config. A limiter whose settings no longer
    /// match is rebuilt on its next `get`; the shared bucket row survives.
    pub fn with_handle(config: ConfigHandle, store: Option<Arc<dyn StateStore>>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            store,
            clock,
            limiters: DashMap::new(),
        }
    }

    /// Limiter for an upstream instance, created on first use.
    ///
    /// Local bucket only, or local + shared composite when sharing is
    /// enabled and a store is available. `None` when rate limiting is off.
    pub fn get(&self, instance_key: &str) -> Option<Arc<dyn RateLimiter>> {
        let config = self.config.current().rate_limit.clone();
        if !config.enabled {
            return None;
        }
        let mut cached = self
            .limiters
            .entry(instance_key.to_string())
            .or_insert_with(|| self.build(instance_key, &config));
        if cached.config != config {
            tracing::info!(instance = %instance_key, "Rate limit settings changed, rebuilding limiter");
            *cached = self.build(instance_key, &config);
        }
        Some(cached.limiter.clone())
    }

    fn build(&self, instance_key: &str, config: &RateLimitConfig) -> CachedLimiter {
        let local = TokenBucketLimiter::from_config(format!("local:{instance_key}"), config, self.clock.clone());

        let limiter: Arc<dyn RateLimiter> = match (&self.store, config.shared_enabled) {
            (Some(store), true) => {
                let shared = SharedBucketLimiter::new(instance_key, store.clone(), config, self.clock.clone());
                tracing::debug!(instance = %instance_key, "Created local + shared limiter");
                Arc::new(CompositeLimiter::new(
                    instance_key,
                    vec![Arc::new(local), Arc::new(shared)],
                    self.clock.clone(),
                ))
            }
            _ => {
                tracing::debug!(instance = %instance_key, "Created local limiter");
                Arc::new(local)
            }
        };
        CachedLimiter {
            config: config.clone(),
            limiter,
        }
    }

    /// Forget the in-process limiter for an instance.
    pub fn remove(&self, instance_key: &str) -> bool {
        self.limiters.remove(instance_key).is_some()
    }

    pub fn instance_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.limiters.iter().map(|entry| entry.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Delete an instance's shared bucket row. Returns whether one existed.
    pub async fn clear_shared(&self, instance_key: &str) -> StoreResult<bool> {
        let Some(store) = &self.store else {
            return Ok(false);
        };
        let removed = store.delete(BUCKET_NAMESPACE, &bucket_key(instance_key)).await?;
        if removed {
            tracing::info!(instance = %instance_key, "Cleared shared rate limit bucket");
        }
        Ok(removed)
    }
}
