//! Explicit per-key breaker registry backed by the [`StateStore`].
//!
//! # Data Flow
//! ```text
//! scheduler → CircuitRegistry::check(key, stats)
//!     → get_or_load: cached controller, else snapshot from the store
//!     → controller.check / record_result / force_*
//!     → snapshot changed? compare_and_put(version)
//!         → conflict: reload the stored snapshot, re-apply, try again
//! ```
//!
//! One controller per key per process. Controllers for different keys never
//! share state, and writers in different processes are serialized by the
//! record version rather than by a lock. Thresholds are read from a
//! [`ConfigHandle`] on every call, so a reloaded config reaches cached
//! controllers too.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::config::{CircuitBreakerConfig, ConfigHandle, GuardConfig};
use crate::resilience::circuit_breaker::{CircuitBreakerController, CircuitDecision, CircuitSnapshot};
use crate::resilience::circuit_key::CircuitKey;
use crate::resilience::health::HealthStats;
use crate::resilience::retries::ErrorCategory;
use crate::store::{load_typed, StateStore, StoreError, StoreResult, CIRCUIT_NAMESPACE};

/// Re-applications after a version conflict before giving up.
const CONFLICT_RETRIES: usize = 2;

pub type SharedController = Arc<Mutex<CircuitBreakerController>>;

#[derive(Debug)]
pub struct CircuitRegistry {
    store: Arc<dyn StateStore>,
    config: ConfigHandle,
    clock: Arc<dyn Clock>,
    breakers: DashMap<CircuitKey, SharedController>,
}

impl CircuitRegistry {
    /// Registry with fixed breaker settings.
    pub fn new(store: Arc<dyn StateStore>, config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        let handle = ConfigHandle::new(GuardConfig {
            circuit_breaker: config,
            ..Default::default()
        });
        Self::with_handle(store, handle, clock)
    }

    /// Registry following a live config, typically one kept current by a
    /// `ConfigWatcher`.
    pub fn with_handle(store: Arc<dyn StateStore>, config: ConfigHandle, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            config,
            clock,
            breakers: DashMap::new(),
        }
    }

    /// Breaker settings in effect right now.
    pub fn config(&self) -> CircuitBreakerConfig {
        self.config.current().circuit_breaker.clone()
    }

    fn sync_config(&self, key: &CircuitKey, controller: &mut CircuitBreakerController) {
        let current = self.config();
        if *controller.config() != current {
            tracing::info!(key = %key, "Applying reloaded circuit breaker configuration");
            controller.set_config(current);
        }
    }

    async fn load_controller(&self, key: &CircuitKey) -> StoreResult<CircuitBreakerController> {
        let loaded = load_typed::<CircuitSnapshot>(self.store.as_ref(), CIRCUIT_NAMESPACE, key.as_str()).await?;
        let (snapshot, version) = match loaded {
            Some((snapshot, version)) => (snapshot, Some(version)),
            None => (CircuitSnapshot::default(), None),
        };
        Ok(CircuitBreakerController::from_snapshot(
            key.clone(),
            self.config(),
            self.clock.clone(),
            snapshot,
            version,
        ))
    }

    /// Cached controller for `key`, loading its snapshot on first use.
    pub async fn get_or_load(&self, key: &CircuitKey) -> StoreResult<SharedController> {
        if let Some(existing) = self.breakers.get(key) {
            return Ok(existing.clone());
        }
        let controller = self.load_controller(key).await?;
        tracing::debug!(key = %key, state = %controller.state(), "Loaded circuit breaker");
        let shared = self
            .breakers
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(controller)))
            .clone();
        Ok(shared)
    }

    /// Run `op` against the controller and persist the result if it changed
    /// the snapshot.
    async fn apply<R, F>(&self, key: &CircuitKey, mut op: F) -> StoreResult<R>
    where
        F: FnMut(&mut CircuitBreakerController) -> R + Send,
        R: Send,
    {
        let shared = self.get_or_load(key).await?;
        let mut controller = shared.lock().await;
        self.refresh(key, &mut controller).await?;
        self.sync_config(key, &mut controller);

        let mut conflicts = 0;
        loop {
            let before = controller.snapshot().clone();
            let result = op(&mut *controller);
            if *controller.snapshot() == before {
                return Ok(result);
            }

            let value = serde_json::to_value(controller.snapshot())?;
            match self
                .store
                .compare_and_put(CIRCUIT_NAMESPACE, key.as_str(), controller.version(), value)
                .await
            {
                Ok(version) => {
                    controller.set_version(version);
                    return Ok(result);
                }
                Err(err @ StoreError::VersionConflict { .. }) => {
                    if conflicts >= CONFLICT_RETRIES {
                        tracing::warn!(key = %key, error = %err, "Circuit state still contended, giving up");
                        return Err(err);
                    }
                    conflicts += 1;
                    tracing::info!(key = %key, attempt = conflicts, "Circuit state changed elsewhere, reloading");
                    *controller = self.load_controller(key).await?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Pick up writes made by other processes since this controller was
    /// loaded or last persisted.
    async fn refresh(&self, key: &CircuitKey, controller: &mut CircuitBreakerController) -> StoreResult<()> {
        let stored = self.store.get(CIRCUIT_NAMESPACE, key.as_str()).await?;
        let stored_version = stored.as_ref().map(|record| record.version);
        if stored_version != controller.version() {
            tracing::debug!(key = %key, cached = ?controller.version(), stored = ?stored_version, "Refreshing circuit state");
            *controller = self.load_controller(key).await?;
        }
        Ok(())
    }

    pub async fn check(&self, key: &CircuitKey, stats: &HealthStats) -> StoreResult<CircuitDecision> {
        self.apply(key, |controller| controller.check(stats)).await
    }

    pub async fn record_result(
        &self,
        key: &CircuitKey,
        success: bool,
        error_category: Option<ErrorCategory>,
    ) -> StoreResult<()> {
        self.apply(key, |controller| controller.record_result(success, error_category))
            .await
    }

    pub async fn force_open(&self, key: &CircuitKey, reason: &str) -> StoreResult<CircuitSnapshot> {
        self.apply(key, |controller| {
            controller.force_open(reason);
            controller.snapshot().clone()
        })
        .await
    }

    pub async fn force_close(&self, key: &CircuitKey, reason: &str) -> StoreResult<CircuitSnapshot> {
        self.apply(key, |controller| {
            controller.force_close(reason);
            controller.snapshot().clone()
        })
        .await
    }

    pub async fn reset(&self, key: &CircuitKey) -> StoreResult<CircuitSnapshot> {
        self.apply(key, |controller| {
            controller.reset();
            controller.snapshot().clone()
        })
        .await
    }

    /// Current snapshot without evaluating any transition.
    pub async fn snapshot(&self, key: &CircuitKey) -> StoreResult<CircuitSnapshot> {
        let shared = self.get_or_load(key).await?;
        let mut controller = shared.lock().await;
        self.refresh(key, &mut controller).await?;
        self.sync_config(key, &mut controller);
        Ok(controller.snapshot().clone())
    }

    /// Drop the cached controller so the next call re-reads the store.
    pub fn evict(&self, key: &CircuitKey) -> bool {
        self.breakers.remove(key).is_some()
    }

    /// Delete the persisted snapshot and the cached controller.
    pub async fn remove(&self, key: &CircuitKey) -> StoreResult<bool> {
        self.evict(key);
        self.store.delete(CIRCUIT_NAMESPACE, key.as_str()).await
    }

    /// Keys with a persisted snapshot.
    pub async fn persisted_keys(&self) -> StoreResult<Vec<CircuitKey>> {
        let keys = self.store.keys(CIRCUIT_NAMESPACE).await?;
        Ok(keys.into_iter().map(CircuitKey::from_raw).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::resilience::circuit_breaker::CircuitState;
    use crate::store::MemoryStateStore;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            enable_smoothing: false,
            min_samples: 5,
            ..Default::default()
        }
    }

    fn failing() -> HealthStats {
        HealthStats {
            total_runs: 10,
            failed_rate: 1.0,
            ..Default::default()
        }
    }

    fn registry(store: Arc<dyn StateStore>, clock: Arc<ManualClock>) -> CircuitRegistry {
        CircuitRegistry::new(store, config(), clock)
    }

    #[tokio::test]
    async fn keys_are_isolated() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let registry = registry(store, Arc::new(ManualClock::new(0.0)));
        let a = CircuitKey::instance("sync", "a.example.com");
        let b = CircuitKey::instance("sync", "b.example.com");

        let decision = registry.check(&a, &failing()).await.unwrap();
        assert_eq!(decision.current_state, CircuitState::Open);

        let decision = registry.check(&b, &HealthStats::default()).await.unwrap();
        assert_eq!(decision.current_state, CircuitState::Closed);
        assert_eq!(registry.snapshot(&b).await.unwrap().state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn state_survives_a_restart() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let clock = Arc::new(ManualClock::new(1_000.0));
        let key = CircuitKey::global("sync");

        registry(store.clone(), clock.clone()).force_open(&key, "maintenance").await.unwrap();

        let restarted = registry(store, clock.clone());
        let snapshot = restarted.snapshot(&key).await.unwrap();
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.opened_at, Some(1_000.0));
        assert_eq!(snapshot.last_failure_reason.as_deref(), Some("forced:maintenance"));
        assert_eq!(restarted.persisted_keys().await.unwrap(), vec![key]);
    }

    #[tokio::test]
    async fn other_workers_writes_are_picked_up() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let clock = Arc::new(ManualClock::new(0.0));
        let key = CircuitKey::pool("sync", "gitlab");

        let worker_a = registry(store.clone(), clock.clone());
        let worker_b = registry(store.clone(), clock.clone());
        worker_a.snapshot(&key).await.unwrap();
        worker_b.snapshot(&key).await.unwrap();

        worker_a.force_open(&key, "outage").await.unwrap();
        assert_eq!(worker_b.snapshot(&key).await.unwrap().state, CircuitState::Open);
    }

    /// Lets another writer slip in between our read and our write, once.
    #[derive(Debug)]
    struct RacingStore {
        inner: MemoryStateStore,
        raced: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl StateStore for RacingStore {
        async fn get(&self, namespace: &str, key: &str) -> StoreResult<Option<crate::store::VersionedValue>> {
            self.inner.get(namespace, key).await
        }

        async fn put(&self, namespace: &str, key: &str, value: serde_json::Value) -> StoreResult<u64> {
            self.inner.put(namespace, key, value).await
        }

        async fn compare_and_put(
            &self,
            namespace: &str,
            key: &str,
            expected_version: Option<u64>,
            value: serde_json::Value,
        ) -> StoreResult<u64> {
            if !self.raced.swap(true, std::sync::atomic::Ordering::SeqCst) {
                let rival = CircuitSnapshot {
                    last_failure_reason: Some("rival".into()),
                    ..Default::default()
                };
                self.inner.put(namespace, key, serde_json::to_value(&rival)?).await?;
            }
            self.inner.compare_and_put(namespace, key, expected_version, value).await
        }

        async fn delete(&self, namespace: &str, key: &str) -> StoreResult<bool> {
            self.inner.delete(namespace, key).await
        }

        async fn keys(&self, namespace: &str) -> StoreResult<Vec<String>> {
            self.inner.keys(namespace).await
        }
    }

    #[tokio::test]
    async fn conflicting_write_is_reapplied_on_fresh_state() {
        let store: Arc<dyn StateStore> = Arc::new(RacingStore {
            inner: MemoryStateStore::new(),
            raced: std::sync::atomic::AtomicBool::new(false),
        });
        let registry = registry(store.clone(), Arc::new(ManualClock::new(0.0)));
        let key = CircuitKey::global("sync");

        let snapshot = registry.force_open(&key, "outage").await.unwrap();
        assert_eq!(snapshot.state, CircuitState::Open);

        // rival write is version 1, ours lands on top as version 2
        let stored = store.get(CIRCUIT_NAMESPACE, key.as_str()).await.unwrap().unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(stored.value["state"], "open");
    }

    #[tokio::test]
    async fn unchanged_checks_do_not_write() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let registry = registry(store.clone(), Arc::new(ManualClock::new(0.0)));
        let key = CircuitKey::global("sync");

        registry.check(&key, &HealthStats::default()).await.unwrap();
        assert!(store.get(CIRCUIT_NAMESPACE, key.as_str()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn remove_forgets_state() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let registry = registry(store, Arc::new(ManualClock::new(0.0)));
        let key = CircuitKey::tenant("sync", "7");

        registry.force_open(&key, "test").await.unwrap();
        assert!(registry.remove(&key).await.unwrap());
        assert_eq!(registry.snapshot(&key).await.unwrap().state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn reloaded_thresholds_reach_cached_breakers() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let handle = ConfigHandle::new(GuardConfig {
            circuit_breaker: CircuitBreakerConfig {
                min_samples: 20,
                ..config()
            },
            ..Default::default()
        });
        let registry = CircuitRegistry::with_handle(store, handle.clone(), Arc::new(ManualClock::new(0.0)));
        let key = CircuitKey::global("sync");

        // ten runs are below the sample floor
        let decision = registry.check(&key, &failing()).await.unwrap();
        assert_eq!(decision.current_state, CircuitState::Closed);

        let mut next = (*handle.current()).clone();
        next.circuit_breaker.min_samples = 5;
        handle.replace(next);

        assert_eq!(registry.config().min_samples, 5);
        let decision = registry.check(&key, &failing()).await.unwrap();
        assert_eq!(decision.current_state, CircuitState::Open);
    }
}
