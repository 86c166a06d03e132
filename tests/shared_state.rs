//! Breaker and bucket state shared between workers through the file store.

use std::sync::Arc;
use std::time::Duration;

use upstream_guard::clock::{Clock, ManualClock};
use upstream_guard::config::{CircuitBreakerConfig, RateLimitConfig};
use upstream_guard::rate_limit::{LimiterRegistry, PauseSource, RateLimiter, SharedBucketLimiter};
use upstream_guard::resilience::{CircuitKey, CircuitRegistry, CircuitState, HealthStats};
use upstream_guard::store::{FileStateStore, StateStore, CIRCUIT_NAMESPACE};

fn breaker_config() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        enable_smoothing: false,
        min_samples: 5,
        open_duration_seconds: 300.0,
        half_open_max_requests: 3,
        recovery_success_count: 2,
        probe_budget_per_interval: 1,
        ..Default::default()
    }
}

fn failing() -> HealthStats {
    HealthStats {
        total_runs: 5,
        failed_rate: 1.0,
        ..Default::default()
    }
}

async fn open_store(path: &std::path::Path) -> Arc<dyn StateStore> {
    Arc::new(FileStateStore::open(path).await.unwrap())
}

#[tokio::test]
async fn breaker_cycle_survives_worker_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let clock = Arc::new(ManualClock::new(10_000.0));
    let key = CircuitKey::instance("sync", "gitlab.example.com");

    // Worker 1 trips the breaker.
    let worker = CircuitRegistry::new(open_store(&path).await, breaker_config(), clock.clone());
    assert_eq!(worker.check(&key, &failing()).await.unwrap().current_state, CircuitState::Open);
    drop(worker);

    // Worker 2 starts later and still sees the open breaker with its timer.
    clock.advance(100.0);
    let worker = CircuitRegistry::new(open_store(&path).await, breaker_config(), clock.clone());
    let decision = worker.check(&key, &HealthStats::default()).await.unwrap();
    assert_eq!(decision.current_state, CircuitState::Open);
    assert_eq!(decision.wait_seconds, 200.0);

    // After the open period it probes, and two successes close it.
    clock.advance(200.0);
    let decision = worker.check(&key, &HealthStats::default()).await.unwrap();
    assert_eq!(decision.current_state, CircuitState::HalfOpen);
    assert!(decision.is_probe_mode);
    assert_eq!(decision.probe_budget, 1);
    worker.record_result(&key, true, None).await.unwrap();
    drop(worker);

    let worker = CircuitRegistry::new(open_store(&path).await, breaker_config(), clock.clone());
    assert_eq!(worker.snapshot(&key).await.unwrap().half_open_successes, 1);
    worker.check(&key, &HealthStats::default()).await.unwrap();
    worker.record_result(&key, true, None).await.unwrap();
    assert_eq!(worker.snapshot(&key).await.unwrap().state, CircuitState::Closed);
}

#[tokio::test]
async fn tripping_one_key_leaves_others_closed() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir.path().join("state.json")).await;
    let clock = Arc::new(ManualClock::new(0.0));
    let registry = CircuitRegistry::new(store.clone(), breaker_config(), clock);

    let gitlab = CircuitKey::pool("sync", "gitlab");
    let svn = CircuitKey::pool("sync", "svn");

    registry.check(&gitlab, &failing()).await.unwrap();
    let decision = registry.check(&svn, &HealthStats::default()).await.unwrap();

    assert_eq!(decision.current_state, CircuitState::Closed);
    assert!(decision.allow_sync);
    assert_eq!(store.keys(CIRCUIT_NAMESPACE).await.unwrap(), vec![gitlab.to_string()]);
}

#[tokio::test]
async fn concurrent_workers_do_not_lose_breaker_updates() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let clock = Arc::new(ManualClock::new(0.0));
    let key = CircuitKey::global("sync");

    let a = CircuitRegistry::new(open_store(&path).await, breaker_config(), clock.clone());
    let b = CircuitRegistry::new(open_store(&path).await, breaker_config(), clock.clone());

    // Both cache the closed breaker, then A trips it.
    a.snapshot(&key).await.unwrap();
    b.snapshot(&key).await.unwrap();
    a.force_open(&key, "incident").await.unwrap();

    // B's stale close must be re-applied on top of A's write, not over it.
    let snapshot = b.force_close(&key, "resolved").await.unwrap();
    assert_eq!(snapshot.state, CircuitState::Closed);

    let stored = store_version(&path, &key).await;
    assert_eq!(stored, 2);
}

async fn store_version(path: &std::path::Path, key: &CircuitKey) -> u64 {
    let store = FileStateStore::open(path).await.unwrap();
    store.get(CIRCUIT_NAMESPACE, key.as_str()).await.unwrap().unwrap().version
}

#[tokio::test]
async fn shared_bucket_throttles_across_workers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let clock = Arc::new(ManualClock::new(0.0));
    let config = RateLimitConfig {
        requests_per_second: 0.5,
        burst_size: 2,
        shared_enabled: true,
        ..Default::default()
    };

    let a = SharedBucketLimiter::new("svn.example.com", open_store(&path).await, &config, clock.clone());
    let b = SharedBucketLimiter::new("svn.example.com", open_store(&path).await, &config, clock.clone());

    assert!(a.acquire(Duration::ZERO).await);
    assert!(b.acquire(Duration::ZERO).await);
    assert!(!a.acquire(Duration::ZERO).await);

    // One token refills in 2s.
    assert!(b.acquire(Duration::from_secs(3)).await);
    assert_eq!(clock.total_slept(), 2.0);

    b.notify_rate_limit(None, Some(clock.now() + 45.0)).await;
    let stats = a.stats().await;
    assert_eq!(stats.pause_source, PauseSource::RateLimitReset);
    assert_eq!(stats.rate_limit_hits, 1);
}

#[tokio::test]
async fn registry_builds_composite_and_clears_shared_rows() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir.path().join("state.json")).await;
    let clock = Arc::new(ManualClock::new(0.0));
    let config = RateLimitConfig {
        shared_enabled: true,
        ..Default::default()
    };
    let registry = LimiterRegistry::new(config, Some(store), clock);

    let limiter = registry.get("gitlab.example.com").unwrap();
    limiter.notify_rate_limit(Some(5.0), None).await;

    let stats = limiter.stats().await;
    assert_eq!(stats.members.len(), 2);
    assert_eq!(stats.rate_limit_hits, 3);
    assert!(stats.members.iter().all(|m| m.pause_source == PauseSource::RetryAfter));

    assert!(registry.clear_shared("gitlab.example.com").await.unwrap());
}
