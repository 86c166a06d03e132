//! Circuit breaker for upstream protection.
//!
//! # States
//! - Closed: normal operation, full-speed sync
//! - Open: upstream assumed down, no sync until the open period elapses
//! - Half-Open: a small probe budget tests whether the upstream recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: force_open, or total_runs >= min_samples and a
//!                (smoothed) failure / throttle / timeout rate > threshold
//! Open → Half-Open: open_duration_seconds elapsed (stats are ignored)
//! Half-Open → Closed: recovery_success_count consecutive probe successes
//! Half-Open → Open: any probe failure (fresh opened_at)
//! ```
//!
//! # Design Decisions
//! - Per-key breaker (never global); the registry owns one per key
//! - Degraded batch/window sizes ramp back up with each probe success
//! - The whole state is a serializable snapshot so restarts keep evidence

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::clock::Clock;
use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;
use crate::resilience::circuit_key::CircuitKey;
use crate::resilience::health::HealthStats;
use crate::resilience::retries::ErrorCategory;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    /// Parse a stored state name; anything unrecognized is `Closed`.
    pub fn parse_lossy(raw: &str) -> Self {
        match raw {
            "open" => CircuitState::Open,
            "half_open" => CircuitState::HalfOpen,
            "closed" => CircuitState::Closed,
            other => {
                tracing::warn!(state = %other, "Unrecognized circuit state, treating as closed");
                CircuitState::Closed
            }
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for CircuitState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CircuitState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(CircuitState::parse_lossy(&raw))
    }
}

/// Persisted breaker state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub opened_at: Option<f64>,
    pub half_open_attempts: u32,
    pub half_open_successes: u32,
    /// When the most recent probe slot was handed out.
    pub last_probe_at: Option<f64>,
    pub last_failure_reason: Option<String>,
    pub smoothed_failure_rate: Option<f64>,
    pub smoothed_rate_limit_rate: Option<f64>,
    pub smoothed_timeout_rate: Option<f64>,
}

/// Whether the worker should compute diffs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffMode {
    Full,
    Disabled,
}

/// Output of one `check`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitDecision {
    pub allow_sync: bool,
    pub backfill_only: bool,
    pub batch_size: u32,
    pub forward_window_seconds: u64,
    pub diff_mode: DiffMode,
    pub wait_seconds: f64,
    pub is_probe_mode: bool,
    pub probe_budget: u32,
    pub probe_job_types_allowlist: Vec<String>,
    pub reason: Option<String>,
    pub current_state: CircuitState,
    pub health_stats: HealthStats,
}

impl CircuitDecision {
    /// Whether a job of `job_type` may run under this decision.
    pub fn allows_job_type(&self, job_type: &str) -> bool {
        if !self.allow_sync {
            return false;
        }
        !self.is_probe_mode
            || self.probe_job_types_allowlist.is_empty()
            || self.probe_job_types_allowlist.iter().any(|t| t == job_type)
    }
}

#[derive(Debug, Clone, Copy)]
struct Rates {
    failure: f64,
    rate_limit: f64,
    timeout: f64,
}

fn smooth(alpha: f64, raw: f64, previous: Option<f64>) -> f64 {
    match previous {
        Some(prev) => alpha * raw + (1.0 - alpha) * prev,
        None => raw,
    }
}

fn lerp_u32(from: u32, to: u32, fraction: f64) -> u32 {
    (from as f64 + (to as f64 - from as f64) * fraction).round() as u32
}

fn lerp_u64(from: u64, to: u64, fraction: f64) -> u64 {
    (from as f64 + (to as f64 - from as f64) * fraction).round() as u64
}

/// Breaker state machine for a single key.
#[derive(Debug)]
pub struct CircuitBreakerController {
    key: CircuitKey,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    snapshot: CircuitSnapshot,
    /// Store version this state was loaded from / last written as.
    version: Option<u64>,
}

impl CircuitBreakerController {
    pub fn new(key: CircuitKey, config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self::from_snapshot(key, config, clock, CircuitSnapshot::default(), None)
    }

    pub fn from_snapshot(
        key: CircuitKey,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
        snapshot: CircuitSnapshot,
        version: Option<u64>,
    ) -> Self {
        Self {
            key,
            config,
            clock,
            snapshot,
            version,
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Swap thresholds in place. State and probe bookkeeping are kept.
    pub fn set_config(&mut self, config: CircuitBreakerConfig) {
        self.config = config;
    }

    pub fn key(&self) -> &CircuitKey {
        &self.key
    }

    pub fn state(&self) -> CircuitState {
        self.snapshot.state
    }

    pub fn snapshot(&self) -> &CircuitSnapshot {
        &self.snapshot
    }

    pub fn version(&self) -> Option<u64> {
        self.version
    }

    pub fn set_version(&mut self, version: u64) {
        self.version = Some(version);
    }

    /// Evaluate health stats and the clock, transition if needed, and
    /// describe how the scheduler should operate right now.
    pub fn check(&mut self, stats: &HealthStats) -> CircuitDecision {
        let stats = stats.validated();
        if !self.config.enabled {
            return self.closed_decision(stats);
        }

        let now = self.clock.now();
        match self.snapshot.state {
            CircuitState::Closed => {
                if stats.total_runs >= self.config.min_samples {
                    let rates = self.effective_rates(&stats);
                    if let Some(reason) = self.threshold_breach(rates) {
                        self.open(now, reason);
                        return self.open_decision(stats, now);
                    }
                }
                self.closed_decision(stats)
            }
            CircuitState::Open => {
                let opened_at = *self.snapshot.opened_at.get_or_insert(now);
                if now - opened_at >= self.config.open_duration_seconds {
                    self.transition(CircuitState::HalfOpen, "open_duration_elapsed");
                    self.snapshot.half_open_attempts = 0;
                    self.snapshot.half_open_successes = 0;
                    self.snapshot.last_probe_at = None;
                    self.half_open_decision(stats, now)
                } else {
                    self.open_decision(stats, now)
                }
            }
            CircuitState::HalfOpen => self.half_open_decision(stats, now),
        }
    }

    /// Report the outcome of a probe. Only half-open breakers react.
    pub fn record_result(&mut self, success: bool, error_category: Option<ErrorCategory>) {
        if self.snapshot.state != CircuitState::HalfOpen {
            tracing::trace!(key = %self.key, state = %self.snapshot.state, success, "Result ignored outside half-open");
            return;
        }

        if success {
            self.snapshot.half_open_successes += 1;
            self.snapshot.half_open_attempts = self
                .snapshot
                .half_open_attempts
                .max(self.snapshot.half_open_successes);
            tracing::info!(
                key = %self.key,
                successes = self.snapshot.half_open_successes,
                required = self.config.recovery_success_count,
                "Probe succeeded"
            );
            if self.snapshot.half_open_successes >= self.config.recovery_success_count {
                self.close("recovered");
            }
        } else {
            let reason = error_category
                .map(|c| format!("probe_failed:{c}"))
                .unwrap_or_else(|| "probe_failed".to_string());
            let now = self.clock.now();
            self.open(now, reason);
        }
    }

    /// Trip the breaker regardless of statistics.
    pub fn force_open(&mut self, reason: &str) {
        let now = self.clock.now();
        self.open(now, format!("forced:{reason}"));
    }

    /// Operator override back to closed.
    pub fn force_close(&mut self, reason: &str) {
        self.close(&format!("forced:{reason}"));
    }

    /// Forget everything, including the last failure reason.
    pub fn reset(&mut self) {
        if self.snapshot.state != CircuitState::Closed {
            self.transition(CircuitState::Closed, "reset");
        }
        self.snapshot = CircuitSnapshot::default();
    }

    fn effective_rates(&mut self, stats: &HealthStats) -> Rates {
        let raw = Rates {
            failure: stats.failed_rate,
            rate_limit: stats.rate_limit_rate,
            timeout: stats.timeout_rate(),
        };
        if !self.config.enable_smoothing {
            return raw;
        }

        let alpha = self.config.smoothing_alpha;
        let s = &mut self.snapshot;
        let failure = smooth(alpha, raw.failure, s.smoothed_failure_rate);
        let rate_limit = smooth(alpha, raw.rate_limit, s.smoothed_rate_limit_rate);
        let timeout = smooth(alpha, raw.timeout, s.smoothed_timeout_rate);
        s.smoothed_failure_rate = Some(failure);
        s.smoothed_rate_limit_rate = Some(rate_limit);
        s.smoothed_timeout_rate = Some(timeout);

        Rates {
            failure,
            rate_limit,
            timeout,
        }
    }

    fn threshold_breach(&self, rates: Rates) -> Option<String> {
        let c = &self.config;
        if rates.failure > c.failure_rate_threshold {
            Some(format!("failure_rate {:.2} > {:.2}", rates.failure, c.failure_rate_threshold))
        } else if rates.rate_limit > c.rate_limit_threshold {
            Some(format!("rate_limit_rate {:.2} > {:.2}", rates.rate_limit, c.rate_limit_threshold))
        } else if rates.timeout > c.timeout_rate_threshold {
            Some(format!("timeout_rate {:.2} > {:.2}", rates.timeout, c.timeout_rate_threshold))
        } else {
            None
        }
    }

    fn open(&mut self, now: f64, reason: String) {
        self.transition(CircuitState::Open, &reason);
        let s = &mut self.snapshot;
        s.opened_at = Some(now);
        s.half_open_attempts = 0;
        s.half_open_successes = 0;
        s.last_probe_at = None;
        s.last_failure_reason = Some(reason);
    }

    fn close(&mut self, reason: &str) {
        self.transition(CircuitState::Closed, reason);
        let s = &mut self.snapshot;
        s.opened_at = None;
        s.half_open_attempts = 0;
        s.half_open_successes = 0;
        s.last_probe_at = None;
        s.smoothed_failure_rate = None;
        s.smoothed_rate_limit_rate = None;
        s.smoothed_timeout_rate = None;
    }

    fn transition(&mut self, to: CircuitState, reason: &str) {
        let from = self.snapshot.state;
        self.snapshot.state = to;
        if from == to {
            return;
        }
        match to {
            CircuitState::Open => {
                tracing::warn!(key = %self.key, from = %from, to = %to, reason = %reason, "Circuit state change")
            }
            _ => tracing::info!(key = %self.key, from = %from, to = %to, reason = %reason, "Circuit state change"),
        }
        metrics::record_circuit_transition(self.key.as_str(), from, to);
    }

    fn closed_decision(&self, stats: HealthStats) -> CircuitDecision {
        let d = &self.config.degraded;
        CircuitDecision {
            allow_sync: true,
            backfill_only: false,
            batch_size: d.normal_batch_size,
            forward_window_seconds: d.normal_forward_window_seconds,
            diff_mode: DiffMode::Full,
            wait_seconds: 0.0,
            is_probe_mode: false,
            probe_budget: 0,
            probe_job_types_allowlist: Vec::new(),
            reason: None,
            current_state: CircuitState::Closed,
            health_stats: stats,
        }
    }

    /// Degraded template; `fraction` of the way back to normal values.
    fn degraded_decision(&self, stats: HealthStats, fraction: f64) -> CircuitDecision {
        let d = &self.config.degraded;
        let fraction = fraction.clamp(0.0, 1.0);
        CircuitDecision {
            allow_sync: false,
            backfill_only: d.backfill_only,
            batch_size: lerp_u32(d.degraded_batch_size, d.normal_batch_size, fraction),
            forward_window_seconds: lerp_u64(
                d.degraded_forward_window_seconds,
                d.normal_forward_window_seconds,
                fraction,
            ),
            diff_mode: if d.disable_diff { DiffMode::Disabled } else { DiffMode::Full },
            wait_seconds: 0.0,
            is_probe_mode: false,
            probe_budget: 0,
            probe_job_types_allowlist: Vec::new(),
            reason: self.snapshot.last_failure_reason.clone(),
            current_state: self.snapshot.state,
            health_stats: stats,
        }
    }

    fn open_decision(&self, stats: HealthStats, now: f64) -> CircuitDecision {
        let opened_at = self.snapshot.opened_at.unwrap_or(now);
        let remaining = (self.config.open_duration_seconds - (now - opened_at)).max(0.0);
        CircuitDecision {
            wait_seconds: remaining,
            ..self.degraded_decision(stats, 0.0)
        }
    }

    fn half_open_decision(&mut self, stats: HealthStats, now: f64) -> CircuitDecision {
        let max = self.config.half_open_max_requests;

        // Slots handed out but never reported are re-issued after a probe interval.
        if self.snapshot.half_open_attempts >= max {
            let stale = self
                .snapshot
                .last_probe_at
                .map(|at| now - at >= self.config.probe_interval_seconds)
                .unwrap_or(true);
            if stale {
                tracing::debug!(key = %self.key, "Reclaiming unreported probe slots");
                self.snapshot.half_open_attempts = self.snapshot.half_open_successes;
            }
        }

        let remaining = max.saturating_sub(self.snapshot.half_open_attempts);
        let budget = self.config.probe_budget_per_interval.min(remaining);
        if budget > 0 {
            self.snapshot.half_open_attempts += budget;
            self.snapshot.last_probe_at = Some(now);
        }

        let fraction = if self.config.recovery_success_count == 0 {
            1.0
        } else {
            self.snapshot.half_open_successes as f64 / self.config.recovery_success_count as f64
        };

        CircuitDecision {
            allow_sync: budget > 0,
            wait_seconds: if budget > 0 { 0.0 } else { self.config.probe_interval_seconds },
            is_probe_mode: true,
            probe_budget: budget,
            probe_job_types_allowlist: self.config.probe_job_types_allowlist.clone(),
            ..self.degraded_decision(stats, fraction)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn failing(total_runs: u64) -> HealthStats {
        HealthStats {
            total_runs,
            failed_rate: 1.0,
            ..Default::default()
        }
    }

    fn healthy() -> HealthStats {
        HealthStats {
            total_runs: 50,
            ..Default::default()
        }
    }

    fn raw_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            enable_smoothing: false,
            open_duration_seconds: 60.0,
            half_open_max_requests: 3,
            recovery_success_count: 2,
            probe_budget_per_interval: 1,
            ..Default::default()
        }
    }

    fn controller(config: CircuitBreakerConfig) -> (CircuitBreakerController, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(10_000.0));
        let cb = CircuitBreakerController::new(CircuitKey::global("test"), config, clock.clone());
        (cb, clock)
    }

    #[test]
    fn min_samples_guards_the_trip() {
        let (mut cb, _) = controller(raw_config());
        for runs in 1..5 {
            let decision = cb.check(&failing(runs));
            assert!(decision.allow_sync);
            assert_eq!(cb.state(), CircuitState::Closed);
        }
        let decision = cb.check(&failing(5));
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!decision.allow_sync);
        assert_eq!(decision.current_state, CircuitState::Open);
        assert_eq!(decision.wait_seconds, 60.0);
        assert!(decision.reason.unwrap().starts_with("failure_rate"));
    }

    #[test]
    fn throttle_and_timeout_rates_trip() {
        let (mut cb, _) = controller(raw_config());
        cb.check(&HealthStats {
            total_runs: 10,
            rate_limit_rate: 0.9,
            ..Default::default()
        });
        assert_eq!(cb.state(), CircuitState::Open);

        let (mut cb, _) = controller(raw_config());
        cb.check(&HealthStats {
            total_runs: 10,
            total_requests: 10,
            total_timeout_count: 6,
            ..Default::default()
        });
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.snapshot().last_failure_reason.as_deref().unwrap().starts_with("timeout_rate"));
    }

    #[test]
    fn smoothing_dampens_a_single_spike() {
        let (mut cb, _) = controller(CircuitBreakerConfig {
            enable_smoothing: true,
            smoothing_alpha: 0.3,
            ..raw_config()
        });
        cb.check(&HealthStats {
            total_runs: 10,
            failed_rate: 0.0,
            ..Default::default()
        });
        cb.check(&failing(10));
        assert_eq!(cb.state(), CircuitState::Closed);
        let smoothed = cb.snapshot().smoothed_failure_rate.unwrap();
        assert!((smoothed - 0.3).abs() < 1e-9);

        // 0.3 * 1.0 + 0.7 * 0.3 = 0.51
        cb.check(&failing(10));
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn smoothing_is_seeded_with_first_sample() {
        let (mut cb, _) = controller(CircuitBreakerConfig {
            enable_smoothing: true,
            smoothing_alpha: 0.1,
            ..raw_config()
        });
        cb.check(&failing(10));
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.snapshot().smoothed_failure_rate, Some(1.0));
    }

    #[test]
    fn full_recovery_cycle() {
        let (mut cb, clock) = controller(raw_config());
        cb.check(&failing(5));
        assert_eq!(cb.state(), CircuitState::Open);

        clock.advance(30.0);
        let decision = cb.check(&healthy());
        assert_eq!(cb.state(), CircuitState::Open, "stats are irrelevant while open");
        assert_eq!(decision.wait_seconds, 30.0);

        clock.advance(30.0);
        let decision = cb.check(&failing(100));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(decision.allow_sync);
        assert!(decision.is_probe_mode);
        assert_eq!(decision.probe_budget, 1);
        assert_eq!(decision.batch_size, 10);
        assert_eq!(decision.diff_mode, DiffMode::Disabled);

        cb.record_result(true, None);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        let decision = cb.check(&healthy());
        assert_eq!(decision.batch_size, 55, "half way back to normal");
        assert_eq!(decision.forward_window_seconds, 45_000);

        cb.record_result(true, None);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().half_open_successes, 0);
        assert_eq!(cb.snapshot().smoothed_failure_rate, None);

        let decision = cb.check(&healthy());
        assert!(decision.allow_sync);
        assert_eq!(decision.batch_size, 100);
        assert_eq!(decision.diff_mode, DiffMode::Full);
    }

    #[test]
    fn probe_failure_reopens_with_fresh_timer() {
        let (mut cb, clock) = controller(raw_config());
        cb.check(&failing(5));
        let first_opened = cb.snapshot().opened_at.unwrap();

        clock.advance(61.0);
        cb.check(&healthy());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        clock.advance(5.0);
        cb.record_result(false, Some(ErrorCategory::Timeout));
        assert_eq!(cb.state(), CircuitState::Open);
        let reopened = cb.snapshot().opened_at.unwrap();
        assert!(reopened > first_opened);
        assert_eq!(cb.snapshot().last_failure_reason.as_deref(), Some("probe_failed:timeout"));

        let decision = cb.check(&healthy());
        assert_eq!(decision.wait_seconds, 60.0);
    }

    #[test]
    fn probe_slots_are_bounded() {
        let config = CircuitBreakerConfig {
            probe_budget_per_interval: 2,
            half_open_max_requests: 3,
            recovery_success_count: 3,
            probe_interval_seconds: 30.0,
            probe_job_types_allowlist: vec!["backfill".to_string()],
            ..raw_config()
        };
        let (mut cb, clock) = controller(config);
        cb.force_open("maintenance");
        clock.advance(61.0);

        let first = cb.check(&healthy());
        assert_eq!(first.probe_budget, 2);
        assert!(first.allows_job_type("backfill"));
        assert!(!first.allows_job_type("incremental"));

        let second = cb.check(&healthy());
        assert_eq!(second.probe_budget, 1);

        let third = cb.check(&healthy());
        assert!(!third.allow_sync);
        assert_eq!(third.wait_seconds, 30.0);

        clock.advance(31.0);
        let reissued = cb.check(&healthy());
        assert_eq!(reissued.probe_budget, 2);
    }

    #[test]
    fn results_outside_half_open_are_ignored() {
        let (mut cb, _) = controller(raw_config());
        cb.record_result(false, Some(ErrorCategory::ServerError));
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.force_open("drill");
        cb.record_result(true, None);
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.snapshot().last_failure_reason.as_deref(), Some("forced:drill"));

        cb.force_close("operator");
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().opened_at, None);
    }

    #[test]
    fn disabled_breaker_always_allows() {
        let (mut cb, _) = controller(CircuitBreakerConfig {
            enabled: false,
            ..raw_config()
        });
        let decision = cb.check(&failing(1_000));
        assert!(decision.allow_sync);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn snapshot_round_trips_and_unknown_state_is_closed() {
        let (mut cb, _) = controller(CircuitBreakerConfig {
            enable_smoothing: true,
            ..raw_config()
        });
        cb.check(&failing(9));
        let json = serde_json::to_value(cb.snapshot()).unwrap();
        assert_eq!(json["state"], "open");
        let restored: CircuitSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(&restored, cb.snapshot());

        let odd: CircuitSnapshot =
            serde_json::from_str(r#"{"state": "tripped", "half_open_attempts": 2}"#).unwrap();
        assert_eq!(odd.state, CircuitState::Closed);
        assert_eq!(odd.half_open_attempts, 2);
    }

    #[test]
    fn restored_breaker_keeps_its_timer() {
        let clock = Arc::new(ManualClock::new(5_000.0));
        let snapshot = CircuitSnapshot {
            state: CircuitState::Open,
            opened_at: Some(4_990.0),
            last_failure_reason: Some("failure_rate 0.90 > 0.50".into()),
            ..Default::default()
        };
        let mut cb = CircuitBreakerController::from_snapshot(
            CircuitKey::global("p"),
            raw_config(),
            clock,
            snapshot,
            Some(4),
        );
        let decision = cb.check(&healthy());
        assert_eq!(decision.current_state, CircuitState::Open);
        assert_eq!(decision.wait_seconds, 50.0);
        assert_eq!(cb.version(), Some(4));
    }

    #[test]
    fn decision_serializes_for_the_scheduler() {
        let (mut cb, _) = controller(raw_config());
        let decision = cb.check(&healthy());
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["current_state"], "closed");
        assert_eq!(json["diff_mode"], "full");
        assert_eq!(json["health_stats"]["total_runs"], 50);
    }
}
