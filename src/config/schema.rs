//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the control
//! plane. All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::resilience::retries::ErrorCategory;

/// Root configuration for the resilience control plane.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct GuardConfig {
    /// Circuit breaker thresholds and degraded-mode parameters.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Token bucket settings for outgoing requests.
    pub rate_limit: RateLimitConfig,

    /// Retry loop settings for the request executor.
    pub retries: RetryConfig,

    /// Category-specific wait defaults.
    pub backoff: BackoffConfig,

    /// Concurrent in-flight request cap.
    pub concurrency: ConcurrencyConfig,

    /// Persistent state store.
    pub store: StoreConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// When disabled, `check` always allows full-speed sync.
    pub enabled: bool,

    /// Failure rate (0.0 - 1.0) above which the breaker trips.
    pub failure_rate_threshold: f64,

    /// Throttle-hit rate above which the breaker trips.
    pub rate_limit_threshold: f64,

    /// Timeout rate above which the breaker trips.
    pub timeout_rate_threshold: f64,

    /// Minimum runs in the window before rates are trusted.
    pub min_samples: u64,

    /// Seconds to stay open before probing.
    pub open_duration_seconds: f64,

    /// Probe attempts admitted while half-open.
    pub half_open_max_requests: u32,

    /// Consecutive probe successes needed to close.
    pub recovery_success_count: u32,

    /// Probes handed out per decision.
    pub probe_budget_per_interval: u32,

    /// Job types allowed to run as probes. Empty means any.
    pub probe_job_types_allowlist: Vec<String>,

    /// Wait hint while half-open with no probe slots left.
    pub probe_interval_seconds: f64,

    /// Use exponentially smoothed rates instead of raw window rates.
    pub enable_smoothing: bool,

    /// Weight of the newest sample (0.0 - 1.0].
    pub smoothing_alpha: f64,

    /// Operating parameters handed out while not closed.
    pub degraded: DegradedModeConfig,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_rate_threshold: 0.5,
            rate_limit_threshold: 0.3,
            timeout_rate_threshold: 0.3,
            min_samples: 5,
            open_duration_seconds: 300.0,
            half_open_max_requests: 3,
            recovery_success_count: 3,
            probe_budget_per_interval: 1,
            probe_job_types_allowlist: Vec::new(),
            probe_interval_seconds: 60.0,
            enable_smoothing: true,
            smoothing_alpha: 0.3,
            degraded: DegradedModeConfig::default(),
        }
    }
}

/// Full and degraded sync parameters.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DegradedModeConfig {
    pub normal_batch_size: u32,
    pub degraded_batch_size: u32,
    pub normal_forward_window_seconds: u64,
    pub degraded_forward_window_seconds: u64,

    /// Restrict half-open work to backfill.
    pub backfill_only: bool,

    /// Skip diff computation until the breaker closes.
    pub disable_diff: bool,
}

impl Default for DegradedModeConfig {
    fn default() -> Self {
        Self {
            normal_batch_size: 100,
            degraded_batch_size: 10,
            normal_forward_window_seconds: 86_400,
            degraded_forward_window_seconds: 3_600,
            backfill_only: true,
            disable_diff: true,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Sustained requests per second per upstream instance.
    pub requests_per_second: f64,

    /// Burst capacity.
    pub burst_size: u32,

    /// Upper bound on a single `acquire` wait.
    pub acquire_timeout_secs: f64,

    /// Pause applied when a throttle signal carries no hint.
    pub default_pause_secs: f64,

    /// Ceiling for any single pause.
    pub max_pause_secs: f64,

    /// Also throttle through the shared, store-backed bucket.
    pub shared_enabled: bool,

    /// Compare-and-put retries before the shared bucket falls back to a plain write.
    pub shared_cas_retries: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: 10.0,
            burst_size: 20,
            acquire_timeout_secs: 300.0,
            default_pause_secs: 1.0,
            max_pause_secs: 3_600.0,
            shared_enabled: false,
            shared_cas_retries: 3,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum HTTP attempts per logical call.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in seconds.
    pub base_delay_secs: f64,

    /// Maximum exponential delay in seconds (jitter is added on top).
    pub max_delay_secs: f64,

    /// Ceiling for a single server-directed wait.
    pub max_wait_secs: f64,

    /// Per-attempt HTTP timeout in seconds.
    pub request_timeout_secs: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 1.0,
            max_delay_secs: 60.0,
            max_wait_secs: 3_600.0,
            request_timeout_secs: 30.0,
        }
    }
}

/// Backoff resolution defaults.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BackoffConfig {
    /// Wait used when neither a server hint nor a category default applies.
    pub default_backoff_secs: f64,

    /// Per-category waits, e.g. `rate_limited = 60`.
    pub category_defaults: HashMap<ErrorCategory, f64>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        let category_defaults = HashMap::from([
            (ErrorCategory::RateLimited, 60.0),
            (ErrorCategory::ServerError, 30.0),
            (ErrorCategory::Timeout, 30.0),
            (ErrorCategory::Network, 15.0),
            (ErrorCategory::AuthError, 5.0),
        ]);
        Self {
            default_backoff_secs: 60.0,
            category_defaults,
        }
    }
}

/// Concurrency cap around the HTTP call.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub enabled: bool,
    pub max_concurrency: usize,
    pub acquire_timeout_secs: f64,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_concurrency: 4,
            acquire_timeout_secs: 30.0,
        }
    }
}

/// State store configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Path of the JSON file used by the file-backed store.
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "upstream-guard-state.json".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Install the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
