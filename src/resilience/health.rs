//! Health statistics fed into the circuit breaker.
//!
//! Produced by the run-history subsystem (or from `ClientStats`) over a
//! rolling window, validated here before any threshold logic sees them.

use serde::{Deserialize, Serialize};

use crate::http::stats::ClientStatsSnapshot;

/// Window statistics for one circuit key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthStats {
    pub total_runs: u64,
    pub failed_rate: f64,
    pub rate_limit_rate: f64,
    pub total_requests: u64,
    pub total_timeout_count: u64,
}

fn clamp_rate(rate: f64) -> f64 {
    if rate.is_finite() {
        rate.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

impl HealthStats {
    /// Copy with rates forced into `[0, 1]` (NaN/infinite → 0) and the
    /// timeout count capped by the request count.
    pub fn validated(&self) -> Self {
        Self {
            total_runs: self.total_runs,
            failed_rate: clamp_rate(self.failed_rate),
            rate_limit_rate: clamp_rate(self.rate_limit_rate),
            total_requests: self.total_requests,
            total_timeout_count: self.total_timeout_count.min(self.total_requests),
        }
    }

    /// Timeouts per request; zero when no requests were made.
    pub fn timeout_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.total_timeout_count as f64 / self.total_requests as f64
        }
    }

    /// Fill the request-level fields from executor counters.
    ///
    /// `total_runs` and `failed_rate` come from the run history and are kept.
    pub fn with_client_stats(mut self, stats: &ClientStatsSnapshot) -> Self {
        self.total_requests = stats.total_requests;
        self.total_timeout_count = stats.timeouts;
        self.rate_limit_rate = if stats.total_requests == 0 {
            0.0
        } else {
            stats.rate_limit_hits as f64 / stats.total_requests as f64
        };
        self
    }
}
