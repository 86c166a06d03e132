//! Per-executor request counters.
//!
//! Counters only grow; `reset` is the operator's way back to zero.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;

use crate::http::response::RequestOutcome;
use crate::resilience::retries::ErrorCategory;

/// Most recent throttle hints seen from the upstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ThrottleMetadata {
    pub last_retry_after: Option<f64>,
    pub last_rate_limit_reset: Option<f64>,
    pub last_rate_limit_remaining: Option<u64>,
}

#[derive(Debug, Default)]
pub struct ClientStats {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    rate_limit_hits: AtomicU64,
    retries: AtomicU64,
    timeouts: AtomicU64,
    auth_refreshes: AtomicU64,
    throttle: Mutex<ThrottleMetadata>,
}

/// Point-in-time copy of [`ClientStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ClientStatsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub rate_limit_hits: u64,
    pub retries: u64,
    pub timeouts: u64,
    pub auth_refreshes: u64,
    pub last_retry_after: Option<f64>,
    pub last_rate_limit_reset: Option<f64>,
    pub last_rate_limit_remaining: Option<u64>,
}

impl ClientStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one HTTP attempt.
    pub fn record(&self, outcome: &RequestOutcome) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        match outcome.category {
            None => {
                self.successful_requests.fetch_add(1, Ordering::Relaxed);
            }
            Some(category) => {
                self.failed_requests.fetch_add(1, Ordering::Relaxed);
                if category == ErrorCategory::RateLimited {
                    self.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
                }
                if category.is_timeout() {
                    self.timeouts.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        let mut throttle = self.throttle.lock().expect("client stats mutex poisoned");
        if outcome.category == Some(ErrorCategory::RateLimited) {
            throttle.last_retry_after = outcome.retry_after;
            throttle.last_rate_limit_reset = outcome.rate_limit_reset;
        }
        if outcome.rate_limit_remaining.is_some() {
            throttle.last_rate_limit_remaining = outcome.rate_limit_remaining;
        }
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_auth_refresh(&self) {
        self.auth_refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ClientStatsSnapshot {
        let throttle = *self.throttle.lock().expect("client stats mutex poisoned");
        ClientStatsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            rate_limit_hits: self.rate_limit_hits.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            auth_refreshes: self.auth_refreshes.load(Ordering::Relaxed),
            last_retry_after: throttle.last_retry_after,
            last_rate_limit_reset: throttle.last_rate_limit_reset,
            last_rate_limit_remaining: throttle.last_rate_limit_remaining,
        }
    }

    /// Zero every counter and forget throttle hints.
    pub fn reset(&self) {
        for counter in [
            &self.total_requests,
            &self.successful_requests,
            &self.failed_requests,
            &self.rate_limit_hits,
            &self.retries,
            &self.timeouts,
            &self.auth_refreshes,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        *self.throttle.lock().expect("client stats mutex poisoned") = ThrottleMetadata::default();
        tracing::info!("Client stats reset");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn outcome(status: u16, category: Option<ErrorCategory>) -> RequestOutcome {
        RequestOutcome {
            attempt: 1,
            status: Some(status),
            duration: Duration::from_millis(3),
            category,
            retry_after: None,
            rate_limit_reset: None,
            rate_limit_remaining: None,
        }
    }

    #[test]
    fn counts_by_outcome() {
        let stats = ClientStats::new();
        stats.record(&outcome(200, None));
        stats.record(&outcome(504, Some(ErrorCategory::Timeout)));
        stats.record(&RequestOutcome {
            retry_after: Some(12.0),
            rate_limit_reset: Some(1_700_000_100.0),
            rate_limit_remaining: Some(0),
            ..outcome(429, Some(ErrorCategory::RateLimited))
        });
        stats.record_retry();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_requests, 3);
        assert_eq!(snapshot.successful_requests, 1);
        assert_eq!(snapshot.failed_requests, 2);
        assert_eq!(snapshot.rate_limit_hits, 1);
        assert_eq!(snapshot.timeouts, 1);
        assert_eq!(snapshot.retries, 1);
        assert_eq!(snapshot.last_retry_after, Some(12.0));
        assert_eq!(snapshot.last_rate_limit_remaining, Some(0));
    }

    #[test]
    fn reset_zeroes_everything() {
        let stats = ClientStats::new();
        stats.record(&RequestOutcome {
            retry_after: Some(3.0),
            ..outcome(429, Some(ErrorCategory::RateLimited))
        });
        stats.record_auth_refresh();
        stats.reset();
        assert_eq!(stats.snapshot(), ClientStatsSnapshot::default());
    }
}
