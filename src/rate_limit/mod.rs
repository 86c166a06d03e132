//! Outgoing request throttling.
//!
//! # Data Flow
//! ```text
//! RequestExecutor, before each attempt:
//!     → CompositeLimiter::acquire (every member must admit, in order)
//!         → token_bucket.rs  (process-local bucket)
//!         → shared_bucket.rs (bucket row in the StateStore)
//!
//! On 429 from upstream:
//!     → CompositeLimiter::notify_rate_limit(retry_after, reset)
//!         → forwarded to every member, each extends its own pause
//!
//! Around each logical call:
//!     → concurrency.rs (semaphore slot shared by all attempts)
//! ```
//!
//! # Design Decisions
//! - Members are independent budgets; none is refunded if a later one refuses
//! - Pauses only ever grow while in the future (monotonic extension)
//! - The shared bucket is an approximate throttle: races are tolerated

pub mod bucket;
pub mod composite;
pub mod concurrency;
pub mod registry;
pub mod shared_bucket;
pub mod token_bucket;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

pub use bucket::{BucketState, PauseSource};
pub use composite::CompositeLimiter;
pub use concurrency::{ConcurrencyLimiter, ConcurrencyPermit, ConcurrencyStats};
pub use registry::LimiterRegistry;
pub use shared_bucket::SharedBucketLimiter;
pub use token_bucket::TokenBucketLimiter;

/// Common contract for every limiter.
#[async_trait]
pub trait RateLimiter: Send + Sync + std::fmt::Debug {
    /// Wait up to `timeout` for permission to send one request.
    async fn acquire(&self, timeout: Duration) -> bool;

    /// Upstream said "slow down". Both signals are raw header values.
    async fn notify_rate_limit(&self, retry_after: Option<f64>, reset_time: Option<f64>);

    async fn stats(&self) -> LimiterStats;
}

/// Diagnostics for one limiter (and its members, for composites).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LimiterStats {
    pub name: String,
    pub rate: f64,
    pub burst: f64,
    pub tokens: f64,
    pub paused_until: Option<f64>,
    pub pause_source: PauseSource,
    pub rate_limit_hits: u64,
    pub acquired: u64,
    pub rejected: u64,
    pub total_wait_seconds: f64,
    pub members: Vec<LimiterStats>,
}

/// Acquisition counters kept in-process by every limiter.
#[derive(Debug, Default)]
pub(crate) struct AcquireCounters {
    acquired: AtomicU64,
    rejected: AtomicU64,
    wait_micros: AtomicU64,
}

impl AcquireCounters {
    pub(crate) fn record(&self, admitted: bool, waited_secs: f64) {
        if admitted {
            self.acquired.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
        }
        let micros = (waited_secs.max(0.0) * 1_000_000.0) as u64;
        self.wait_micros.fetch_add(micros, Ordering::Relaxed);
    }

    pub(crate) fn fill(&self, stats: &mut LimiterStats) {
        stats.acquired = self.acquired.load(Ordering::Relaxed);
        stats.rejected = self.rejected.load(Ordering::Relaxed);
        stats.total_wait_seconds = self.wait_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;
    }
}

/// Small slack so float drift does not turn an exact fit into a rejection.
pub(crate) const DEADLINE_SLACK: f64 = 1e-6;

pub(crate) fn secs_to_duration(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
}
