//! Time source shared by limiters, the retry engine and the circuit breaker.
//!
//! All timestamps are wall-clock seconds since the Unix epoch (`f64`), since
//! bucket and circuit snapshots are shared across processes and hosts.
//!
//! # Design Decisions
//! - Every sleep goes through the clock so tests can run retry loops and
//!   breaker timers without waiting
//! - `ManualClock` advances its own time on `sleep`

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

/// Current wall-clock time as epoch seconds.
pub fn epoch_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Source of "now" and of blocking waits.
#[async_trait]
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Epoch seconds.
    fn now(&self) -> f64;

    /// Wait for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Real time, backed by tokio timers.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> f64 {
        epoch_seconds()
    }

    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

/// A clock that only moves when told to (or when something sleeps on it).
#[derive(Debug)]
pub struct ManualClock {
    now_bits: AtomicU64,
    slept_bits: AtomicU64,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            now_bits: AtomicU64::new(start.to_bits()),
            slept_bits: AtomicU64::new(0f64.to_bits()),
        }
    }

    pub fn advance(&self, secs: f64) {
        Self::add(&self.now_bits, secs);
    }

    pub fn set(&self, now: f64) {
        self.now_bits.store(now.to_bits(), Ordering::SeqCst);
    }

    /// Total seconds spent in `sleep` so far.
    pub fn total_slept(&self) -> f64 {
        f64::from_bits(self.slept_bits.load(Ordering::SeqCst))
    }

    fn add(cell: &AtomicU64, secs: f64) {
        let mut current = cell.load(Ordering::SeqCst);
        loop {
            let next = (f64::from_bits(current) + secs).to_bits();
            match cell.compare_exchange_weak(current, next, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => break,
                Err(x) => current = x,
            }
        }
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.now_bits.load(Ordering::SeqCst))
    }

    async fn sleep(&self, duration: Duration) {
        let secs = duration.as_secs_f64();
        Self::add(&self.now_bits, secs);
        Self::add(&self.slept_bits, secs);
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn manual_clock_advances_on_sleep() {
        let clock = ManualClock::new(1_000.0);
        clock.sleep(Duration::from_millis(1500)).await;
        assert!((clock.now() - 1_001.5).abs() < 1e-9);
        assert!((clock.total_slept() - 1.5).abs() < 1e-9);

        clock.advance(10.0);
        assert!((clock.now() - 1_011.5).abs() < 1e-9);
        assert!((clock.total_slept() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn system_clock_is_close_to_epoch() {
        let now = SystemClock.now();
        assert!((now - epoch_seconds()).abs() < 1.0);
    }
}
