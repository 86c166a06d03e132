//! In-flight request cap.
//!
//! One slot covers a whole logical call, retries included. Slots are RAII
//! permits; dropping the permit releases the slot.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::ConcurrencyConfig;
use crate::observability::metrics;

#[derive(Debug)]
pub struct ConcurrencyLimiter {
    name: String,
    semaphore: Arc<Semaphore>,
    max_concurrency: usize,
    active: AtomicUsize,
    peak: AtomicUsize,
    acquired: AtomicU64,
    timeouts: AtomicU64,
    wait_micros: AtomicU64,
}

/// Counters exposed for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConcurrencyStats {
    pub max_concurrency: usize,
    pub active: usize,
    pub peak_active: usize,
    pub acquired: u64,
    pub timeouts: u64,
    pub average_wait_seconds: f64,
}

impl ConcurrencyLimiter {
    pub fn new(name: impl Into<String>, max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            name: name.into(),
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            acquired: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            wait_micros: AtomicU64::new(0),
        }
    }

    pub fn from_config(name: impl Into<String>, config: &ConcurrencyConfig) -> Self {
        Self::new(name, config.max_concurrency)
    }

    /// Wait up to `timeout` for a slot. `None` on timeout.
    pub async fn acquire(self: &Arc<Self>, timeout: Duration) -> Option<ConcurrencyPermit> {
        let started = Instant::now();
        let permit = match tokio::time::timeout(timeout, self.semaphore.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            // The semaphore is never closed, so an error only means timeout.
            Ok(Err(_)) | Err(_) => {
                self.timeouts.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(limiter = %self.name, timeout_ms = timeout.as_millis() as u64, "Timed out waiting for concurrency slot");
                return None;
            }
        };

        let waited = started.elapsed();
        self.wait_micros.fetch_add(waited.as_micros() as u64, Ordering::Relaxed);
        self.acquired.fetch_add(1, Ordering::Relaxed);

        let active = self.active.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak.fetch_max(active, Ordering::Relaxed);
        metrics::record_concurrency_active(&self.name, active);

        Some(ConcurrencyPermit {
            limiter: self.clone(),
            _permit: permit,
        })
    }

    pub fn stats(&self) -> ConcurrencyStats {
        let acquired = self.acquired.load(Ordering::Relaxed);
        let wait = self.wait_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        ConcurrencyStats {
            max_concurrency: self.max_concurrency,
            active: self.active.load(Ordering::Relaxed),
            peak_active: self.peak.load(Ordering::Relaxed),
            acquired,
            timeouts: self.timeouts.load(Ordering::Relaxed),
            average_wait_seconds: if acquired == 0 { 0.0 } else { wait / acquired as f64 },
        }
    }

    fn release(&self) {
        let active = self.active.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        metrics::record_concurrency_active(&self.name, active);
    }
}

/// Holds one concurrency slot until dropped.
#[derive(Debug)]
pub struct ConcurrencyPermit {
    limiter: Arc<ConcurrencyLimiter>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for ConcurrencyPermit {
    fn drop(&mut self) {
        self.limiter.release();
    }
}
