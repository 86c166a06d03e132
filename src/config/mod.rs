//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GuardConfig (validated, immutable)
//!     → published through ConfigHandle
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → atomic swap inside ConfigHandle
//!     → LimiterRegistry rebuilds a limiter on its next `get`
//!     → CircuitRegistry applies new thresholds on the next breaker call
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

use std::sync::Arc;

use arc_swap::ArcSwap;

pub use schema::{
    BackoffConfig, CircuitBreakerConfig, ConcurrencyConfig, DegradedModeConfig, GuardConfig,
    ObservabilityConfig, RateLimitConfig, RetryConfig, StoreConfig,
};

/// Shared, atomically replaceable view of the current configuration.
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    inner: Arc<ArcSwap<GuardConfig>>,
}

impl ConfigHandle {
    pub fn new(config: GuardConfig) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(config)),
        }
    }

    /// Snapshot of the configuration in effect right now.
    pub fn current(&self) -> Arc<GuardConfig> {
        self.inner.load_full()
    }

    pub fn replace(&self, config: GuardConfig) {
        self.inner.store(Arc::new(config));
    }
}
