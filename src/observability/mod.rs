//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Breakers, limiters and the executor produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters, gauges, histograms via the metrics facade)
//!
//! Consumers:
//!     → stdout / log aggregation
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Every state transition, retry and pause emits one structured event
//! - Metric calls are no-ops until a recorder is installed
//! - Request IDs are attached to every executor event

pub mod logging;
pub mod metrics;
