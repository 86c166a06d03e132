//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Scheduler, before picking work for an upstream:
//!     → circuit_key.rs (which breaker guards this work)
//!     → registry.rs (load / persist the breaker snapshot)
//!     → circuit_breaker.rs (decision: allow, degrade, probe or wait)
//!
//! Request executor, after a failed attempt:
//!     → retries.rs (classify, decide whether to retry)
//!     → backoff.rs (how long to wait, and why)
//! ```
//!
//! # Design Decisions
//! - Explicit upstream signals beat local policy, which beats the default
//! - Breaker trips are decisions, never errors
//! - Health input is typed and validated before thresholds see it

pub mod backoff;
pub mod circuit_breaker;
pub mod circuit_key;
pub mod health;
pub mod registry;
pub mod retries;

pub use backoff::{calculate_backoff, BackoffDecision, BackoffPolicy, BackoffSource};
pub use circuit_breaker::{CircuitBreakerController, CircuitDecision, CircuitSnapshot, CircuitState, DiffMode};
pub use circuit_key::{CircuitKey, CircuitScope};
pub use health::HealthStats;
pub use registry::CircuitRegistry;
pub use retries::{classify_status, ErrorCategory};
