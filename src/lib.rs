//! Resilience control plane for workers syncing from upstream
//! source-control APIs.
//!
//! # Layout
//! - `resilience`: circuit breakers, failure taxonomy, backoff
//! - `rate_limit`: local, shared and composite token buckets, concurrency cap
//! - `http`: the retrying request executor
//! - `store`: versioned state shared between worker processes
//! - `windows`: chunking of time and revision ranges
//! - `config`, `observability`, `clock`: ambient plumbing

pub mod clock;
pub mod config;
pub mod http;
pub mod observability;
pub mod rate_limit;
pub mod resilience;
pub mod store;
pub mod windows;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::GuardConfig;
pub use http::{RequestError, RequestExecutor, RequestSpec, SafeOutcome};
pub use rate_limit::{CompositeLimiter, LimiterRegistry, RateLimiter, SharedBucketLimiter, TokenBucketLimiter};
pub use resilience::{CircuitBreakerController, CircuitDecision, CircuitKey, CircuitRegistry, CircuitState, ErrorCategory};
pub use store::{FileStateStore, MemoryStateStore, StateStore};
