//! Outbound HTTP to upstream source-control APIs.
//!
//! # Data Flow
//! ```text
//! RequestSpec
//!     → executor.rs (limiters, token, send, classify, retry)
//!     → headers.rs (Retry-After / RateLimit-* hints)
//!     → stats.rs (per-attempt counters)
//!     → UpstreamResponse | RequestError | SafeOutcome (response.rs)
//! ```
//!
//! # Design Decisions
//! - One request ID per logical call, sent on every attempt
//! - Limiters get the raw throttle hints, never a pre-resolved wait
//! - Sleeps go through the injected `Clock`

pub mod auth;
pub mod executor;
pub mod headers;
pub mod request;
pub mod response;
pub mod stats;

pub use auth::{CachingTokenProvider, StaticTokenProvider, TokenError, TokenProvider, TokenSource};
pub use executor::RequestExecutor;
pub use headers::RateLimitHeaders;
pub use request::RequestSpec;
pub use response::{RequestError, RequestOutcome, RequestResult, SafeOutcome, UpstreamResponse};
pub use stats::{ClientStats, ClientStatsSnapshot};
