//! Results of upstream calls.
//!
//! # Design Decisions
//! - Failures carry their category, status and raw throttle hints so callers
//!   never re-parse headers or match on message text
//! - `SafeOutcome` is the non-unwinding form for scan loops

use std::time::Duration;

use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::http::headers::RateLimitHeaders;
use crate::resilience::retries::ErrorCategory;

/// One HTTP attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestOutcome {
    pub attempt: u32,
    /// `None` for transport failures.
    pub status: Option<u16>,
    pub duration: Duration,
    /// `None` on success.
    pub category: Option<ErrorCategory>,
    /// Only set for `rate_limited`.
    pub retry_after: Option<f64>,
    /// Only set for `rate_limited`. Absolute epoch seconds.
    pub rate_limit_reset: Option<f64>,
    pub rate_limit_remaining: Option<u64>,
}

/// A successful response.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub request_id: Uuid,
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub rate_limit: RateLimitHeaders,
    /// Every attempt made, the last one being this response.
    pub outcomes: Vec<RequestOutcome>,
    pub elapsed: Duration,
}

impl UpstreamResponse {
    pub fn attempts(&self) -> u32 {
        self.outcomes.len() as u32
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> RequestResult<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            RequestError::new(ErrorCategory::Exception, format!("invalid JSON body: {e}"))
                .with_status(self.status)
                .with_attempts(self.attempts())
        })
    }
}

/// A failed logical call.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("{category} after {attempts} attempt(s): {message}")]
pub struct RequestError {
    pub category: ErrorCategory,
    pub status: Option<u16>,
    /// Raw `Retry-After` of the last throttled attempt.
    pub retry_after: Option<f64>,
    /// Raw `RateLimit-Reset` of the last throttled attempt.
    pub rate_limit_reset: Option<f64>,
    pub attempts: u32,
    pub message: String,
}

impl RequestError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            status: None,
            retry_after: None,
            rate_limit_reset: None,
            attempts: 0,
            message: message.into(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_throttle(mut self, retry_after: Option<f64>, rate_limit_reset: Option<f64>) -> Self {
        self.retry_after = retry_after;
        self.rate_limit_reset = rate_limit_reset;
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.category.is_retryable()
    }
}

/// Result type for executor operations.
pub type RequestResult<T> = Result<T, RequestError>;

/// Tagged result of a "safe" call.
#[derive(Debug, Clone)]
pub enum SafeOutcome {
    Success(UpstreamResponse),
    Failure(RequestError),
}

impl SafeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SafeOutcome::Success(_))
    }

    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            SafeOutcome::Success(_) => None,
            SafeOutcome::Failure(e) => Some(e.category),
        }
    }

    pub fn into_result(self) -> RequestResult<UpstreamResponse> {
        self.into()
    }
}

impl From<RequestResult<UpstreamResponse>> for SafeOutcome {
    fn from(result: RequestResult<UpstreamResponse>) -> Self {
        match result {
            Ok(response) => SafeOutcome::Success(response),
            Err(error) => SafeOutcome::Failure(error),
        }
    }
}

impl From<SafeOutcome> for RequestResult<UpstreamResponse> {
    fn from(outcome: SafeOutcome) -> Self {
        match outcome {
            SafeOutcome::Success(response) => Ok(response),
            SafeOutcome::Failure(error) => Err(error),
        }
    }
}
