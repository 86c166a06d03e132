//! Failure classification and retry eligibility.
//!
//! # Responsibilities
//! - Name every failure category the control plane reasons about
//! - Map HTTP statuses and transport errors onto categories
//! - Decide which categories the executor may retry locally
//!
//! # Design Decisions
//! - Categories serialize as snake_case strings so they can key config maps
//! - `rate_limit` / `not_found` are accepted as aliases when parsing
//! - 401/403 are retried at most once, and only after a token refresh

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Failure taxonomy shared by the executor, backoff policy and breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    RateLimited,
    AuthError,
    PermissionDenied,
    ServerError,
    Timeout,
    Network,
    RepoNotFound,
    Exception,
    LeaseLost,
    ValidationError,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 10] = [
        ErrorCategory::RateLimited,
        ErrorCategory::AuthError,
        ErrorCategory::PermissionDenied,
        ErrorCategory::ServerError,
        ErrorCategory::Timeout,
        ErrorCategory::Network,
        ErrorCategory::RepoNotFound,
        ErrorCategory::Exception,
        ErrorCategory::LeaseLost,
        ErrorCategory::ValidationError,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::RateLimited => "rate_limited",
            ErrorCategory::AuthError => "auth_error",
            ErrorCategory::PermissionDenied => "permission_denied",
            ErrorCategory::ServerError => "server_error",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Network => "network",
            ErrorCategory::RepoNotFound => "repo_not_found",
            ErrorCategory::Exception => "exception",
            ErrorCategory::LeaseLost => "lease_lost",
            ErrorCategory::ValidationError => "validation_error",
        }
    }

    /// Categories the executor retries with backoff.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorCategory::RateLimited
                | ErrorCategory::ServerError
                | ErrorCategory::Timeout
                | ErrorCategory::Network
        )
    }

    /// Categories that count as a timeout for health statistics.
    pub fn is_timeout(self) -> bool {
        matches!(self, ErrorCategory::Timeout)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown category name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown error category: {0}")]
pub struct UnknownCategory(pub String);

impl FromStr for ErrorCategory {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let category = match s.trim().to_ascii_lowercase().as_str() {
            "rate_limited" | "rate_limit" => ErrorCategory::RateLimited,
            "auth_error" => ErrorCategory::AuthError,
            "permission_denied" => ErrorCategory::PermissionDenied,
            "server_error" => ErrorCategory::ServerError,
            "timeout" => ErrorCategory::Timeout,
            "network" => ErrorCategory::Network,
            "repo_not_found" | "not_found" => ErrorCategory::RepoNotFound,
            "exception" => ErrorCategory::Exception,
            "lease_lost" => ErrorCategory::LeaseLost,
            "validation_error" => ErrorCategory::ValidationError,
            other => return Err(UnknownCategory(other.to_string())),
        };
        Ok(category)
    }
}

impl Serialize for ErrorCategory {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ErrorCategory {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Category for a non-success HTTP status. `None` for 1xx-3xx.
pub fn classify_status(status: u16) -> Option<ErrorCategory> {
    match status {
        100..=399 => None,
        429 => Some(ErrorCategory::RateLimited),
        401 => Some(ErrorCategory::AuthError),
        403 => Some(ErrorCategory::PermissionDenied),
        404 | 410 => Some(ErrorCategory::RepoNotFound),
        400 | 409 | 422 => Some(ErrorCategory::ValidationError),
        408 | 504 => Some(ErrorCategory::Timeout),
        500..=599 => Some(ErrorCategory::ServerError),
        _ => Some(ErrorCategory::Exception),
    }
}

/// Whether a status may be answered by refreshing credentials once.
pub fn is_auth_status(status: u16) -> bool {
    status == 401 || status == 403
}
