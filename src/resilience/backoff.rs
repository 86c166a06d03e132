//! Wait-time resolution and exponential backoff with jitter.
//!
//! # Resolution Order
//! ```text
//! retry_after > 0            → retry_after verbatim   (source = retry_after)
//! category has a default     → category default       (source = <category>)
//! otherwise                  → default_backoff        (source = default)
//! ```
//!
//! An explicit upstream signal always beats local policy, which always beats
//! the global default.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use rand::Rng;
use serde::{Serialize, Serializer};

use crate::config::BackoffConfig;
use crate::resilience::retries::ErrorCategory;

/// Where a resolved wait came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffSource {
    RetryAfter,
    Category(ErrorCategory),
    Default,
}

impl fmt::Display for BackoffSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackoffSource::RetryAfter => f.write_str("retry_after"),
            BackoffSource::Category(category) => write!(f, "{category}"),
            BackoffSource::Default => f.write_str("default"),
        }
    }
}

impl Serialize for BackoffSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A resolved wait.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BackoffDecision {
    pub seconds: f64,
    pub source: BackoffSource,
}

impl BackoffDecision {
    pub fn duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.seconds.max(0.0)).unwrap_or(Duration::MAX)
    }
}

/// Category-aware wait resolution.
#[derive(Debug, Clone, Default)]
pub struct BackoffPolicy {
    category_defaults: HashMap<ErrorCategory, f64>,
}

impl BackoffPolicy {
    pub fn new(category_defaults: HashMap<ErrorCategory, f64>) -> Self {
        Self { category_defaults }
    }

    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(config.category_defaults.clone())
    }

    pub fn category_default(&self, category: ErrorCategory) -> Option<f64> {
        self.category_defaults.get(&category).copied()
    }

    /// Resolve how long to wait before the next attempt.
    ///
    /// `retry_after` values that are zero, negative or NaN count as absent.
    /// When `error_category` is `None` the category is inferred from
    /// `error_message`.
    pub fn resolve(
        &self,
        retry_after: Option<f64>,
        error_category: Option<ErrorCategory>,
        error_message: Option<&str>,
        default_backoff: f64,
    ) -> BackoffDecision {
        if let Some(secs) = retry_after.filter(|s| *s > 0.0) {
            return BackoffDecision {
                seconds: secs,
                source: BackoffSource::RetryAfter,
            };
        }

        let category = error_category.or_else(|| error_message.and_then(infer_category));
        if let Some(category) = category {
            if let Some(secs) = self.category_default(category) {
                return BackoffDecision {
                    seconds: secs,
                    source: BackoffSource::Category(category),
                };
            }
        }

        BackoffDecision {
            seconds: default_backoff.max(0.0),
            source: BackoffSource::Default,
        }
    }
}

/// Infer a category from free-form error text.
pub fn infer_category(message: &str) -> Option<ErrorCategory> {
    let lower = message.to_ascii_lowercase();
    let codes = status_codes(&lower);
    let has_code = |code: u16| codes.contains(&code);

    if lower.contains("timeout") || lower.contains("timed out") {
        Some(ErrorCategory::Timeout)
    } else if has_code(401) || lower.contains("unauthorized") {
        Some(ErrorCategory::AuthError)
    } else if has_code(403) || lower.contains("forbidden") {
        Some(ErrorCategory::PermissionDenied)
    } else if has_code(404) || lower.contains("not found") {
        Some(ErrorCategory::RepoNotFound)
    } else if has_code(429) || lower.contains("rate limit") {
        Some(ErrorCategory::RateLimited)
    } else if codes.iter().any(|c| (500..600).contains(c)) {
        Some(ErrorCategory::ServerError)
    } else {
        None
    }
}

/// Every standalone three-digit number in `text`.
fn status_codes(text: &str) -> Vec<u16> {
    text.split(|c: char| !c.is_ascii_digit())
        .filter(|run| run.len() == 3)
        .filter_map(|run| run.parse().ok())
        .collect()
}

/// Calculate exponential backoff delay with jitter.
///
/// `min(base * 2^(attempt-1), max) + uniform(0, base)`, attempt is 1-indexed.
pub fn calculate_backoff(attempt: u32, base_secs: f64, max_secs: f64) -> Duration {
    let attempt = attempt.max(1);
    let base = base_secs.max(0.0);

    let exponent = (attempt - 1).min(62) as i32;
    let capped_delay = (base * 2f64.powi(exponent)).min(max_secs.max(0.0));

    let jitter = if base > 0.0 && base.is_finite() {
        rand::thread_rng().gen_range(0.0..base)
    } else {
        0.0
    };

    Duration::try_from_secs_f64(capped_delay + jitter).unwrap_or(Duration::MAX)
}
