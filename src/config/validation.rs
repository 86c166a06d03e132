//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (rates in [0, 1], positive durations, attempts > 0)
//! - Check cross-field consistency (recovery count fits the probe allowance)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GuardConfig → Result<(), Vec<ValidationError>>

use thiserror::Error;

use crate::config::schema::GuardConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

fn check_rate(errors: &mut Vec<ValidationError>, field: &'static str, value: f64) {
    if !(0.0..=1.0).contains(&value) {
        errors.push(ValidationError::new(field, format!("must be within [0, 1], got {value}")));
    }
}

fn check_positive(errors: &mut Vec<ValidationError>, field: &'static str, value: f64) {
    if !(value.is_finite() && value > 0.0) {
        errors.push(ValidationError::new(field, format!("must be finite and > 0, got {value}")));
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let cb = &config.circuit_breaker;
    check_rate(&mut errors, "circuit_breaker.failure_rate_threshold", cb.failure_rate_threshold);
    check_rate(&mut errors, "circuit_breaker.rate_limit_threshold", cb.rate_limit_threshold);
    check_rate(&mut errors, "circuit_breaker.timeout_rate_threshold", cb.timeout_rate_threshold);
    if !(cb.smoothing_alpha > 0.0 && cb.smoothing_alpha <= 1.0) {
        errors.push(ValidationError::new(
            "circuit_breaker.smoothing_alpha",
            format!("must be within (0, 1], got {}", cb.smoothing_alpha),
        ));
    }
    if cb.open_duration_seconds < 0.0 {
        errors.push(ValidationError::new("circuit_breaker.open_duration_seconds", "must not be negative"));
    }
    if cb.recovery_success_count == 0 {
        errors.push(ValidationError::new("circuit_breaker.recovery_success_count", "must be >= 1"));
    }
    if cb.recovery_success_count > cb.half_open_max_requests {
        errors.push(ValidationError::new(
            "circuit_breaker.recovery_success_count",
            "cannot exceed half_open_max_requests",
        ));
    }
    if cb.degraded.degraded_batch_size > cb.degraded.normal_batch_size {
        errors.push(ValidationError::new(
            "circuit_breaker.degraded.degraded_batch_size",
            "cannot exceed normal_batch_size",
        ));
    }
    if cb.degraded.degraded_forward_window_seconds > cb.degraded.normal_forward_window_seconds {
        errors.push(ValidationError::new(
            "circuit_breaker.degraded.degraded_forward_window_seconds",
            "cannot exceed normal_forward_window_seconds",
        ));
    }

    let rl = &config.rate_limit;
    check_positive(&mut errors, "rate_limit.requests_per_second", rl.requests_per_second);
    if rl.burst_size == 0 {
        errors.push(ValidationError::new("rate_limit.burst_size", "must be >= 1"));
    }
    check_positive(&mut errors, "rate_limit.max_pause_secs", rl.max_pause_secs);

    let retries = &config.retries;
    if retries.max_attempts == 0 {
        errors.push(ValidationError::new("retries.max_attempts", "must be >= 1"));
    }
    check_positive(&mut errors, "retries.base_delay_secs", retries.base_delay_secs);
    if retries.max_delay_secs.is_nan() || retries.max_delay_secs < retries.base_delay_secs {
        errors.push(ValidationError::new("retries.max_delay_secs", "cannot be below base_delay_secs"));
    }
    check_positive(&mut errors, "retries.request_timeout_secs", retries.request_timeout_secs);

    if config.backoff.default_backoff_secs < 0.0 {
        errors.push(ValidationError::new("backoff.default_backoff_secs", "must not be negative"));
    }
    for (category, secs) in &config.backoff.category_defaults {
        if *secs < 0.0 {
            errors.push(ValidationError::new(
                "backoff.category_defaults",
                format!("{category} must not be negative"),
            ));
        }
    }

    if config.concurrency.enabled && config.concurrency.max_concurrency == 0 {
        errors.push(ValidationError::new("concurrency.max_concurrency", "must be >= 1"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
