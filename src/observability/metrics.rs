//! Metrics collection and exposition.
//!
//! # Metrics
//! - `upstream_requests_total` (counter): attempts by upstream, status class, category
//! - `upstream_request_duration_seconds` (histogram): attempt latency
//! - `upstream_retries_total` (counter): scheduled retries by category
//! - `upstream_rate_limit_hits_total` (counter): throttle signals by limiter
//! - `circuit_transitions_total` (counter): breaker transitions by key, from, to
//! - `limiter_wait_seconds` (histogram): time spent waiting for a token
//! - `concurrency_active` (gauge): in-flight logical calls
//!
//! # Design Decisions
//! - Thin wrappers so call sites never spell metric names
//! - Recorder is optional; without one every call is a no-op

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::ObservabilityConfig;
use crate::resilience::circuit_breaker::CircuitState;
use crate::resilience::retries::ErrorCategory;

/// Errors from exporter setup.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("invalid metrics address {0:?}")]
    Address(String),

    #[error("failed to install Prometheus exporter: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), MetricsError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Prometheus exporter listening");
    Ok(())
}

/// Install the exporter if the config asks for it. Must run inside a tokio runtime.
pub fn init_from_config(config: &ObservabilityConfig) -> Result<(), MetricsError> {
    if !config.metrics_enabled {
        return Ok(());
    }
    let addr = config
        .metrics_address
        .parse()
        .map_err(|_| MetricsError::Address(config.metrics_address.clone()))?;
    init_metrics(addr)
}

fn status_class(status: Option<u16>) -> &'static str {
    match status {
        Some(100..=199) => "1xx",
        Some(200..=299) => "2xx",
        Some(300..=399) => "3xx",
        Some(400..=499) => "4xx",
        Some(500..=599) => "5xx",
        Some(_) => "other",
        None => "none",
    }
}

/// One HTTP attempt. `status` is `None` for transport failures.
pub fn record_request(upstream: &str, status: Option<u16>, category: Option<ErrorCategory>, duration: Duration) {
    let category = category.map_or("none", ErrorCategory::as_str);
    metrics::counter!(
        "upstream_requests_total",
        "upstream" => upstream.to_string(),
        "status" => status_class(status),
        "category" => category
    )
    .increment(1);
    metrics::histogram!("upstream_request_duration_seconds", "upstream" => upstream.to_string())
        .record(duration.as_secs_f64());
}

pub fn record_retry(upstream: &str, category: ErrorCategory) {
    metrics::counter!(
        "upstream_retries_total",
        "upstream" => upstream.to_string(),
        "category" => category.as_str()
    )
    .increment(1);
}

pub fn record_rate_limit_hit(limiter: &str) {
    metrics::counter!("upstream_rate_limit_hits_total", "limiter" => limiter.to_string()).increment(1);
}

pub fn record_circuit_transition(key: &str, from: CircuitState, to: CircuitState) {
    metrics::counter!(
        "circuit_transitions_total",
        "key" => key.to_string(),
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
}

pub fn record_limiter_wait(limiter: &str, seconds: f64) {
    metrics::histogram!("limiter_wait_seconds", "limiter" => limiter.to_string()).record(seconds);
}

pub fn record_concurrency_active(limiter: &str, active: usize) {
    metrics::gauge!("concurrency_active", "limiter" => limiter.to_string()).set(active as f64);
}
