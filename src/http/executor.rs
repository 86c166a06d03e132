//! Retrying HTTP executor.
//!
//! # Data Flow
//! ```text
//! execute(spec)
//!     → concurrency slot (one per logical call)
//!     → loop per attempt:
//!         → limiter.acquire
//!         → token_provider.get_token
//!         → send, read body, classify status / transport error
//!         → record outcome (ClientStats, metrics)
//!         → plan_retry: wait and go again, or fail permanently
//! ```
//!
//! # Retry Rules
//! - 429: notify the limiter with the raw hints, wait the resolved backoff
//! - 401/403: invalidate the token once per call, retry immediately once
//! - 5xx, timeouts, connection errors: exponential backoff with jitter
//! - everything else is terminal
//!
//! No call makes more than `max_attempts` attempts.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::HeaderMap;
use url::Url;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::GuardConfig;
use crate::config::RetryConfig;
use crate::http::auth::TokenProvider;
use crate::http::headers::RateLimitHeaders;
use crate::http::request::RequestSpec;
use crate::http::response::{RequestError, RequestOutcome, RequestResult, SafeOutcome, UpstreamResponse};
use crate::http::stats::{ClientStats, ClientStatsSnapshot};
use crate::observability::metrics;
use crate::rate_limit::concurrency::ConcurrencyLimiter;
use crate::rate_limit::{secs_to_duration, RateLimiter};
use crate::resilience::backoff::{calculate_backoff, BackoffPolicy};
use crate::resilience::retries::{classify_status, is_auth_status, ErrorCategory};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Longest body excerpt copied into an error message.
const BODY_EXCERPT_LEN: usize = 200;

#[derive(Debug)]
pub struct RequestExecutor {
    name: String,
    client: reqwest::Client,
    base_url: Url,
    retry: RetryConfig,
    backoff: BackoffPolicy,
    default_backoff: f64,
    limiter: Option<Arc<dyn RateLimiter>>,
    limiter_timeout: Duration,
    concurrency: Option<Arc<ConcurrencyLimiter>>,
    concurrency_timeout: Duration,
    token_provider: Option<Arc<dyn TokenProvider>>,
    clock: Arc<dyn Clock>,
    stats: Arc<ClientStats>,
}

/// A raw HTTP response, before classification.
struct RawResponse {
    status: u16,
    headers: HeaderMap,
    body: Vec<u8>,
}

/// A failed attempt, ready for retry planning.
struct AttemptFailure {
    category: ErrorCategory,
    status: Option<u16>,
    throttle: RateLimitHeaders,
    message: String,
}

/// Per-call retry bookkeeping.
#[derive(Default)]
struct CallState {
    auth_refreshed: bool,
    last_retry_after: Option<f64>,
    last_reset: Option<f64>,
}

impl RequestExecutor {
    /// `name` identifies the upstream instance in logs and metrics.
    pub fn new(
        name: impl Into<String>,
        base_url: Url,
        config: &GuardConfig,
        clock: Arc<dyn Clock>,
    ) -> RequestResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(secs_to_duration(config.retries.request_timeout_secs))
            .build()
            .map_err(|e| RequestError::new(ErrorCategory::Exception, format!("failed to build HTTP client: {e}")))?;

        let name = name.into();
        let concurrency = config
            .concurrency
            .enabled
            .then(|| Arc::new(ConcurrencyLimiter::from_config(name.clone(), &config.concurrency)));

        Ok(Self {
            name,
            client,
            base_url: with_trailing_slash(base_url),
            retry: config.retries.clone(),
            backoff: BackoffPolicy::from_config(&config.backoff),
            default_backoff: config.backoff.default_backoff_secs,
            limiter: None,
            limiter_timeout: secs_to_duration(config.rate_limit.acquire_timeout_secs),
            concurrency,
            concurrency_timeout: secs_to_duration(config.concurrency.acquire_timeout_secs),
            token_provider: None,
            clock,
            stats: Arc::new(ClientStats::new()),
        })
    }

    pub fn with_limiter(mut self, limiter: Option<Arc<dyn RateLimiter>>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_concurrency_limiter(mut self, limiter: Arc<ConcurrencyLimiter>) -> Self {
        self.concurrency = Some(limiter);
        self
    }

    pub fn with_token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> &Arc<ClientStats> {
        &self.stats
    }

    pub fn stats_snapshot(&self) -> ClientStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn limiter(&self) -> Option<&Arc<dyn RateLimiter>> {
        self.limiter.as_ref()
    }

    pub fn concurrency_limiter(&self) -> Option<&Arc<ConcurrencyLimiter>> {
        self.concurrency.as_ref()
    }

    /// Like [`execute`](Self::execute) but never returns `Err`.
    pub async fn execute_safe(&self, spec: &RequestSpec) -> SafeOutcome {
        self.execute(spec).await.into()
    }

    /// Run one logical call with retries.
    pub async fn execute(&self, spec: &RequestSpec) -> RequestResult<UpstreamResponse> {
        let request_id = Uuid::new_v4();
        let started = Instant::now();
        let url = self.resolve_url(&spec.path)?;

        let _permit = match &self.concurrency {
            Some(limiter) => Some(limiter.acquire(self.concurrency_timeout).await.ok_or_else(|| {
                RequestError::new(ErrorCategory::Timeout, "timed out waiting for a concurrency slot")
            })?),
            None => None,
        };

        tracing::debug!(
            request_id = %request_id,
            upstream = %self.name,
            method = %spec.method,
            path = %spec.path,
            "Executing upstream request"
        );

        let mut call = CallState::default();
        let mut outcomes = Vec::new();
        let max_attempts = self.retry.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            if let Some(limiter) = &self.limiter {
                if !limiter.acquire(self.limiter_timeout).await {
                    tracing::warn!(request_id = %request_id, upstream = %self.name, attempt, "Rate limiter timed out");
                    return Err(RequestError::new(ErrorCategory::RateLimited, "timed out waiting for rate limiter")
                        .with_attempts(attempt - 1)
                        .with_throttle(call.last_retry_after, call.last_reset));
                }
            }

            let token = match &self.token_provider {
                Some(provider) => Some(provider.get_token().await.map_err(|e| {
                    RequestError::new(ErrorCategory::AuthError, e.to_string()).with_attempts(attempt - 1)
                })?),
                None => None,
            };

            let attempt_started = Instant::now();
            let sent = self.send_once(spec, &url, request_id, token.as_deref()).await;
            let duration = attempt_started.elapsed();

            let failure = match sent {
                Ok(raw) => match classify_status(raw.status) {
                    None => {
                        let rate_limit = RateLimitHeaders::from_headers(&raw.headers);
                        let outcome = RequestOutcome {
                            attempt,
                            status: Some(raw.status),
                            duration,
                            category: None,
                            retry_after: None,
                            rate_limit_reset: None,
                            rate_limit_remaining: rate_limit.remaining,
                        };
                        self.record(&outcome);
                        outcomes.push(outcome);

                        tracing::debug!(
                            request_id = %request_id,
                            upstream = %self.name,
                            status = raw.status,
                            attempts = attempt,
                            "Upstream request succeeded"
                        );
                        return Ok(UpstreamResponse {
                            request_id,
                            status: raw.status,
                            headers: raw.headers,
                            body: raw.body,
                            rate_limit,
                            outcomes,
                            elapsed: started.elapsed(),
                        });
                    }
                    Some(category) => AttemptFailure::from_response(category, raw),
                },
                Err(e) => AttemptFailure::from_transport(&e),
            };

            let throttled = failure.category == ErrorCategory::RateLimited;
            let outcome = RequestOutcome {
                attempt,
                status: failure.status,
                duration,
                category: Some(failure.category),
                retry_after: failure.throttle.retry_after.filter(|_| throttled),
                rate_limit_reset: failure.throttle.reset.filter(|_| throttled),
                rate_limit_remaining: failure.throttle.remaining,
            };
            self.record(&outcome);
            outcomes.push(outcome);

            match self.plan_retry(&failure, attempt, max_attempts, &mut call).await {
                Some(wait) => {
                    self.stats.record_retry();
                    metrics::record_retry(&self.name, failure.category);
                    tracing::info!(
                        request_id = %request_id,
                        upstream = %self.name,
                        attempt,
                        category = %failure.category,
                        status = ?failure.status,
                        delay = ?wait,
                        "Retrying upstream request"
                    );
                    if !wait.is_zero() {
                        self.clock.sleep(wait).await;
                    }
                }
                None => return Err(self.give_up(request_id, failure, attempt, &call)),
            }
        }

        // Every path through the last attempt returns; plan_retry refuses
        // once attempt == max_attempts.
        Err(RequestError::new(ErrorCategory::Exception, "retry loop exhausted").with_attempts(max_attempts))
    }

    /// Decide whether to try again and how long to wait first.
    async fn plan_retry(
        &self,
        failure: &AttemptFailure,
        attempt: u32,
        max_attempts: u32,
        call: &mut CallState,
    ) -> Option<Duration> {
        let attempts_left = attempt < max_attempts;

        match failure.category {
            ErrorCategory::RateLimited => {
                let RateLimitHeaders { retry_after, reset, .. } = failure.throttle;
                call.last_retry_after = retry_after;
                call.last_reset = reset;
                if let Some(limiter) = &self.limiter {
                    limiter.notify_rate_limit(retry_after, reset).await;
                }
                if !attempts_left {
                    return None;
                }
                let decision = self.backoff.resolve(
                    retry_after,
                    Some(ErrorCategory::RateLimited),
                    None,
                    self.default_backoff,
                );
                tracing::debug!(upstream = %self.name, seconds = decision.seconds, source = %decision.source, "Resolved throttle backoff");
                Some(secs_to_duration(decision.seconds.min(self.retry.max_wait_secs)))
            }
            ErrorCategory::AuthError | ErrorCategory::PermissionDenied => {
                let provider = self.token_provider.as_ref()?;
                if call.auth_refreshed || !attempts_left || !failure.status.is_some_and(is_auth_status) {
                    return None;
                }
                call.auth_refreshed = true;
                provider.invalidate().await;
                self.stats.record_auth_refresh();
                Some(Duration::ZERO)
            }
            ErrorCategory::ServerError | ErrorCategory::Timeout | ErrorCategory::Network => {
                if !attempts_left {
                    return None;
                }
                match failure.throttle.retry_after.filter(|secs| *secs > 0.0) {
                    Some(secs) => Some(secs_to_duration(secs.min(self.retry.max_wait_secs))),
                    None => Some(calculate_backoff(
                        attempt,
                        self.retry.base_delay_secs,
                        self.retry.max_delay_secs,
                    )),
                }
            }
            _ => None,
        }
    }

    fn give_up(&self, request_id: Uuid, failure: AttemptFailure, attempts: u32, call: &CallState) -> RequestError {
        tracing::warn!(
            request_id = %request_id,
            upstream = %self.name,
            attempts,
            category = %failure.category,
            status = ?failure.status,
            error = %failure.message,
            "Upstream request failed"
        );

        let mut error = RequestError::new(failure.category, failure.message).with_attempts(attempts);
        error.status = failure.status;
        if failure.category == ErrorCategory::RateLimited {
            error = error.with_throttle(call.last_retry_after, call.last_reset);
        }
        error
    }

    fn record(&self, outcome: &RequestOutcome) {
        self.stats.record(outcome);
        metrics::record_request(&self.name, outcome.status, outcome.category, outcome.duration);
    }

    fn resolve_url(&self, path: &str) -> RequestResult<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| RequestError::new(ErrorCategory::ValidationError, format!("invalid request path {path:?}: {e}")))
    }

    async fn send_once(
        &self,
        spec: &RequestSpec,
        url: &Url,
        request_id: Uuid,
        token: Option<&str>,
    ) -> Result<RawResponse, reqwest::Error> {
        let mut request = self
            .client
            .request(spec.method.clone(), url.clone())
            .header(REQUEST_ID_HEADER, request_id.to_string());
        if !spec.query.is_empty() {
            request = request.query(&spec.query);
        }
        for (name, value) in &spec.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = &spec.json {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();
        Ok(RawResponse { status, headers, body })
    }
}

impl AttemptFailure {
    fn from_response(category: ErrorCategory, raw: RawResponse) -> Self {
        let excerpt: String = String::from_utf8_lossy(&raw.body).chars().take(BODY_EXCERPT_LEN).collect();
        let message = if excerpt.trim().is_empty() {
            format!("HTTP {}", raw.status)
        } else {
            format!("HTTP {}: {}", raw.status, excerpt.trim())
        };
        Self {
            category,
            status: Some(raw.status),
            throttle: RateLimitHeaders::from_headers(&raw.headers),
            message,
        }
    }

    fn from_transport(error: &reqwest::Error) -> Self {
        let category = if error.is_timeout() {
            ErrorCategory::Timeout
        } else {
            ErrorCategory::Network
        };
        Self {
            category,
            status: None,
            throttle: RateLimitHeaders::default(),
            message: error.to_string(),
        }
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
