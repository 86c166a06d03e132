//! Throttle hints carried in upstream response headers.
//!
//! Missing or unparseable headers are absent, never errors.

use reqwest::header::HeaderMap;
use serde::Serialize;

pub const RETRY_AFTER: &str = "retry-after";
pub const RATE_LIMIT_RESET: &str = "ratelimit-reset";
pub const RATE_LIMIT_REMAINING: &str = "ratelimit-remaining";

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RateLimitHeaders {
    /// Relative seconds.
    pub retry_after: Option<f64>,
    /// Absolute epoch seconds.
    pub reset: Option<f64>,
    pub remaining: Option<u64>,
}

impl RateLimitHeaders {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim);
        Self {
            retry_after: text(RETRY_AFTER).and_then(parse_seconds),
            reset: text(RATE_LIMIT_RESET).and_then(parse_seconds),
            remaining: text(RATE_LIMIT_REMAINING).and_then(|v| v.parse().ok()),
        }
    }
}

/// Integer or float seconds. HTTP dates and garbage are absent.
fn parse_seconds(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn parses_integer_and_float_values() {
        let mut headers = HeaderMap::new();
        headers.insert("Retry-After", HeaderValue::from_static("2.5"));
        headers.insert("RateLimit-Reset", HeaderValue::from_static("1700000060"));
        headers.insert("RateLimit-Remaining", HeaderValue::from_static(" 0 "));

        let parsed = RateLimitHeaders::from_headers(&headers);
        assert_eq!(parsed.retry_after, Some(2.5));
        assert_eq!(parsed.reset, Some(1_700_000_060.0));
        assert_eq!(parsed.remaining, Some(0));
    }

    #[test]
    fn unparseable_values_are_absent() {
        let mut headers = HeaderMap::new();
        headers.insert("Retry-After", HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        headers.insert("RateLimit-Reset", HeaderValue::from_static("NaN"));
        headers.insert("RateLimit-Remaining", HeaderValue::from_static("-1"));

        assert_eq!(RateLimitHeaders::from_headers(&headers), RateLimitHeaders::default());
        assert_eq!(RateLimitHeaders::from_headers(&HeaderMap::new()), RateLimitHeaders::default());
    }
}
