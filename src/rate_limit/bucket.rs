//! Token bucket state shared by the local and store-backed limiters.

use serde::{Deserialize, Serialize};

/// Tolerance for float drift when checking for a whole token.
const TOKEN_EPSILON: f64 = 1e-9;

/// What set the current pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseSource {
    RetryAfter,
    RateLimitReset,
    Default,
    #[default]
    None,
}

/// Result of applying a throttle signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PauseUpdate {
    pub paused_until: f64,
    pub source: PauseSource,
    /// False when an existing, later pause was kept.
    pub changed: bool,
}

/// Token bucket record. Times are epoch seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketState {
    pub tokens: f64,
    pub last_refill: f64,
    pub rate: f64,
    pub burst: f64,
    pub paused_until: Option<f64>,
    #[serde(default)]
    pub pause_source: PauseSource,
    #[serde(default)]
    pub rate_limit_hits: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_key: Option<String>,
}

impl BucketState {
    /// A full bucket.
    pub fn new(rate: f64, burst: f64, now: f64) -> Self {
        Self {
            tokens: burst,
            last_refill: now,
            rate,
            burst,
            paused_until: None,
            pause_source: PauseSource::None,
            rate_limit_hits: 0,
            instance_key: None,
        }
    }

    pub fn refill(&mut self, now: f64) {
        let elapsed = (now - self.last_refill).max(0.0);
        self.tokens = (self.tokens + elapsed * self.rate).min(self.burst);
        if now > self.last_refill {
            self.last_refill = now;
        }
    }

    pub fn is_paused(&self, now: f64) -> bool {
        self.paused_until.is_some_and(|until| now < until)
    }

    /// Take one token, or report how many seconds until one could be taken.
    pub fn try_take(&mut self, now: f64) -> Result<(), f64> {
        self.refill(now);
        if let Some(until) = self.paused_until.filter(|until| now < *until) {
            return Err(until - now);
        }
        if self.tokens + TOKEN_EPSILON >= 1.0 {
            self.tokens = (self.tokens - 1.0).max(0.0);
            return Ok(());
        }
        if self.rate > 0.0 {
            Err((1.0 - self.tokens) / self.rate)
        } else {
            Err(f64::INFINITY)
        }
    }

    /// Apply an upstream throttle signal. Never shortens a pause that is
    /// still in the future.
    pub fn apply_pause(
        &mut self,
        now: f64,
        retry_after: Option<f64>,
        reset_time: Option<f64>,
        default_pause: f64,
        max_pause: f64,
    ) -> PauseUpdate {
        self.rate_limit_hits += 1;
        let (delay, source) = resolve_pause(now, retry_after, reset_time, default_pause, max_pause);
        let candidate = now + delay;

        if let Some(existing) = self.paused_until.filter(|until| *until > now) {
            if existing >= candidate {
                return PauseUpdate {
                    paused_until: existing,
                    source: self.pause_source,
                    changed: false,
                };
            }
        }

        self.paused_until = Some(candidate);
        self.pause_source = source;
        PauseUpdate {
            paused_until: candidate,
            source,
            changed: true,
        }
    }
}

/// Relative pause for a throttle signal: `retry_after`, else
/// `reset_time - now`, else `default_pause`; clamped to `[0, max_pause]`.
pub fn resolve_pause(
    now: f64,
    retry_after: Option<f64>,
    reset_time: Option<f64>,
    default_pause: f64,
    max_pause: f64,
) -> (f64, PauseSource) {
    let (raw, source) = if let Some(secs) = retry_after {
        (secs, PauseSource::RetryAfter)
    } else if let Some(reset) = reset_time {
        (reset - now, PauseSource::RateLimitReset)
    } else {
        (default_pause, PauseSource::Default)
    };
    let delay = if raw.is_nan() { 0.0 } else { raw.clamp(0.0, max_pause.max(0.0)) };
    (delay, source)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: f64 = 1_700_000_000.0;

    #[test]
    fn refill_is_capped_at_burst() {
        let mut bucket = BucketState::new(2.0, 4.0, NOW);
        bucket.tokens = 0.0;
        bucket.refill(NOW + 1.0);
        assert_eq!(bucket.tokens, 2.0);
        bucket.refill(NOW + 10.0);
        assert_eq!(bucket.tokens, 4.0);
    }

    #[test]
    fn empty_bucket_reports_wait() {
        let mut bucket = BucketState::new(4.0, 1.0, NOW);
        assert!(bucket.try_take(NOW).is_ok());
        assert_eq!(bucket.try_take(NOW), Err(0.25));
        assert!(bucket.try_take(NOW + 0.25).is_ok());
    }

    #[test]
    fn pause_priority() {
        assert_eq!(resolve_pause(NOW, Some(5.0), Some(NOW + 100.0), 1.0, 3600.0), (5.0, PauseSource::RetryAfter));
        assert_eq!(resolve_pause(NOW, None, Some(NOW + 100.0), 1.0, 3600.0), (100.0, PauseSource::RateLimitReset));
        assert_eq!(resolve_pause(NOW, None, None, 1.0, 3600.0), (1.0, PauseSource::Default));
    }

    #[test]
    fn pause_is_clamped() {
        assert_eq!(resolve_pause(NOW, Some(-10.0), None, 1.0, 3600.0).0, 0.0);
        assert_eq!(resolve_pause(NOW, Some(86_400.0), None, 1.0, 3600.0).0, 3600.0);
        assert_eq!(resolve_pause(NOW, Some(f64::NAN), None, 1.0, 3600.0).0, 0.0);
        assert_eq!(resolve_pause(NOW, None, Some(NOW - 50.0), 1.0, 3600.0).0, 0.0);
    }

    #[test]
    fn later_smaller_signal_never_shortens_pause() {
        let mut bucket = BucketState::new(1.0, 1.0, NOW);
        let first = bucket.apply_pause(NOW, Some(30.0), None, 1.0, 3600.0);
        assert!(first.changed);

        let second = bucket.apply_pause(NOW + 1.0, Some(5.0), None, 1.0, 3600.0);
        assert!(!second.changed);
        assert_eq!(bucket.paused_until, Some(NOW + 30.0));
        assert_eq!(bucket.pause_source, PauseSource::RetryAfter);

        let third = bucket.apply_pause(NOW + 2.0, None, Some(NOW + 60.0), 1.0, 3600.0);
        assert!(third.changed);
        assert_eq!(bucket.paused_until, Some(NOW + 60.0));
        assert_eq!(bucket.pause_source, PauseSource::RateLimitReset);
        assert_eq!(bucket.rate_limit_hits, 3);
    }

    #[test]
    fn paused_bucket_waits_for_pause_end() {
        let mut bucket = BucketState::new(10.0, 10.0, NOW);
        bucket.apply_pause(NOW, Some(2.0), None, 1.0, 3600.0);
        assert_eq!(bucket.try_take(NOW + 0.5), Err(1.5));
        assert!(bucket.try_take(NOW + 2.0).is_ok());
    }

    #[test]
    fn serialized_shape() {
        let mut bucket = BucketState::new(1.0, 5.0, NOW);
        bucket.instance_key = Some("gitlab.example.com".into());
        let json = serde_json::to_value(&bucket).unwrap();
        assert_eq!(json["pause_source"], "none");
        assert_eq!(json["instance_key"], "gitlab.example.com");
        let back: BucketState = serde_json::from_value(json).unwrap();
        assert_eq!(back, bucket);
    }
}
