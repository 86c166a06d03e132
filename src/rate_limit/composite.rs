//! All-of composition over several limiters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::clock::Clock;
use crate::rate_limit::{secs_to_duration, AcquireCounters, LimiterStats, PauseSource, RateLimiter};

/// Admits a request only when every member admits it.
///
/// Members are consulted in order and each spends its own token; a later
/// refusal does not refund earlier members.
#[derive(Debug)]
pub struct CompositeLimiter {
    name: String,
    members: Vec<Arc<dyn RateLimiter>>,
    clock: Arc<dyn Clock>,
    rate_limit_hits: AtomicU64,
    counters: AcquireCounters,
}

impl CompositeLimiter {
    pub fn new(name: impl Into<String>, members: Vec<Arc<dyn RateLimiter>>, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            members,
            clock,
            rate_limit_hits: AtomicU64::new(0),
            counters: AcquireCounters::default(),
        }
    }

    pub fn members(&self) -> &[Arc<dyn RateLimiter>] {
        &self.members
    }
}

#[async_trait]
impl RateLimiter for CompositeLimiter {
    async fn acquire(&self, timeout: Duration) -> bool {
        let start = self.clock.now();
        let deadline = start + timeout.as_secs_f64();

        for member in &self.members {
            let remaining = (deadline - self.clock.now()).max(0.0);
            if !member.acquire(secs_to_duration(remaining)).await {
                self.counters.record(false, self.clock.now() - start);
                return false;
            }
        }
        self.counters.record(true, self.clock.now() - start);
        true
    }

    async fn notify_rate_limit(&self, retry_after: Option<f64>, reset_time: Option<f64>) {
        self.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
        for member in &self.members {
            member.notify_rate_limit(retry_after, reset_time).await;
        }
    }

    async fn stats(&self) -> LimiterStats {
        let mut members = Vec::with_capacity(self.members.len());
        for member in &self.members {
            members.push(member.stats().await);
        }

        let own_hits = self.rate_limit_hits.load(Ordering::Relaxed);
        let member_hits: u64 = members.iter().map(|m| m.rate_limit_hits).sum();

        // The binding constraint is the latest pause among the members.
        let latest_pause = members
            .iter()
            .filter_map(|m| m.paused_until.map(|until| (until, m.pause_source)))
            .max_by(|a, b| a.0.total_cmp(&b.0));

        let mut stats = LimiterStats {
            name: self.name.clone(),
            rate: members.iter().map(|m| m.rate).reduce(f64::min).unwrap_or(0.0),
            burst: members.iter().map(|m| m.burst).reduce(f64::min).unwrap_or(0.0),
            tokens: members.iter().map(|m| m.tokens).reduce(f64::min).unwrap_or(0.0),
            paused_until: latest_pause.map(|(until, _)| until),
            pause_source: latest_pause.map_or(PauseSource::None, |(_, source)| source),
            rate_limit_hits: own_hits + member_hits,
            members,
            ..Default::default()
        };
        self.counters.fill(&mut stats);
        stats
    }
}
