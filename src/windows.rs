//! Splitting sync ranges into bounded chunks.
//!
//! Degraded mode shrinks the forward window; the scheduler then walks a
//! large catch-up range in chunks of that size.
//!
//! ```text
//! time:      [since, until)  → [s0,u0) [u0,u1) ... [un-1,until)
//! revisions: [start..=end]   → [start,start+c-1] [start+c, ...] ... [.., end]
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Half-open time range `[since, until)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

impl TimeWindow {
    pub fn duration(&self) -> Duration {
        self.until - self.since
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.since <= at && at < self.until
    }
}

/// Inclusive revision range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionWindow {
    pub start: u64,
    pub end: u64,
}

impl RevisionWindow {
    /// Number of revisions covered.
    pub fn count(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Contiguous chunks of at most `chunk` covering `[since, until)` exactly.
/// Empty when `since >= until` or `chunk` is not positive.
pub fn split_time_window(since: DateTime<Utc>, until: DateTime<Utc>, chunk: Duration) -> Vec<TimeWindow> {
    if since >= until || chunk <= Duration::zero() {
        return Vec::new();
    }

    let mut windows = Vec::new();
    let mut cursor = since;
    while cursor < until {
        let end = cursor.checked_add_signed(chunk).map_or(until, |end| end.min(until));
        windows.push(TimeWindow { since: cursor, until: end });
        cursor = end;
    }
    windows
}

/// Inclusive chunks of at most `chunk` revisions covering `start..=end`.
/// Empty when `start > end` or `chunk == 0`.
pub fn split_revision_range(start: u64, end: u64, chunk: u64) -> Vec<RevisionWindow> {
    if start > end || chunk == 0 {
        return Vec::new();
    }

    let mut windows = Vec::new();
    let mut cursor = start;
    loop {
        let last = cursor.saturating_add(chunk - 1).min(end);
        windows.push(RevisionWindow { start: cursor, end: last });
        if last == end {
            break;
        }
        cursor = last + 1;
    }
    windows
}
