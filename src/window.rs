//! Trailing time window used to decide which entries are new enough to post.
use chrono::{DateTime, Duration, DurationRound, Utc};

use crate::feed::FeedEntry;

/// Default window length.
pub const DEFAULT_WINDOW_HOURS: u32 = 24;

/// Longest accepted window, one hundred years.
pub const MAX_WINDOW_HOURS: u32 = 24 * 365 * 100;

/// Half-open interval `[start, end)`.
///
/// An entry timestamped exactly at `start` is included; one at `end`, or any
/// time after it, is excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// The window of `length` ending at `now`. A start before the earliest
    /// representable instant is clamped to it.
    pub fn ending_at(now: DateTime<Utc>, length: Duration) -> Self {
        Self {
            start: now
                .checked_sub_signed(length)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            end: now,
        }
    }

    /// Like [`TimeWindow::ending_at`], with both bounds truncated to the top of
    /// their hour. Successive hourly runs then cover whole, non-overlapping hours.
    pub fn ending_at_hour(now: DateTime<Utc>, length: Duration) -> Self {
        let window = Self::ending_at(now, length);
        Self {
            start: truncate_to_hour(window.start),
            end: truncate_to_hour(window.end),
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }

    /// Whether `entry` belongs in this run's batch.
    ///
    /// Entries without an effective timestamp are never included.
    pub fn includes(&self, entry: &FeedEntry) -> bool {
        entry
            .effective_timestamp()
            .is_some_and(|ts| self.contains(ts))
    }
}

/// Window length and alignment, fixed for a run. Produces a [`TimeWindow`]
/// for a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    pub length: Duration,
    pub align_to_hour: bool,
}

impl WindowPolicy {
    pub fn hours(hours: u32) -> Self {
        Self {
            length: Duration::hours(i64::from(hours)),
            align_to_hour: false,
        }
    }

    pub fn aligned_to_hour(mut self, align: bool) -> Self {
        self.align_to_hour = align;
        self
    }

    pub fn at(&self, now: DateTime<Utc>) -> TimeWindow {
        if self.align_to_hour {
            TimeWindow::ending_at_hour(now, self.length)
        } else {
            TimeWindow::ending_at(now, self.length)
        }
    }
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self::hours(DEFAULT_WINDOW_HOURS)
    }
}

fn truncate_to_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    // Only fails for instants near the representable limits.
    ts.duration_trunc(Duration::hours(1)).unwrap_or(ts)
}
