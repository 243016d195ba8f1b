//! Bounded retry policies shared by the feed fetcher and the delivery adapter.
//!
//! A policy is a plain value injected at construction, so tests can swap in
//! [`RetryPolicy::immediate`] and run without sleeping.
use std::time::Duration;

/// How long to wait before retry number `n` (0-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Retry immediately.
    None,
    /// Same delay before every retry.
    Fixed(Duration),
    /// `base * 2^n`: 1s, 2s, 4s for a one second base.
    Exponential { base: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first one. Total attempts = `1 + max_retries`.
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Upper bound for a single exponential step, keeps `2^n` from overflowing.
    const MAX_EXPONENT: u32 = 16;

    pub fn new(max_retries: u32, backoff: Backoff) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// Message delivery: 3 retries, 3 seconds apart.
    pub fn delivery_default() -> Self {
        Self::new(3, Backoff::Fixed(Duration::from_secs(3)))
    }

    /// Feed fetching: 3 retries backing off 1s, 2s, 4s.
    pub fn fetch_default() -> Self {
        Self::new(
            3,
            Backoff::Exponential {
                base: Duration::from_secs(1),
            },
        )
    }

    /// `max_retries` retries with no delay in between.
    pub fn immediate(max_retries: u32) -> Self {
        Self::new(max_retries, Backoff::None)
    }

    /// Total number of attempts this policy allows.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (0 for the first retry).
    pub fn delay_for(&self, retry: u32) -> Duration {
        match self.backoff {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base } => {
                let factor = 1u32 << retry.min(Self::MAX_EXPONENT);
                base.saturating_mul(factor)
            }
        }
    }

    /// Returns the delay before retry number `retry`, or `None` once the
    /// policy is exhausted.
    pub fn next_delay(&self, retry: u32) -> Option<Duration> {
        (retry < self.max_retries).then(|| self.delay_for(retry))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::delivery_default()
    }
}
