//! Retry backoff policy.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Exponential backoff with additive jitter.
///
/// `next_delay(attempt) = min(base * 2^attempt, max) + U[0, max_jitter]`
///
/// The jitter is sampled independently on every call so that items failing in
/// the same wave (e.g. a supplier outage) spread their retries out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay for attempt 0; doubled per attempt.
    pub base_delay: Duration,
    /// Cap applied before jitter.
    pub max_delay: Duration,
    /// Upper bound (inclusive) of the random jitter term.
    pub max_jitter: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(3600),
            max_jitter: Duration::from_secs(10),
        }
    }
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, max_jitter: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            max_jitter,
        }
    }

    /// Policy without jitter (useful for deterministic tests).
    pub fn without_jitter(mut self) -> Self {
        self.max_jitter = Duration::ZERO;
        self
    }

    /// Deterministic part of the delay: `min(base * 2^attempt, max)`.
    pub fn capped_delay(&self, attempt: u32) -> Duration {
        1u32.checked_shl(attempt)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Delay to wait before the next dispatch after `attempt` failures.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        self.next_delay_with(attempt, &mut rand::thread_rng())
    }

    /// Same as [`next_delay`](Self::next_delay) with a caller-supplied RNG.
    pub fn next_delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        self.capped_delay(attempt) + self.sample_jitter(rng)
    }

    fn sample_jitter<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let max_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rng.gen_range(0..=max_ms))
    }
}
