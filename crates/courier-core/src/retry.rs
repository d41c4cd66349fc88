//! Bounded retry policy with exponential backoff.
//!
//! Replaces ad-hoc recursive timer scheduling: the auth-failure handler asks
//! the policy for each delay instead of re-arming timers by hand.

use std::time::Duration;

/// Retry policy: fixed attempt cap, linear-exponential backoff.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum attempts before giving up.
    pub max_attempts: u32,
    /// Base delay; attempt `n` (1-based) waits `base * n`.
    pub base_delay: Duration,
    /// Initial delay before the first attempt.
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        // The auth-failure defaults: 3 attempts, 5s * attempt backoff,
        // 3s grace before the first retry.
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            initial_delay: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait before the given 1-based attempt, or `None` when the
    /// attempt budget is exhausted.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        if attempt == 1 {
            Some(self.initial_delay)
        } else {
            Some(self.base_delay * (attempt - 1))
        }
    }

    /// Iterator over all backoff delays, in order.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..=self.max_attempts).filter_map(|n| self.delay_for(n))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
