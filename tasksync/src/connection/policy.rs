//! Reconnect policy table.
//!
//! Backoff is linear and bounded: the n-th reconnect (1-based) waits
//! `base_delay * n`, and after `max_attempts` scheduled reconnects the
//! manager stops retrying until it is told to connect again.

use std::time::Duration;

/// Bounded linear reconnect schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay unit; the n-th reconnect waits `base_delay * n`.
    pub base_delay: Duration,
    /// Number of reconnects scheduled before giving up.
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Delays of 1 s, 2 s, 3 s, 4 s and 5 s, then give up.
    pub const DEFAULT: Self = Self {
        base_delay: Duration::from_millis(1000),
        max_attempts: 5,
    };

    /// Creates a policy.
    #[must_use]
    pub const fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_attempts,
        }
    }

    /// Delay before the next reconnect, given how many reconnects have
    /// already been made since the last successful open.
    ///
    /// Returns `None` once the budget is spent.
    #[must_use]
    pub fn delay_for(&self, attempts: u32) -> Option<Duration> {
        if attempts >= self.max_attempts {
            return None;
        }
        Some(self.base_delay.saturating_mul(attempts.saturating_add(1)))
    }

    /// The full schedule of delays, in order.
    pub fn schedule(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_attempts).filter_map(|attempts| self.delay_for(attempts))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}
