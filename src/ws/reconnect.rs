//! Bounded, fixed-delay reconnection.

use std::time::Duration;

use backoff::backoff::Backoff;

use super::config::ReconnectConfig;

/// Decides whether and when to retry after an unexpected disconnect.
///
/// Implements [`Backoff`] so the connection driver consumes it the same way it would an
/// exponential schedule: `next_backoff` yields the delay before the next attempt, or `None`
/// once `max_retries` attempts have been spent. `reset` is called on every successful open.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectionPolicy {
    attempts: u32,
    max_retries: u32,
    delay: Duration,
}

impl ReconnectionPolicy {
    #[must_use]
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            attempts: 0,
            max_retries: config.max_retries,
            delay: config.delay,
        }
    }

    /// Number of reconnection attempts scheduled since the last successful open.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Fixed delay before every attempt.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }

    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Whether every allowed attempt has been spent.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_retries
    }
}

impl Backoff for ReconnectionPolicy {
    fn reset(&mut self) {
        self.attempts = 0;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }

        self.attempts += 1;
        Some(self.delay)
    }
}
