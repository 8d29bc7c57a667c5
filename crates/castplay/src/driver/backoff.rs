//! Reconnect backoff for live sources.

use std::time::Duration;

/// Exponential reconnect backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    /// Delay before the first reconnect.
    pub initial_delay: Duration,
    /// Ceiling for any delay.
    pub max_delay: Duration,
    /// Growth factor per failed attempt.
    pub multiplier: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_millis(5000),
            multiplier: 2.0,
        }
    }
}

impl Backoff {
    /// Create a doubling backoff between two bounds.
    #[must_use]
    pub const fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier: 2.0,
        }
    }

    /// Delay for a zero-based attempt.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let delay = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if delay.is_finite() {
            Duration::from_secs_f64(delay).min(self.max_delay)
        } else {
            self.max_delay
        }
    }
}

/// Backoff state across a connection's lifetime.
#[derive(Debug, Clone)]
pub struct BackoffState {
    backoff: Backoff,
    attempt: u32,
}

impl BackoffState {
    /// Create a fresh state.
    #[must_use]
    pub const fn new(backoff: Backoff) -> Self {
        Self {
            backoff,
            attempt: 0,
        }
    }

    /// Failed attempts since the last successful connect.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Take the delay for the next reconnect and advance.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.backoff.delay_for_attempt(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Called on a successful connect.
    pub const fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for BackoffState {
    fn default() -> Self {
        Self::new(Backoff::default())
    }
}
