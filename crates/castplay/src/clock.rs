//! Speed-scaled clock and timers handed to drivers.
//!
//! Drivers are written against real seconds. The player hands each driver a
//! [`Clock`] that multiplies reported time by the playback speed and divides
//! every requested delay by it, so a driver runs faster or slower without
//! knowing about speed at all.
//!
//! All times are built on [`tokio::time::Instant`], which makes them
//! controllable with `tokio::time::pause` in tests.

use std::future::Future;
use std::time::Duration;

use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Default playback speed.
pub const DEFAULT_SPEED: f64 = 1.0;

/// A speed-scaled clock.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin: Instant,
    speed: f64,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new(DEFAULT_SPEED)
    }
}

impl Clock {
    /// Create a clock running at `speed`. Non-positive or non-finite speeds
    /// fall back to real time.
    #[must_use]
    pub fn new(speed: f64) -> Self {
        let speed = if speed.is_finite() && speed > 0.0 {
            speed
        } else {
            DEFAULT_SPEED
        };
        Self {
            origin: Instant::now(),
            speed,
        }
    }

    /// Playback speed multiplier.
    #[must_use]
    pub const fn speed(&self) -> f64 {
        self.speed
    }

    /// Scaled milliseconds since the clock was created.
    #[must_use]
    pub fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0 * self.speed
    }

    /// Convert a delay in scaled milliseconds to a wall-clock duration.
    #[must_use]
    pub fn scale(&self, ms: f64) -> Duration {
        if !ms.is_finite() || ms <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(ms / self.speed / 1000.0)
    }

    /// Sleep for a delay given in scaled milliseconds.
    pub async fn sleep(&self, ms: f64) {
        let delay = self.scale(ms);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    /// Run `f` every `ms` scaled milliseconds, first after one period.
    pub fn set_interval<F>(&self, ms: f64, mut f: F) -> Timer
    where
        F: FnMut() + Send + 'static,
    {
        let period = self.scale(ms).max(Duration::from_millis(1));
        Timer::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                f();
            }
        })
    }
}

/// Handle to a scheduled timer or background task.
///
/// Dropping the handle leaves the timer running; call [`Timer::cancel`] to
/// stop it.
#[derive(Debug)]
pub struct Timer {
    handle: AbortHandle,
}

impl Timer {
    /// Run `f` once after an unscaled wall-clock delay.
    pub fn after<F>(delay: Duration, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::spawn(async move {
            tokio::time::sleep(delay).await;
            f();
        })
    }

    /// Spawn a task on the current runtime and keep its abort handle.
    pub fn spawn<Fut>(future: Fut) -> Self
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future).abort_handle();
        Self { handle }
    }

    /// Cancel the timer. Has no effect once it has fired.
    pub fn cancel(&self) {
        self.handle.abort();
    }
}
