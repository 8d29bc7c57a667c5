//! Playback drivers.
//!
//! A driver produces terminal output over time. Drivers never touch the
//! terminal directly: the player injects a [`DriverContext`] through which a
//! driver feeds output, resets the terminal, reports buffering and signals the
//! end of playback.
//!
//! The set of drivers is closed ([`Driver`]). Optional capabilities such as
//! pausing and seeking are probed through methods returning `Option` or
//! `bool`; a missing capability is never an error.

pub mod backoff;
pub mod buffer;
pub mod live;
pub mod queue;
pub mod recording;
pub mod synthetic;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;

use crate::clock::Clock;
use crate::error::{PlayerError, Result};
use crate::source::{Source, SyntheticKind};

pub use backoff::{Backoff, BackoffState};
pub use buffer::TimeShiftBuffer;
pub use live::LiveDriver;
pub use queue::{ForEachHandle, Queue};
pub use recording::RecordingDriver;
pub use synthetic::{ClockDriver, RandomDriver};

/// Seconds skipped by the `<<` and `>>` seek tokens.
pub const SEEK_STEP: f64 = 5.0;

/// Fraction of the duration skipped by the `<<<` and `>>>` seek tokens.
pub const FAR_SEEK_FRACTION: f64 = 0.1;

/// Callbacks a driver uses to talk to its player.
pub trait DriverHost: Send + Sync + 'static {
    /// Feed output to the terminal.
    fn feed(&self, data: &[u8]);

    /// Replace the terminal with a fresh one of the given size.
    fn reset(&self, cols: usize, rows: usize, init: Option<&str>);

    /// Report whether the driver is waiting for data.
    fn set_waiting(&self, waiting: bool);

    /// Report that playback reached its end.
    fn finish(&self);
}

/// Everything a driver receives from its player.
#[derive(Clone)]
pub struct DriverContext {
    host: Arc<dyn DriverHost>,
    clock: Clock,
}

impl fmt::Debug for DriverContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverContext")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl DriverContext {
    /// Create a context.
    pub fn new(host: Arc<dyn DriverHost>, clock: Clock) -> Self {
        Self { host, clock }
    }

    /// Feed output to the terminal.
    pub fn feed(&self, data: &[u8]) {
        self.host.feed(data);
    }

    /// Reset the terminal to a new size, optionally feeding `init`.
    pub fn reset(&self, cols: usize, rows: usize, init: Option<&str>) {
        self.host.reset(cols, rows, init);
    }

    /// Report buffering state.
    pub fn set_waiting(&self, waiting: bool) {
        self.host.set_waiting(waiting);
    }

    /// Signal the end of playback.
    pub fn finish(&self) {
        self.host.finish();
    }

    /// The speed-scaled clock.
    #[must_use]
    pub const fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Scaled milliseconds on the clock.
    #[must_use]
    pub fn now(&self) -> f64 {
        self.clock.now()
    }
}

/// Settings a driver is built with.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverOptions {
    /// Idle time ceiling overriding the recording's own.
    pub idle_time_limit: Option<f64>,
    /// Start position in recorded seconds.
    pub start_at: f64,
    /// Latency of the live time-shift buffer, in seconds.
    pub buffer_time: f64,
    /// Live reconnect policy.
    pub reconnect: Backoff,
    /// Requested terminal width.
    pub cols: Option<usize>,
    /// Requested terminal height.
    pub rows: Option<usize>,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            idle_time_limit: None,
            start_at: 0.0,
            buffer_time: buffer::DEFAULT_BUFFER_TIME,
            reconnect: Backoff::default(),
            cols: None,
            rows: None,
        }
    }
}

/// What a driver reports once initialized.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DriverInfo {
    /// Terminal width, when known.
    pub cols: Option<usize>,
    /// Terminal height, when known.
    pub rows: Option<usize>,
    /// Total duration in seconds, when known.
    pub duration: Option<f64>,
    /// Output rendering the driver's own preview.
    pub poster: Option<Vec<Bytes>>,
}

/// A seek destination.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SeekTarget {
    /// Absolute position in seconds.
    Seconds(f64),
    /// Percentage of the duration.
    Percent(f64),
    /// Five seconds back.
    Back,
    /// Five seconds forward.
    Forward,
    /// A tenth of the duration back.
    FarBack,
    /// A tenth of the duration forward.
    FarForward,
}

impl SeekTarget {
    /// Resolve to an absolute position clamped to `[0, duration]`.
    #[must_use]
    pub fn resolve(self, current: f64, duration: f64) -> f64 {
        let target = match self {
            Self::Seconds(seconds) => seconds,
            Self::Percent(percent) => percent / 100.0 * duration,
            Self::Back => current - SEEK_STEP,
            Self::Forward => current + SEEK_STEP,
            Self::FarBack => current - FAR_SEEK_FRACTION * duration,
            Self::FarForward => current + FAR_SEEK_FRACTION * duration,
        };
        if target.is_nan() {
            return 0.0;
        }
        target.clamp(0.0, duration.max(0.0))
    }
}

impl From<f64> for SeekTarget {
    fn from(seconds: f64) -> Self {
        Self::Seconds(seconds)
    }
}

impl FromStr for SeekTarget {
    type Err = PlayerError;

    fn from_str(s: &str) -> Result<Self> {
        let token = s.trim();
        match token {
            "<<" => return Ok(Self::Back),
            ">>" => return Ok(Self::Forward),
            "<<<" => return Ok(Self::FarBack),
            ">>>" => return Ok(Self::FarForward),
            _ => {}
        }
        let parsed = match token.strip_suffix('%') {
            Some(percent) => percent.trim().parse::<f64>().map(Self::Percent),
            None => token.parse::<f64>().map(Self::Seconds),
        };
        parsed.map_err(|_| PlayerError::config(format!("unknown seek target: {s}")))
    }
}

/// A playback driver.
#[derive(Debug)]
pub enum Driver {
    /// Recorded session.
    Recording(RecordingDriver),
    /// Live stream.
    Live(LiveDriver),
    /// Random characters.
    Random(RandomDriver),
    /// Wall clock.
    Clock(ClockDriver),
}

impl Driver {
    /// Build the driver for a source.
    #[must_use]
    pub fn new(source: Source, ctx: DriverContext, options: &DriverOptions) -> Self {
        match source {
            Source::Recording(recording) => {
                Self::Recording(RecordingDriver::new(recording, ctx, options))
            }
            Source::Live { transport, url } => {
                Self::Live(LiveDriver::new(transport, url, ctx, options))
            }
            Source::Test(SyntheticKind::Random) => Self::Random(RandomDriver::new(ctx)),
            Source::Test(SyntheticKind::Clock) => Self::Clock(ClockDriver::new(ctx, options)),
        }
    }

    /// Whether initialization performs I/O.
    #[must_use]
    pub const fn is_remote(&self) -> bool {
        matches!(self, Self::Recording(_) | Self::Live(_))
    }

    /// Initialize the driver. Repeated calls share one initialization.
    pub async fn init(&self) -> Result<DriverInfo> {
        match self {
            Self::Recording(driver) => driver.init().await,
            Self::Live(driver) => Ok(driver.info()),
            Self::Random(_) => Ok(DriverInfo::default()),
            Self::Clock(driver) => Ok(driver.info()),
        }
    }

    /// Begin producing output.
    pub fn start(&self) {
        match self {
            Self::Recording(driver) => driver.start(),
            Self::Live(driver) => driver.start(),
            Self::Random(driver) => driver.start(),
            Self::Clock(driver) => driver.start(),
        }
    }

    /// Stop producing output and release timers and connections.
    pub fn stop(&self) {
        match self {
            Self::Recording(driver) => driver.stop(),
            Self::Live(driver) => driver.stop(),
            Self::Random(driver) => driver.stop(),
            Self::Clock(driver) => driver.stop(),
        }
    }

    /// Whether the driver can pause and resume.
    #[must_use]
    pub const fn is_pausable(&self) -> bool {
        matches!(self, Self::Recording(_))
    }

    /// Whether the driver can seek.
    #[must_use]
    pub const fn is_seekable(&self) -> bool {
        matches!(self, Self::Recording(_))
    }

    /// Pause. Returns `false` without a pause capability.
    pub fn pause(&self) -> bool {
        match self {
            Self::Recording(driver) => {
                driver.pause();
                true
            }
            _ => false,
        }
    }

    /// Resume. Returns `false` without a pause capability.
    pub fn resume(&self) -> bool {
        match self {
            Self::Recording(driver) => {
                driver.resume();
                true
            }
            _ => false,
        }
    }

    /// Toggle playback, returning whether it now runs.
    pub fn pause_or_resume(&self) -> Option<bool> {
        match self {
            Self::Recording(driver) => Some(driver.pause_or_resume()),
            _ => None,
        }
    }

    /// Seek, returning the new position in seconds.
    pub fn seek(&self, target: SeekTarget) -> Option<f64> {
        match self {
            Self::Recording(driver) => driver.seek(target),
            _ => None,
        }
    }

    /// Output up to `time` for a poster, without touching playback.
    #[must_use]
    pub fn poster_at(&self, time: f64) -> Option<Vec<Bytes>> {
        match self {
            Self::Recording(driver) => driver.poster(time),
            _ => None,
        }
    }

    /// Position on the driver's own clock, in seconds.
    #[must_use]
    pub fn current_time(&self) -> Option<f64> {
        match self {
            Self::Recording(driver) => Some(driver.current_time()),
            Self::Live(driver) => driver.current_time(),
            Self::Random(_) => None,
            Self::Clock(driver) => Some(driver.current_time()),
        }
    }
}

/// Host that records what drivers send, for driver tests.
#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        Feed(String),
        Reset(usize, usize, Option<String>),
        Waiting(bool),
        Finish,
    }

    #[derive(Debug, Default)]
    pub struct TestHost {
        calls: Mutex<Vec<Call>>,
    }

    impl TestHost {
        pub fn context(speed: f64) -> (Arc<Self>, DriverContext) {
            let host = Arc::new(Self::default());
            let ctx = DriverContext::new(Arc::clone(&host) as Arc<dyn DriverHost>, Clock::new(speed));
            (host, ctx)
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        pub fn fed(&self) -> String {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Feed(s) => Some(s),
                    _ => None,
                })
                .collect()
        }

        pub fn finishes(&self) -> usize {
            self.calls().iter().filter(|c| **c == Call::Finish).count()
        }
    }

    impl DriverHost for TestHost {
        fn feed(&self, data: &[u8]) {
            let text = String::from_utf8_lossy(data).into_owned();
            self.calls.lock().unwrap().push(Call::Feed(text));
        }

        fn reset(&self, cols: usize, rows: usize, init: Option<&str>) {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Reset(cols, rows, init.map(str::to_string)));
        }

        fn set_waiting(&self, waiting: bool) {
            self.calls.lock().unwrap().push(Call::Waiting(waiting));
        }

        fn finish(&self) {
            self.calls.lock().unwrap().push(Call::Finish);
        }
    }

    /// Advance paused time in small steps so spawned tasks keep up.
    pub async fn advance(total: Duration) {
        let step = Duration::from_millis(10);
        let mut elapsed = Duration::ZERO;
        while elapsed < total {
            let next = step.min(total - elapsed);
            tokio::time::sleep(next).await;
            elapsed += next;
        }
    }
}
