//! Player configuration.
//!
//! Configuration can be built in code:
//!
//! ```
//! use castplay::{LoopMode, PlayerConfig};
//!
//! let config = PlayerConfig::new()
//!     .with_speed(2.0)
//!     .with_loop(LoopMode::Times(3))
//!     .with_idle_time_limit(1.5);
//! assert_eq!(config.loop_mode, LoopMode::Times(3));
//! ```
//!
//! or loaded from TOML:
//!
//! ```toml
//! cols = 100
//! speed = 1.5
//! loop = true
//! start_at = "1:30"
//! poster = "npt:0:05"
//!
//! [reconnect]
//! initial_delay_ms = 250
//! max_delay_ms = 5000
//! ```

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::clock::DEFAULT_SPEED;
use crate::driver::buffer::DEFAULT_BUFFER_TIME;
use crate::driver::{Backoff, DriverOptions};
use crate::error::{PlayerError, Result};

/// Terminal width used when neither configuration nor recording set one.
pub const DEFAULT_COLS: usize = 80;

/// Terminal height used when neither configuration nor recording set one.
pub const DEFAULT_ROWS: usize = 24;

/// Whether and how often playback repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopMode {
    /// Play once.
    #[default]
    Off,
    /// Repeat forever.
    Forever,
    /// Play this many times in total.
    Times(u32),
}

impl LoopMode {
    /// Whether to play again after `play_count` completed plays.
    #[must_use]
    pub const fn should_restart(self, play_count: u32) -> bool {
        match self {
            Self::Off => false,
            Self::Forever => true,
            Self::Times(n) => play_count < n,
        }
    }
}

/// A preview shown before playback starts.
#[derive(Debug, Clone, PartialEq)]
pub enum Poster {
    /// Literal text fed to a blank terminal (`data:text/plain,<text>`).
    Text(String),
    /// The recording as it looks at this many seconds (`npt:<time>`).
    Time(f64),
}

impl FromStr for Poster {
    type Err = PlayerError;

    fn from_str(s: &str) -> Result<Self> {
        if let Some(text) = s.strip_prefix("data:text/plain,") {
            return Ok(Self::Text(text.to_string()));
        }
        if let Some(time) = s.strip_prefix("npt:") {
            return parse_npt(time).map(Self::Time);
        }
        Err(PlayerError::config(format!("unsupported poster: {s}")))
    }
}

/// Parse a time given as seconds, `mm:ss` or `hh:mm:ss`.
pub fn parse_npt(s: &str) -> Result<f64> {
    let invalid = || PlayerError::config(format!("invalid time: {s}"));

    let parts: Vec<&str> = s.trim().split(':').collect();
    if parts.len() > 3 {
        return Err(invalid());
    }

    let mut seconds = 0.0;
    for part in &parts {
        let value: f64 = part.trim().parse().map_err(|_| invalid())?;
        if !value.is_finite() || value < 0.0 {
            return Err(invalid());
        }
        seconds = seconds * 60.0 + value;
    }
    Ok(seconds)
}

/// Player configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerConfig {
    /// Terminal width, overriding the recording's.
    pub cols: Option<usize>,
    /// Terminal height, overriding the recording's.
    pub rows: Option<usize>,
    /// Playback speed multiplier.
    pub speed: f64,
    /// Loop policy.
    pub loop_mode: LoopMode,
    /// Idle time ceiling in seconds, overriding the recording's.
    pub idle_time_limit: Option<f64>,
    /// Initialize the driver in [`Player::init`](crate::Player::init).
    pub preload: bool,
    /// Start position in seconds.
    pub start_at: f64,
    /// Preview shown before playback.
    pub poster: Option<Poster>,
    /// Live stream latency in seconds.
    pub buffer_time: f64,
    /// Live reconnect policy.
    pub reconnect: Backoff,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            cols: None,
            rows: None,
            speed: DEFAULT_SPEED,
            loop_mode: LoopMode::Off,
            idle_time_limit: None,
            preload: false,
            start_at: 0.0,
            poster: None,
            buffer_time: DEFAULT_BUFFER_TIME,
            reconnect: Backoff::default(),
        }
    }
}

impl PlayerConfig {
    /// Create a default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the terminal size.
    #[must_use]
    pub const fn with_size(mut self, cols: usize, rows: usize) -> Self {
        self.cols = Some(cols);
        self.rows = Some(rows);
        self
    }

    /// Set the playback speed.
    #[must_use]
    pub const fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    /// Set the loop policy.
    #[must_use]
    pub const fn with_loop(mut self, loop_mode: LoopMode) -> Self {
        self.loop_mode = loop_mode;
        self
    }

    /// Set the idle time limit.
    #[must_use]
    pub const fn with_idle_time_limit(mut self, limit: f64) -> Self {
        self.idle_time_limit = Some(limit);
        self
    }

    /// Initialize eagerly.
    #[must_use]
    pub const fn with_preload(mut self, preload: bool) -> Self {
        self.preload = preload;
        self
    }

    /// Set the start position in seconds.
    #[must_use]
    pub const fn with_start_at(mut self, seconds: f64) -> Self {
        self.start_at = seconds;
        self
    }

    /// Set the poster.
    #[must_use]
    pub fn with_poster(mut self, poster: Poster) -> Self {
        self.poster = Some(poster);
        self
    }

    /// Set the live buffer latency.
    #[must_use]
    pub const fn with_buffer_time(mut self, seconds: f64) -> Self {
        self.buffer_time = seconds;
        self
    }

    /// Set the reconnect policy.
    #[must_use]
    pub const fn with_reconnect(mut self, reconnect: Backoff) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Check values that would make playback meaningless.
    pub fn validate(&self) -> Result<()> {
        if !self.speed.is_finite() || self.speed <= 0.0 {
            return Err(PlayerError::config(format!(
                "speed must be positive, got {}",
                self.speed
            )));
        }
        if let Some(limit) = self.idle_time_limit {
            if limit.is_nan() || limit <= 0.0 {
                return Err(PlayerError::config(format!(
                    "idle_time_limit must be positive, got {limit}"
                )));
            }
        }
        if !self.start_at.is_finite() || self.start_at < 0.0 {
            return Err(PlayerError::config(format!(
                "start_at must not be negative, got {}",
                self.start_at
            )));
        }
        if self.buffer_time.is_nan() {
            return Err(PlayerError::config("buffer_time is not a number"));
        }
        if self.cols == Some(0) || self.rows == Some(0) {
            return Err(PlayerError::config("terminal size must be non-zero"));
        }
        Ok(())
    }

    /// Parse a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(s).map_err(|e| PlayerError::config(e.to_string()))?;
        let config = raw.into_config()?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = PlayerError::with_io_context(
            std::fs::read_to_string(path),
            format!("reading {}", path.display()),
        )?;
        Self::from_toml_str(&text)
    }

    /// Settings handed to drivers.
    #[must_use]
    pub const fn driver_options(&self) -> DriverOptions {
        DriverOptions {
            idle_time_limit: self.idle_time_limit,
            start_at: self.start_at,
            buffer_time: self.buffer_time,
            reconnect: self.reconnect,
            cols: self.cols,
            rows: self.rows,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawLoop {
    Flag(bool),
    Count(u32),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTime {
    Seconds(f64),
    Token(String),
}

impl RawTime {
    fn seconds(self) -> Result<f64> {
        match self {
            Self::Seconds(seconds) => Ok(seconds),
            Self::Token(token) => parse_npt(&token),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawReconnect {
    initial_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    cols: Option<usize>,
    rows: Option<usize>,
    speed: Option<f64>,
    #[serde(rename = "loop")]
    loop_mode: Option<RawLoop>,
    idle_time_limit: Option<f64>,
    preload: Option<bool>,
    start_at: Option<RawTime>,
    poster: Option<String>,
    buffer_time: Option<f64>,
    reconnect: Option<RawReconnect>,
}

impl RawConfig {
    fn into_config(self) -> Result<PlayerConfig> {
        let defaults = PlayerConfig::default();

        let loop_mode = match self.loop_mode {
            None | Some(RawLoop::Flag(false) | RawLoop::Count(0)) => LoopMode::Off,
            Some(RawLoop::Flag(true)) => LoopMode::Forever,
            Some(RawLoop::Count(n)) => LoopMode::Times(n),
        };

        let reconnect = self.reconnect.map_or(defaults.reconnect, |raw| {
            let base = Backoff::default();
            Backoff::new(
                raw.initial_delay_ms
                    .map_or(base.initial_delay, Duration::from_millis),
                raw.max_delay_ms.map_or(base.max_delay, Duration::from_millis),
            )
        });

        Ok(PlayerConfig {
            cols: self.cols,
            rows: self.rows,
            speed: self.speed.unwrap_or(defaults.speed),
            loop_mode,
            idle_time_limit: self.idle_time_limit,
            preload: self.preload.unwrap_or(defaults.preload),
            start_at: self.start_at.map(RawTime::seconds).transpose()?.unwrap_or(0.0),
            poster: self.poster.as_deref().map(str::parse).transpose()?,
            buffer_time: self.buffer_time.unwrap_or(defaults.buffer_time),
            reconnect,
        })
    }
}
