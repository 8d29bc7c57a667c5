//! Synthetic drivers for demos and testing.

use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use rand::Rng;

use super::{DriverContext, DriverInfo, DriverOptions};
use crate::clock::Timer;

/// First printable ASCII character.
const PRINTABLE_START: u8 = b' ';
/// Last printable ASCII character.
const PRINTABLE_END: u8 = b'~';

/// Feeds random printable characters at random intervals.
#[derive(Debug)]
pub struct RandomDriver {
    ctx: DriverContext,
    timer: Mutex<Option<Timer>>,
}

impl RandomDriver {
    /// Create a driver.
    #[must_use]
    pub const fn new(ctx: DriverContext) -> Self {
        Self {
            ctx,
            timer: Mutex::new(None),
        }
    }

    /// Start typing.
    pub fn start(&self) {
        let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if timer.is_some() {
            return;
        }
        let ctx = self.ctx.clone();
        *timer = Some(Timer::spawn(async move {
            loop {
                // Delays spread between 1 and 625 ms.
                let (delay, c) = {
                    let mut rng = rand::rng();
                    let delay = 5f64.powf(rng.random::<f64>() * 4.0);
                    (delay, rng.random_range(PRINTABLE_START..PRINTABLE_END))
                };
                ctx.clock().sleep(delay).await;
                ctx.feed(&[c]);
            }
        }));
    }

    /// Stop typing.
    pub fn stop(&self) {
        if let Some(timer) = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            timer.cancel();
        }
    }
}

impl Drop for RandomDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Hour color (SGR 3x).
const HOUR_COLOR: u8 = 3;
/// Minute color (SGR 3x).
const MINUTE_COLOR: u8 = 4;
/// Minutes in a day, reported as the clock's duration.
const MINUTES_PER_DAY: f64 = 1440.0;

/// Shows the current UTC time as `HH:MM`, redrawn every second.
#[derive(Debug)]
pub struct ClockDriver {
    ctx: DriverContext,
    cols: usize,
    rows: usize,
    timer: Mutex<Option<Timer>>,
}

impl ClockDriver {
    /// Default width.
    pub const DEFAULT_COLS: usize = 5;
    /// Default height.
    pub const DEFAULT_ROWS: usize = 1;

    /// Create a driver sized by the configured dimensions.
    #[must_use]
    pub fn new(ctx: DriverContext, options: &DriverOptions) -> Self {
        Self {
            ctx,
            cols: options.cols.unwrap_or(Self::DEFAULT_COLS),
            rows: options.rows.unwrap_or(Self::DEFAULT_ROWS),
            timer: Mutex::new(None),
        }
    }

    /// Size, a day-long duration and a poster showing the current time.
    #[must_use]
    pub fn info(&self) -> DriverInfo {
        let (hours, minutes) = time_of_day();
        let mut poster = vec![Bytes::from(self.setup_cursor())];
        poster.push(Bytes::from(render_time(self.cols, hours, minutes)));
        DriverInfo {
            cols: Some(self.cols),
            rows: Some(self.rows),
            duration: Some(MINUTES_PER_DAY),
            poster: Some(poster),
        }
    }

    fn setup_cursor(&self) -> String {
        format!("\x1b[?25l\x1b[1m\x1b[{}B", self.rows / 2)
    }

    /// Draw the time now and every second after.
    pub fn start(&self) {
        let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if timer.is_some() {
            return;
        }
        self.ctx.feed(self.setup_cursor().as_bytes());
        draw(&self.ctx, self.cols);

        let ctx = self.ctx.clone();
        let cols = self.cols;
        *timer = Some(self.ctx.clock().set_interval(1000.0, move || draw(&ctx, cols)));
    }

    /// Stop redrawing.
    pub fn stop(&self) {
        if let Some(timer) = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            timer.cancel();
        }
    }

    /// Minutes since midnight.
    #[must_use]
    pub fn current_time(&self) -> f64 {
        let (hours, minutes) = time_of_day();
        f64::from(hours * 60 + minutes)
    }
}

impl Drop for ClockDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn draw(ctx: &DriverContext, cols: usize) {
    let (hours, minutes) = time_of_day();
    ctx.feed(render_time(cols, hours, minutes).as_bytes());
}

fn time_of_day() -> (u32, u32) {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());
    let minutes_today = (secs / 60) % (24 * 60);
    ((minutes_today / 60) as u32, (minutes_today % 60) as u32)
}

fn render_time(cols: usize, hours: u32, minutes: u32) -> String {
    let pad = (cols / 2).saturating_sub(2);
    format!(
        "\r{}\x1b[3{HOUR_COLOR}m{hours:02}\x1b[39;5m:\x1b[25m\x1b[3{MINUTE_COLOR}m{minutes:02}",
        " ".repeat(pad)
    )
}
