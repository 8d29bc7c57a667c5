//! Session controller.
//!
//! A [`Player`] owns one driver and one terminal. The driver pushes output
//! through the player into the terminal; rows reported as changed accumulate
//! until [`Player::changed_lines`] drains them.
//!
//! # States
//!
//! ```text
//! Initial --start--> Playing <--pause/resume--> Paused
//!                       |                          |
//!                       +--finish--> Finished <----+
//!                                       |
//!                                       +--restart--> Playing
//! ```
//!
//! When the driver signals the end of playback the loop policy decides
//! between restarting and dispatching [`EventKind::Ended`].

pub mod events;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::{OnceCell, mpsc};
use tokio::task::AbortHandle;

use crate::clock::{Clock, Timer};
use crate::config::{DEFAULT_COLS, DEFAULT_ROWS, PlayerConfig, Poster};
use crate::driver::{Driver, DriverContext, DriverHost, DriverInfo, SeekTarget};
use crate::error::{PlayerError, Result};
use crate::source::Source;
use crate::terminal::{Line, PosterFrame, Terminal};

pub use events::{EventKind, Listener, Listeners, PlayerEvent};

/// Wall-clock delay after which a slow start dispatches [`EventKind::Waiting`].
pub const SLOW_START_DELAY: Duration = Duration::from_secs(2);

/// Player state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerState {
    /// Not started yet.
    #[default]
    Initial,
    /// Playing.
    Playing,
    /// Paused, or stopped.
    Paused,
    /// Played to the end.
    Finished,
}

/// What a player can do, returned by [`Player::init`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerInfo {
    /// Whether pause and resume have an effect.
    pub pausable: bool,
    /// Whether seeking has an effect.
    pub seekable: bool,
    /// Rendered preview, if one is configured or provided by the driver.
    pub poster: Option<PosterFrame>,
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Finish,
}

struct Core<T> {
    terminal: Option<T>,
    cols: usize,
    rows: usize,
    dirty: BTreeSet<usize>,
    /// `None` until queried after the last feed.
    cursor: Option<Option<(usize, usize)>>,
    state: PlayerState,
    starting: bool,
    was_waiting: bool,
    play_count: u32,
    start_wall_time: Option<f64>,
    slow_start: Option<Timer>,
}

/// State shared between the player and its driver's tasks.
struct Shared<T> {
    core: Mutex<Core<T>>,
    listeners: Listeners,
    signals: mpsc::UnboundedSender<Signal>,
}

impl<T: Terminal> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, Core<T>> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dispatch(&self, event: PlayerEvent) {
        self.listeners.dispatch(&event);
    }

    /// Replace the terminal, marking every row dirty.
    fn install_terminal(&self, cols: usize, rows: usize, init: Option<&str>) {
        let mut guard = self.lock();
        let core = &mut *guard;
        let mut terminal = T::new(cols, rows);
        if let Some(init) = init {
            terminal.feed(init.as_bytes());
        }
        core.terminal = Some(terminal);
        core.cols = cols;
        core.rows = rows;
        core.dirty = (0..rows).collect();
        core.cursor = None;
    }
}

impl<T: Terminal> DriverHost for Shared<T> {
    fn feed(&self, data: &[u8]) {
        let mut guard = self.lock();
        let core = &mut *guard;
        if let Some(terminal) = core.terminal.as_mut() {
            core.dirty.extend(terminal.feed(data));
            core.cursor = None;
        }
    }

    fn reset(&self, cols: usize, rows: usize, init: Option<&str>) {
        let cols = if cols == 0 { DEFAULT_COLS } else { cols };
        let rows = if rows == 0 { DEFAULT_ROWS } else { rows };
        self.install_terminal(cols, rows, init);
        tracing::debug!(cols, rows, "terminal reset");
        self.dispatch(PlayerEvent::Reset { cols, rows });
    }

    fn set_waiting(&self, waiting: bool) {
        let event = {
            let mut core = self.lock();
            if waiting && !core.was_waiting {
                core.was_waiting = true;
                Some(PlayerEvent::Waiting)
            } else if !waiting && core.was_waiting {
                core.was_waiting = false;
                Some(PlayerEvent::Play)
            } else {
                None
            }
        };
        if let Some(event) = event {
            self.dispatch(event);
        }
    }

    fn finish(&self) {
        // The receiver is gone only once the player is dropped.
        let _ = self.signals.send(Signal::Finish);
    }
}

struct Controller<T: Terminal> {
    config: PlayerConfig,
    clock: Clock,
    driver: Driver,
    shared: Arc<Shared<T>>,
    info: OnceCell<DriverInfo>,
}

impl<T: Terminal> Controller<T> {
    fn lock(&self) -> MutexGuard<'_, Core<T>> {
        self.shared.lock()
    }

    fn state(&self) -> PlayerState {
        self.lock().state
    }

    fn set_state(&self, state: PlayerState) {
        let mut core = self.lock();
        if core.state != state {
            tracing::debug!(from = ?core.state, to = ?state, "state change");
            core.state = state;
        }
    }

    async fn ensure_init(&self) -> Result<&DriverInfo> {
        self.info
            .get_or_try_init(|| async {
                let info = self.driver.init().await.inspect_err(|e| {
                    tracing::error!(error = %e, "driver initialization failed");
                })?;
                let cols = self
                    .config
                    .cols
                    .or(info.cols)
                    .filter(|&cols| cols > 0)
                    .unwrap_or(DEFAULT_COLS);
                let rows = self
                    .config
                    .rows
                    .or(info.rows)
                    .filter(|&rows| rows > 0)
                    .unwrap_or(DEFAULT_ROWS);
                self.shared.install_terminal(cols, rows, None);
                tracing::debug!(cols, rows, duration = ?info.duration, "driver initialized");
                Ok::<_, PlayerError>(info)
            })
            .await
    }

    async fn start(&self) -> Result<()> {
        {
            let mut core = self.lock();
            if core.state != PlayerState::Initial || core.starting {
                return Ok(());
            }
            core.starting = true;
        }
        self.shared.dispatch(PlayerEvent::Starting);

        let shared = Arc::clone(&self.shared);
        let timer = Timer::after(SLOW_START_DELAY, move || {
            shared.dispatch(PlayerEvent::Waiting);
        });
        self.lock().slow_start = Some(timer);

        let result = self.ensure_init().await;
        {
            let mut core = self.lock();
            core.starting = false;
            if let Some(timer) = core.slow_start.take() {
                timer.cancel();
            }
        }
        result?;

        self.shared.dispatch(PlayerEvent::TerminalUpdate);
        {
            let mut core = self.lock();
            core.start_wall_time = Some(self.clock.now());
        }
        self.set_state(PlayerState::Playing);
        self.driver.start();
        self.shared.dispatch(PlayerEvent::Play);
        Ok(())
    }

    fn pause(&self) -> bool {
        if !self.driver.is_pausable() || self.state() != PlayerState::Playing {
            return false;
        }
        self.driver.pause();
        self.set_state(PlayerState::Paused);
        self.shared.dispatch(PlayerEvent::Pause);
        true
    }

    fn resume(&self) -> bool {
        if !self.driver.is_pausable() || self.state() != PlayerState::Paused {
            return false;
        }
        self.driver.resume();
        self.set_state(PlayerState::Playing);
        self.shared.dispatch(PlayerEvent::Play);
        true
    }

    async fn restart(&self) -> Result<()> {
        if !self.driver.is_seekable() {
            return Ok(());
        }
        if self.state() == PlayerState::Initial {
            return self.start().await;
        }
        self.seek(SeekTarget::Seconds(0.0)).await?;
        self.resume();
        Ok(())
    }

    async fn seek(&self, target: SeekTarget) -> Result<()> {
        self.ensure_init().await?;
        if self.state() != PlayerState::Playing {
            self.set_state(PlayerState::Paused);
        }
        if let Some(position) = self.driver.seek(target) {
            tracing::debug!(?target, position, "seeked");
            self.shared.dispatch(PlayerEvent::Seeked);
        }
        Ok(())
    }

    fn stop(&self) {
        self.driver.stop();
        let mut core = self.lock();
        if let Some(timer) = core.slow_start.take() {
            timer.cancel();
        }
        if core.state == PlayerState::Playing {
            core.state = PlayerState::Paused;
            tracing::debug!("stopped");
        }
    }

    async fn on_finish(&self) {
        let (play_count, restart) = {
            let mut core = self.lock();
            core.play_count += 1;
            core.state = PlayerState::Finished;
            let restart = self.config.loop_mode.should_restart(core.play_count)
                && self.driver.is_seekable();
            (core.play_count, restart)
        };

        if restart {
            tracing::debug!(play_count, "looping");
            if let Err(e) = self.restart().await {
                tracing::warn!(error = %e, "restart failed");
            }
        } else {
            tracing::info!(play_count, "playback ended");
            self.shared.dispatch(PlayerEvent::Ended);
        }
    }

    fn size(&self) -> (usize, usize) {
        let core = self.lock();
        (core.cols, core.rows)
    }

    fn render_poster(&self) -> Option<PosterFrame> {
        let (cols, rows) = self.size();
        match &self.config.poster {
            Some(Poster::Text(text)) => Some(PosterFrame::render::<T, _, _>(
                cols,
                rows,
                [text.as_bytes()],
            )),
            Some(Poster::Time(time)) => self
                .driver
                .poster_at(*time)
                .map(|chunks| PosterFrame::render::<T, _, _>(cols, rows, chunks)),
            None => self
                .info
                .get()
                .and_then(|info| info.poster.as_ref())
                .map(|chunks| PosterFrame::render::<T, _, _>(cols, rows, chunks)),
        }
    }

    fn current_time(&self) -> Option<f64> {
        if let Some(time) = self.driver.current_time() {
            return Some(time);
        }
        let start = self.lock().start_wall_time?;
        Some((self.clock.now() - start) / 1000.0)
    }

    fn duration(&self) -> Option<f64> {
        self.info.get().and_then(|info| info.duration)
    }
}

async fn run_signals<T: Terminal>(
    controller: Weak<Controller<T>>,
    mut signals: mpsc::UnboundedReceiver<Signal>,
) {
    while let Some(signal) = signals.recv().await {
        let Some(controller) = controller.upgrade() else {
            break;
        };
        match signal {
            Signal::Finish => controller.on_finish().await,
        }
    }
}

/// Plays a terminal session into a terminal of type `T`.
///
/// # Example
///
/// ```ignore
/// use castplay::{Player, PlayerConfig, Source};
///
/// let player: Player<MyTerminal> =
///     Player::new(Source::parse("demo.cast")?, PlayerConfig::default())?;
/// player.start().await?;
///
/// while let Some(lines) = player.changed_lines() {
///     for (row, line) in lines {
///         draw(row, &line);
///     }
/// }
/// ```
pub struct Player<T: Terminal> {
    controller: Arc<Controller<T>>,
    signals: AbortHandle,
}

impl<T: Terminal> fmt::Debug for Player<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Player")
            .field("state", &self.state())
            .field("driver", &self.controller.driver)
            .field("listeners", &self.controller.shared.listeners)
            .finish_non_exhaustive()
    }
}

impl<T: Terminal> Player<T> {
    /// Create a player. Must be called within a Tokio runtime.
    pub fn new(source: Source, config: PlayerConfig) -> Result<Self> {
        config.validate()?;

        let clock = Clock::new(config.speed);
        let (sender, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            core: Mutex::new(Core {
                terminal: None,
                cols: config.cols.unwrap_or(DEFAULT_COLS),
                rows: config.rows.unwrap_or(DEFAULT_ROWS),
                dirty: BTreeSet::new(),
                cursor: None,
                state: PlayerState::Initial,
                starting: false,
                was_waiting: false,
                play_count: 0,
                start_wall_time: None,
                slow_start: None,
            }),
            listeners: Listeners::default(),
            signals: sender,
        });

        tracing::debug!(%source, speed = clock.speed(), "creating player");
        let host: Arc<dyn DriverHost> = Arc::clone(&shared) as Arc<dyn DriverHost>;
        let driver = Driver::new(source, DriverContext::new(host, clock), &config.driver_options());

        let controller = Arc::new(Controller {
            config,
            clock,
            driver,
            shared,
            info: OnceCell::new(),
        });
        let signals = tokio::spawn(run_signals(Arc::downgrade(&controller), receiver));

        Ok(Self {
            controller,
            signals: signals.abort_handle(),
        })
    }

    /// Create a player from a source string.
    pub fn from_source(source: &str, config: PlayerConfig) -> Result<Self> {
        Self::new(Source::parse(source)?, config)
    }

    /// Prepare the player without starting playback.
    ///
    /// Initializes the driver when preloading, when the poster needs
    /// recorded frames, or when initialization is free, then renders the
    /// poster into a scratch terminal.
    pub async fn init(&self) -> Result<PlayerInfo> {
        let c = &self.controller;
        let needs_driver = c.config.preload
            || matches!(c.config.poster, Some(Poster::Time(_)))
            || !c.driver.is_remote();
        if needs_driver {
            c.ensure_init().await?;
        }
        Ok(PlayerInfo {
            pausable: c.driver.is_pausable(),
            seekable: c.driver.is_seekable(),
            poster: c.render_poster(),
        })
    }

    /// Start playback from the initial state.
    pub async fn start(&self) -> Result<()> {
        self.controller.start().await
    }

    /// Start, resume or restart as appropriate.
    pub async fn play(&self) -> Result<()> {
        match self.state() {
            PlayerState::Initial => self.start().await,
            PlayerState::Paused => {
                self.resume();
                Ok(())
            }
            PlayerState::Finished => self.restart().await,
            PlayerState::Playing => Ok(()),
        }
    }

    /// Pause playback. Returns whether anything changed.
    pub fn pause(&self) -> bool {
        self.controller.pause()
    }

    /// Resume paused playback. Returns whether anything changed.
    pub fn resume(&self) -> bool {
        self.controller.resume()
    }

    /// Toggle playback, returning whether the player is now playing.
    pub async fn pause_or_resume(&self) -> Result<bool> {
        match self.state() {
            PlayerState::Initial => self.start().await?,
            PlayerState::Playing => {
                self.pause();
            }
            PlayerState::Paused => {
                self.resume();
            }
            PlayerState::Finished => self.restart().await?,
        }
        Ok(self.state() == PlayerState::Playing)
    }

    /// Seek to the start and play. Does nothing for unseekable drivers.
    pub async fn restart(&self) -> Result<()> {
        self.controller.restart().await
    }

    /// Stop the driver and cancel timers.
    pub fn stop(&self) {
        self.controller.stop();
    }

    /// Seek to a target, initializing the driver first.
    pub async fn seek(&self, target: impl Into<SeekTarget>) -> Result<()> {
        self.controller.seek(target.into()).await
    }

    /// Seek to a textual target such as `"50%"`, `"<<"` or `"12.5"`.
    pub async fn seek_to(&self, target: &str) -> Result<()> {
        self.seek(target.parse::<SeekTarget>()?).await
    }

    /// Drain the rows changed since the last call.
    ///
    /// Returns `None` when nothing changed.
    pub fn changed_lines(&self) -> Option<BTreeMap<usize, Line>> {
        let mut guard = self.controller.lock();
        let core = &mut *guard;
        let terminal = core.terminal.as_ref()?;
        if core.dirty.is_empty() {
            return None;
        }
        let rows = core.rows;
        let dirty = std::mem::take(&mut core.dirty);
        Some(
            dirty
                .into_iter()
                .filter(|&row| row < rows)
                .map(|row| {
                    (
                        row,
                        Line {
                            id: row,
                            segments: terminal.line(row),
                        },
                    )
                })
                .collect(),
        )
    }

    /// Cursor position, `None` when hidden or before initialization.
    pub fn cursor(&self) -> Option<(usize, usize)> {
        let mut guard = self.controller.lock();
        let core = &mut *guard;
        let terminal = core.terminal.as_ref()?;
        *core.cursor.get_or_insert_with(|| terminal.cursor())
    }

    /// Playback position in seconds.
    pub fn current_time(&self) -> Option<f64> {
        self.controller.current_time()
    }

    /// Seconds left, when the duration is known.
    pub fn remaining_time(&self) -> Option<f64> {
        let duration = self.duration()?;
        let current = self.current_time().unwrap_or(0.0);
        Some(duration - current.min(duration))
    }

    /// Fraction played in `[0, 1]`, when the duration is known and non-zero.
    pub fn progress(&self) -> Option<f64> {
        let duration = self.duration().filter(|&d| d > 0.0)?;
        let current = self.current_time().unwrap_or(0.0);
        Some(current.clamp(0.0, duration) / duration)
    }

    /// Total duration in seconds, once known.
    pub fn duration(&self) -> Option<f64> {
        self.controller.duration()
    }

    /// Current state.
    pub fn state(&self) -> PlayerState {
        self.controller.state()
    }

    /// Terminal size.
    pub fn size(&self) -> (usize, usize) {
        self.controller.size()
    }

    /// Run `f` with the live terminal, once it exists.
    pub fn with_terminal<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.controller.lock().terminal.as_ref().map(f)
    }

    /// Register a listener.
    pub fn on<F>(&self, kind: EventKind, listener: F)
    where
        F: Fn(&PlayerEvent) + Send + Sync + 'static,
    {
        self.controller.shared.listeners.add(kind, Arc::new(listener));
    }

    /// Register a listener by event name, rejecting unknown names.
    pub fn on_named<F>(&self, name: &str, listener: F) -> Result<()>
    where
        F: Fn(&PlayerEvent) + Send + Sync + 'static,
    {
        let kind = name.parse()?;
        self.on(kind, listener);
        Ok(())
    }
}

impl<T: Terminal> Drop for Player<T> {
    fn drop(&mut self) {
        self.signals.abort();
        self.controller.stop();
    }
}
