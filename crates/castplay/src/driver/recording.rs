//! Recorded-session driver.
//!
//! Frames are played by one task per resume. The task sleeps until the next
//! frame is due, then feeds that frame and every following frame that is
//! already due before sleeping again, so a stalled runtime catches up in one
//! step instead of draining a backlog of timers.
//!
//! Seeking replays from the start only when moving backwards: the terminal is
//! reset with `ESC c` and frames are fed again up to the target.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::OnceCell;
use tokio::task::AbortHandle;

use super::{DriverContext, DriverInfo, DriverOptions, SeekTarget};
use crate::error::{PlayerError, Result};
use crate::source::RecordingSource;
use crate::transcript::{self, Frame, PrepareOptions};

/// Full terminal reset (RIS), fed before replaying on a backward seek.
pub const RESET_SEQUENCE: &[u8] = b"\x1bc";

/// Frames due within this many milliseconds are fed without sleeping.
const DUE_TOLERANCE_MS: f64 = 1.0;

/// Playback position and progress through the frames.
#[derive(Debug)]
struct Playback {
    frames: Arc<[Frame]>,
    duration_ms: f64,
    next: usize,
    /// Frozen position while paused.
    elapsed_ms: f64,
    /// Clock reading at which position zero would have been, while running.
    start_time_ms: Option<f64>,
    task: Option<AbortHandle>,
    generation: u64,
}

impl Playback {
    fn new() -> Self {
        Self {
            frames: Arc::from(Vec::new()),
            duration_ms: 0.0,
            next: 0,
            elapsed_ms: 0.0,
            start_time_ms: None,
            task: None,
            generation: 0,
        }
    }

    const fn is_running(&self) -> bool {
        self.start_time_ms.is_some()
    }

    fn position(&self, now: f64) -> f64 {
        match self.start_time_ms {
            Some(start) => now - start,
            None => self.elapsed_ms,
        }
    }

    /// Cancel the playback task and freeze the position.
    fn halt(&mut self, now: f64) {
        self.elapsed_ms = self.position(now);
        self.start_time_ms = None;
        self.generation += 1;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[derive(Debug)]
struct Shared {
    ctx: DriverContext,
    playback: Mutex<Playback>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Playback> {
        self.playback.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Metadata kept after loading.
#[derive(Debug, Clone)]
struct Loaded {
    info: DriverInfo,
    effective_start_at: f64,
}

/// Plays a recorded session.
#[derive(Debug)]
pub struct RecordingDriver {
    source: RecordingSource,
    prepare: PrepareOptions,
    loaded: OnceCell<Loaded>,
    shared: Arc<Shared>,
}

impl RecordingDriver {
    /// Create a driver. Nothing is loaded until [`RecordingDriver::init`].
    #[must_use]
    pub fn new(source: RecordingSource, ctx: DriverContext, options: &DriverOptions) -> Self {
        Self {
            source,
            prepare: PrepareOptions {
                idle_time_limit: options.idle_time_limit,
                start_at: options.start_at,
            },
            loaded: OnceCell::new(),
            shared: Arc::new(Shared {
                ctx,
                playback: Mutex::new(Playback::new()),
            }),
        }
    }

    /// Load and prepare the recording. Concurrent and repeated calls share
    /// one load.
    pub async fn init(&self) -> Result<DriverInfo> {
        let loaded = self.loaded.get_or_try_init(|| self.load()).await?;
        Ok(loaded.info.clone())
    }

    async fn load(&self) -> Result<Loaded> {
        let transcript = transcript::load(&self.source).await.inspect_err(|e| {
            tracing::error!(source = %self.source.name(), error = %e, "failed to load recording");
        })?;
        let prepared = transcript::prepare(transcript, self.prepare);

        if prepared.frames.is_empty() {
            tracing::error!(source = %self.source.name(), "recording has no output events");
            return Err(PlayerError::load(
                self.source.name(),
                "recording has no output events",
            ));
        }

        {
            let mut playback = self.shared.lock();
            playback.frames = Arc::from(prepared.frames);
            playback.duration_ms = prepared.duration * 1000.0;
        }

        tracing::info!(
            source = %self.source.name(),
            title = prepared.metadata.title.as_deref().unwrap_or_default(),
            duration = prepared.duration,
            "recording ready"
        );

        Ok(Loaded {
            info: DriverInfo {
                cols: prepared.metadata.cols,
                rows: prepared.metadata.rows,
                duration: Some(prepared.duration),
                poster: None,
            },
            effective_start_at: prepared.effective_start_at,
        })
    }

    /// Seek to the start position and begin playing.
    pub fn start(&self) {
        let start_at = self.loaded.get().map_or(0.0, |l| l.effective_start_at);
        self.seek(SeekTarget::Seconds(start_at));
        self.resume();
    }

    /// Halt playback. A stopped driver can be resumed.
    pub fn stop(&self) {
        self.pause();
    }

    /// Pause playback, returning `false` if it was not running.
    pub fn pause(&self) -> bool {
        let mut playback = self.shared.lock();
        if !playback.is_running() {
            return false;
        }
        playback.halt(self.shared.ctx.now());
        tracing::debug!(position = playback.elapsed_ms / 1000.0, "paused");
        true
    }

    /// Resume playback, returning `false` if it was already running or
    /// nothing is loaded.
    pub fn resume(&self) -> bool {
        let mut playback = self.shared.lock();
        if playback.is_running() || playback.frames.is_empty() {
            return false;
        }
        resume_locked(&self.shared, &mut playback);
        true
    }

    /// Toggle playback, returning whether it now runs.
    pub fn pause_or_resume(&self) -> bool {
        if self.pause() {
            false
        } else {
            self.resume()
        }
    }

    /// Seek to a target, returning the new position in seconds, or `None`
    /// before the recording is loaded.
    pub fn seek(&self, target: SeekTarget) -> Option<f64> {
        let ctx = &self.shared.ctx;
        let mut playback = self.shared.lock();
        if playback.frames.is_empty() {
            return None;
        }

        let was_running = playback.is_running();
        playback.halt(ctx.now());

        let position_ms = playback.elapsed_ms;
        let duration = playback.duration_ms / 1000.0;
        let target = target.resolve(position_ms / 1000.0, duration);
        let target_ms = target * 1000.0;

        if target_ms < position_ms {
            ctx.feed(RESET_SEQUENCE);
            playback.next = 0;
        }

        let frames = Arc::clone(&playback.frames);
        let mut fed = 0usize;
        while let Some(frame) = frames.get(playback.next) {
            if frame.time > target {
                break;
            }
            ctx.feed(&frame.data);
            playback.next += 1;
            fed += 1;
        }
        playback.elapsed_ms = target_ms;

        tracing::debug!(from = position_ms / 1000.0, to = target, fed, "seek");

        if was_running {
            resume_locked(&self.shared, &mut playback);
        }
        Some(target)
    }

    /// Output of every frame up to `time`, for rendering a poster.
    #[must_use]
    pub fn poster(&self, time: f64) -> Option<Vec<Bytes>> {
        let playback = self.shared.lock();
        if playback.frames.is_empty() {
            return None;
        }
        Some(
            playback
                .frames
                .iter()
                .take_while(|frame| frame.time <= time)
                .map(|frame| frame.data.clone())
                .collect(),
        )
    }

    /// Playback position in seconds.
    #[must_use]
    pub fn current_time(&self) -> f64 {
        self.shared.lock().position(self.shared.ctx.now()) / 1000.0
    }

    /// Whether frames are being played.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.lock().is_running()
    }
}

impl Drop for RecordingDriver {
    fn drop(&mut self) {
        let mut playback = self.shared.lock();
        if let Some(task) = playback.task.take() {
            task.abort();
        }
    }
}

fn resume_locked(shared: &Arc<Shared>, playback: &mut Playback) {
    let now = shared.ctx.now();
    playback.start_time_ms = Some(now - playback.elapsed_ms);
    playback.generation += 1;

    let generation = playback.generation;
    let task = tokio::spawn(play_frames(Arc::clone(shared), generation));
    playback.task = Some(task.abort_handle());
    tracing::debug!(position = playback.elapsed_ms / 1000.0, "playing");
}

async fn play_frames(shared: Arc<Shared>, generation: u64) {
    let ctx = &shared.ctx;
    loop {
        let wait_ms = {
            let mut playback = shared.lock();
            if playback.generation != generation {
                return;
            }

            let position = playback.position(ctx.now());
            let frames = Arc::clone(&playback.frames);
            let mut fed = 0usize;
            while let Some(frame) = frames.get(playback.next) {
                if frame.time_ms() - position >= DUE_TOLERANCE_MS {
                    break;
                }
                ctx.feed(&frame.data);
                playback.next += 1;
                fed += 1;
            }
            if fed > 1 {
                tracing::trace!(fed, "fed overdue frames");
            }

            match frames.get(playback.next) {
                Some(frame) => frame.time_ms() - position,
                None => {
                    playback.elapsed_ms = playback.duration_ms;
                    playback.start_time_ms = None;
                    playback.task = None;
                    drop(playback);
                    tracing::info!("recording finished");
                    ctx.finish();
                    return;
                }
            }
        };
        ctx.clock().sleep(wait_ms).await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::driver::testing::{Call, TestHost, advance};
    use crate::test_utils::fixtures;

    fn driver(doc: &str, speed: f64) -> (Arc<TestHost>, RecordingDriver) {
        driver_with(doc, speed, &DriverOptions::default())
    }

    fn driver_with(
        doc: &str,
        speed: f64,
        options: &DriverOptions,
    ) -> (Arc<TestHost>, RecordingDriver) {
        let (host, ctx) = TestHost::context(speed);
        let driver = RecordingDriver::new(RecordingSource::Data(doc.to_string()), ctx, options);
        (host, driver)
    }

    #[tokio::test(start_paused = true)]
    async fn init_reports_dimensions_and_duration() {
        let (_, driver) = driver(fixtures::COUNTDOWN, 1.0);
        let info = driver.init().await.unwrap();
        assert_eq!(info.cols, Some(10));
        assert_eq!(info.rows, Some(3));
        assert_eq!(info.duration, Some(4.0));
        // Memoized.
        assert_eq!(driver.init().await.unwrap(), info);
    }

    #[tokio::test(start_paused = true)]
    async fn init_rejects_recording_without_output() {
        let (_, driver) = driver("{\"version\": 2, \"width\": 80, \"height\": 24}\n", 1.0);
        let err = driver.init().await.unwrap_err();
        assert!(err.is_load_error());
    }

    #[tokio::test(start_paused = true)]
    async fn plays_frames_in_order_then_finishes() {
        let (host, driver) = driver(fixtures::TWO_FRAMES, 1.0);
        driver.init().await.unwrap();
        driver.start();
        assert_eq!(host.fed(), "a");

        advance(Duration::from_millis(100)).await;
        assert_eq!(host.fed(), "ab");
        assert_eq!(host.finishes(), 1);
        assert!(!driver.is_running());
        assert!((driver.current_time() - 0.02).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn respects_frame_timing() {
        let (host, driver) = driver(fixtures::COUNTDOWN, 1.0);
        driver.init().await.unwrap();
        driver.start();

        advance(Duration::from_millis(1500)).await;
        assert_eq!(host.fed(), "3");
        advance(Duration::from_millis(1000)).await;
        assert_eq!(host.fed(), "32");
    }

    #[tokio::test(start_paused = true)]
    async fn speed_scales_playback() {
        let (host, driver) = driver(fixtures::COUNTDOWN, 2.0);
        driver.init().await.unwrap();
        driver.start();

        advance(Duration::from_millis(1100)).await;
        assert_eq!(host.fed(), "32");
        advance(Duration::from_millis(1000)).await;
        assert_eq!(host.fed(), "3210");
        assert_eq!(host.finishes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_freezes_position() {
        let (host, driver) = driver(fixtures::COUNTDOWN, 1.0);
        driver.init().await.unwrap();
        driver.start();
        advance(Duration::from_millis(1500)).await;

        assert!(!driver.pause_or_resume());
        let frozen = driver.current_time();
        advance(Duration::from_millis(5000)).await;
        assert_eq!(host.fed(), "3");
        assert!((driver.current_time() - frozen).abs() < 1e-9);

        assert!(driver.pause_or_resume());
        advance(Duration::from_millis(600)).await;
        assert_eq!(host.fed(), "32");
    }

    #[tokio::test(start_paused = true)]
    async fn backward_seek_resets_once() {
        let (host, driver) = driver(fixtures::COUNTDOWN, 1.0);
        driver.init().await.unwrap();
        assert_eq!(driver.seek(SeekTarget::Seconds(3.5)), Some(3.5));
        assert_eq!(host.fed(), "321");

        assert_eq!(driver.seek(SeekTarget::Seconds(1.5)), Some(1.5));
        let calls = host.calls();
        let resets = calls
            .iter()
            .filter(|c| **c == Call::Feed("\x1bc".into()))
            .count();
        assert_eq!(resets, 1);
        assert_eq!(host.fed(), "321\x1bc3");
    }

    #[tokio::test(start_paused = true)]
    async fn forward_seek_does_not_reset() {
        let (host, driver) = driver(fixtures::COUNTDOWN, 1.0);
        driver.init().await.unwrap();
        driver.seek(SeekTarget::Seconds(1.0));
        driver.seek(SeekTarget::Seconds(3.0));
        assert_eq!(host.fed(), "321");
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_seek_is_idempotent() {
        let (host, driver) = driver(fixtures::COUNTDOWN, 1.0);
        driver.init().await.unwrap();
        driver.seek(SeekTarget::Seconds(2.0));
        let once = host.fed();
        driver.seek(SeekTarget::Seconds(2.0));
        assert_eq!(host.fed(), once);
    }

    #[tokio::test(start_paused = true)]
    async fn relative_seek_clamps() {
        let (_, driver) = driver(fixtures::COUNTDOWN, 1.0);
        driver.init().await.unwrap();
        assert_eq!(driver.seek(SeekTarget::Back), Some(0.0));
        assert_eq!(driver.seek(SeekTarget::Percent(150.0)), Some(4.0));
        let position = driver.seek(SeekTarget::FarBack).unwrap();
        assert!((position - 3.6).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn seek_while_playing_keeps_playing() {
        let (host, driver) = driver(fixtures::COUNTDOWN, 1.0);
        driver.init().await.unwrap();
        driver.start();
        driver.seek(SeekTarget::Seconds(2.5));
        assert!(driver.is_running());
        assert_eq!(host.fed(), "32");

        advance(Duration::from_millis(700)).await;
        assert_eq!(host.fed(), "321");
    }

    #[tokio::test(start_paused = true)]
    async fn seek_before_init_is_ignored() {
        let (host, driver) = driver(fixtures::COUNTDOWN, 1.0);
        assert_eq!(driver.seek(SeekTarget::Seconds(2.0)), None);
        assert!(host.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn poster_leaves_playback_alone() {
        let (host, driver) = driver(fixtures::COUNTDOWN, 1.0);
        assert!(driver.poster(2.0).is_none());
        driver.init().await.unwrap();

        let poster = driver.poster(2.0).unwrap();
        assert_eq!(poster, vec![Bytes::from("3"), Bytes::from("2")]);
        assert!(host.calls().is_empty());
        assert!(driver.current_time().abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn start_at_skips_ahead() {
        let options = DriverOptions {
            start_at: 2.5,
            ..DriverOptions::default()
        };
        let (host, driver) = driver_with(fixtures::COUNTDOWN, 1.0, &options);
        driver.init().await.unwrap();
        driver.start();
        assert_eq!(host.fed(), "32");
        assert!((driver.current_time() - 2.5).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_playback() {
        let (host, driver) = driver(fixtures::COUNTDOWN, 1.0);
        driver.init().await.unwrap();
        driver.start();
        driver.stop();
        advance(Duration::from_millis(10_000)).await;
        assert!(host.calls().is_empty());
        assert_eq!(host.finishes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_limit_compresses_playback() {
        let (host, driver) = driver(fixtures::IDLE_GAP, 1.0);
        let info = driver.init().await.unwrap();
        assert_eq!(info.duration, Some(7.0));

        driver.start();
        advance(Duration::from_millis(6500)).await;
        assert_eq!(host.fed(), "abc");
    }
}
