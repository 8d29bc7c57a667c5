//! Frame preparation: batching and idle-time compression.
//!
//! Output events are first batched so that events less than one rendering
//! frame apart reach the terminal in a single feed, then idle gaps longer than
//! the configured limit are shortened to that limit.

use bytes::{Bytes, BytesMut};

use super::format::{Frame, Transcript, TranscriptMetadata};
use crate::stream::{Emitter, SequenceExt, Transformer};

/// One rendering frame at 60 Hz, in seconds.
pub const MIN_FRAME_TIME: f64 = 1.0 / 60.0;

/// Options for [`prepare`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PrepareOptions {
    /// Idle time ceiling in seconds. Overrides the recording's own limit.
    pub idle_time_limit: Option<f64>,
    /// Requested start position in recorded seconds.
    pub start_at: f64,
}

/// A recording ready for playback.
#[derive(Debug, Clone)]
pub struct PreparedTranscript {
    /// Recording metadata.
    pub metadata: TranscriptMetadata,
    /// Frames with non-decreasing times.
    pub frames: Vec<Frame>,
    /// Time of the last frame.
    pub duration: f64,
    /// `start_at` translated onto the compressed timeline.
    pub effective_start_at: f64,
}

/// Merges output closer than `min_frame_time` to the first event of a batch.
#[derive(Debug)]
pub struct Batcher {
    min_frame_time: f64,
    batch: Option<(f64, BytesMut)>,
}

impl Batcher {
    /// Create a batcher with the given frame interval.
    #[must_use]
    pub const fn new(min_frame_time: f64) -> Self {
        Self {
            min_frame_time,
            batch: None,
        }
    }
}

impl Default for Batcher {
    fn default() -> Self {
        Self::new(MIN_FRAME_TIME)
    }
}

impl Transformer<Frame> for Batcher {
    type Output = Frame;

    fn step(&mut self, frame: Frame, out: &mut Emitter<Frame>) {
        if let Some((start, data)) = &mut self.batch {
            if frame.time - *start < self.min_frame_time {
                data.extend_from_slice(&frame.data);
                return;
            }
        }
        if let Some((time, data)) = self.batch.take() {
            out.emit(Frame::new(time, data.freeze()));
        }
        self.batch = Some((frame.time, BytesMut::from(&frame.data[..])));
    }

    fn flush(&mut self, out: &mut Emitter<Frame>) {
        if let Some((time, data)) = self.batch.take() {
            out.emit(Frame::new(time, data.freeze()));
        }
    }
}

/// Shortens gaps longer than a limit and tracks how far a start offset moved.
#[derive(Debug, Clone)]
pub struct IdleLimiter {
    limit: f64,
    start_at: f64,
    prev: f64,
    shift: f64,
    offset: f64,
}

impl IdleLimiter {
    /// Create a limiter. An infinite limit leaves every frame untouched.
    #[must_use]
    pub const fn new(limit: f64, start_at: f64) -> Self {
        Self {
            limit,
            start_at,
            prev: 0.0,
            shift: 0.0,
            offset: 0.0,
        }
    }

    /// Shift one frame onto the compressed timeline.
    pub fn apply(&mut self, frame: Frame) -> Frame {
        let delta = (frame.time - self.prev) - self.limit;
        self.prev = frame.time;

        if delta > 0.0 {
            self.shift += delta;
            if frame.time < self.start_at {
                self.offset += delta;
            }
        }

        Frame {
            time: frame.time - self.shift,
            data: frame.data,
        }
    }

    /// Total time removed so far.
    #[must_use]
    pub const fn shift(&self) -> f64 {
        self.shift
    }

    /// Time removed before `start_at`.
    #[must_use]
    pub const fn offset(&self) -> f64 {
        self.offset
    }
}

/// Prepare a transcript for playback.
#[must_use]
pub fn prepare(transcript: Transcript, options: PrepareOptions) -> PreparedTranscript {
    let Transcript { metadata, events } = transcript;
    let limit = options
        .idle_time_limit
        .or(metadata.idle_time_limit)
        .unwrap_or(f64::INFINITY);
    let mut limiter = IdleLimiter::new(limit, options.start_at);

    let frames: Vec<Frame> = events
        .into_iter()
        .filter(|e| e.is_output())
        .map(|e| Frame::new(e.time, Bytes::from(e.data)))
        .transform(Batcher::default())
        .map(|frame| limiter.apply(frame))
        .collect();

    let duration = frames.last().map_or(0.0, |f| f.time);
    let effective_start_at = options.start_at - limiter.offset();

    tracing::debug!(
        frames = frames.len(),
        duration,
        idle_time_limit = limit,
        removed = limiter.shift(),
        "recording prepared"
    );

    PreparedTranscript {
        metadata,
        frames,
        duration,
        effective_start_at,
    }
}
