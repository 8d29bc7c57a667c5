//! Recorded sessions.
//!
//! This module loads asciicast recordings (v1, v2 and the legacy array form)
//! and prepares them for playback: batching near-simultaneous output and
//! compressing idle gaps.

pub mod asciicast;
pub mod format;
pub mod prepare;

pub use asciicast::{load, parse};
pub use format::{EventCode, Frame, Transcript, TranscriptEvent, TranscriptMetadata};
pub use prepare::{prepare, PrepareOptions, PreparedTranscript, MIN_FRAME_TIME};
