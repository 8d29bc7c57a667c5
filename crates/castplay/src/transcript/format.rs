//! Transcript format definitions.

use bytes::Bytes;

/// Event codes found in asciicast event streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventCode {
    /// Output from the session (`"o"`).
    Output,
    /// Input to the session (`"i"`).
    Input,
    /// Window resize (`"r"`).
    Resize,
    /// Marker/annotation (`"m"`).
    Marker,
    /// Any other code, kept verbatim.
    Other(String),
}

impl EventCode {
    /// Parse a one-letter event code.
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        match code {
            "o" => Self::Output,
            "i" => Self::Input,
            "r" => Self::Resize,
            "m" => Self::Marker,
            other => Self::Other(other.to_string()),
        }
    }
}

/// A transcript event with an absolute timestamp in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEvent {
    /// Seconds from the start of the recording.
    pub time: f64,
    /// Event code.
    pub code: EventCode,
    /// Event payload.
    pub data: String,
}

impl TranscriptEvent {
    /// Create an output event.
    #[must_use]
    pub fn output(time: f64, data: impl Into<String>) -> Self {
        Self {
            time,
            code: EventCode::Output,
            data: data.into(),
        }
    }

    /// Create an input event.
    #[must_use]
    pub fn input(time: f64, data: impl Into<String>) -> Self {
        Self {
            time,
            code: EventCode::Input,
            data: data.into(),
        }
    }

    /// Check if this is an output event.
    #[must_use]
    pub fn is_output(&self) -> bool {
        self.code == EventCode::Output
    }
}

/// Transcript metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranscriptMetadata {
    /// Terminal width, when recorded.
    pub cols: Option<usize>,
    /// Terminal height, when recorded.
    pub rows: Option<usize>,
    /// Idle time limit suggested by the recording.
    pub idle_time_limit: Option<f64>,
    /// Title for the recording.
    pub title: Option<String>,
}

impl TranscriptMetadata {
    /// Create new metadata with dimensions.
    #[must_use]
    pub fn new(cols: usize, rows: usize) -> Self {
        Self {
            cols: Some(cols),
            rows: Some(rows),
            ..Default::default()
        }
    }
}

/// A complete, unprepared recording.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    /// Metadata.
    pub metadata: TranscriptMetadata,
    /// Events in recorded order.
    pub events: Vec<TranscriptEvent>,
}

impl Transcript {
    /// Create a new transcript.
    #[must_use]
    pub const fn new(metadata: TranscriptMetadata) -> Self {
        Self {
            metadata,
            events: Vec::new(),
        }
    }

    /// Add an event.
    pub fn push(&mut self, event: TranscriptEvent) {
        self.events.push(event);
    }
}

/// One unit of replay: output to feed at a point in virtual time.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Seconds from the start of the prepared timeline.
    pub time: f64,
    /// Output bytes.
    pub data: Bytes,
}

impl Frame {
    /// Create a frame.
    #[must_use]
    pub fn new(time: f64, data: impl Into<Bytes>) -> Self {
        Self {
            time,
            data: data.into(),
        }
    }

    /// Virtual time of this frame in milliseconds.
    #[must_use]
    pub fn time_ms(&self) -> f64 {
        self.time * 1000.0
    }
}
