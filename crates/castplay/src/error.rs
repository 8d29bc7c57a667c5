//! Error types for castplay.
//!
//! Load failures are fatal to a driver's initialization and surface from
//! [`Player::init`](crate::Player::init) or the first operation that forces
//! initialization. Configuration errors fail fast. Live stream disruptions
//! never appear here: live drivers recover from them by reconnecting.

use thiserror::Error;

/// Maximum length of a payload excerpt shown in error messages.
const MAX_EXCERPT: usize = 120;

/// Shorten a payload for display, keeping the head.
fn excerpt(payload: &str) -> String {
    if payload.is_empty() {
        return "(empty)".to_string();
    }

    let trimmed = payload.trim();
    if trimmed.len() <= MAX_EXCERPT {
        return format!("'{trimmed}'");
    }

    let mut end = MAX_EXCERPT;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("'{}...' ({} bytes)", &trimmed[..end], trimmed.len())
}

/// The main error type for castplay operations.
#[derive(Debug, Error)]
pub enum PlayerError {
    /// The recording could not be loaded or is malformed.
    #[error("failed to load recording from {source_name}: {reason}")]
    Load {
        /// Where the recording was loaded from.
        source_name: String,
        /// What went wrong.
        reason: String,
    },

    /// The document is not a recording in any supported shape.
    #[error("invalid recording: {reason}")]
    InvalidRecording {
        /// What is wrong with the document.
        reason: String,
    },

    /// The recording declares a format version this crate cannot play.
    #[error("unsupported asciicast version: {version}")]
    UnsupportedVersion {
        /// The declared version.
        version: u64,
    },

    /// A line of the recording is not valid JSON of the expected shape.
    #[error("malformed event on line {line}: {}", excerpt(payload))]
    MalformedEvent {
        /// One-based line number within the document.
        line: usize,
        /// The offending text.
        payload: String,
    },

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error while fetching a recording or opening an event stream.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket protocol error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An I/O error occurred with additional context.
    #[error("{context}: {source}")]
    IoWithContext {
        /// What operation was being performed.
        context: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },
}

/// Result type alias for castplay operations.
pub type Result<T> = std::result::Result<T, PlayerError>;

impl PlayerError {
    /// Create a load error.
    pub fn load(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Load {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid recording error.
    pub fn invalid_recording(reason: impl Into<String>) -> Self {
        Self::InvalidRecording {
            reason: reason.into(),
        }
    }

    /// Create a malformed event error.
    pub fn malformed_event(line: usize, payload: impl Into<String>) -> Self {
        Self::MalformedEvent {
            line,
            payload: payload.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an I/O error with context.
    pub fn io_context(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::IoWithContext {
            context: context.into(),
            source,
        }
    }

    /// Wrap an I/O result with context.
    pub fn with_io_context<T>(result: std::io::Result<T>, context: impl Into<String>) -> Result<T> {
        result.map_err(|e| Self::io_context(context, e))
    }

    /// Check if this error prevents a recording from loading.
    #[must_use]
    pub const fn is_load_error(&self) -> bool {
        matches!(
            self,
            Self::Load { .. }
                | Self::InvalidRecording { .. }
                | Self::UnsupportedVersion { .. }
                | Self::MalformedEvent { .. }
                | Self::Json(_)
                | Self::Http(_)
                | Self::Io(_)
                | Self::IoWithContext { .. }
        )
    }

    /// Check if this is a configuration error.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }
}
