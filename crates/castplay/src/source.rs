//! Source descriptors.
//!
//! A source string selects the driver that produces output:
//!
//! | Source                    | Driver                     |
//! |---------------------------|----------------------------|
//! | `ws://...`, `wss://...`   | live WebSocket stream      |
//! | `test://random`           | random characters          |
//! | `test://clock`            | wall clock                 |
//! | `http://...`, `https://...` | recording fetched by URL |
//! | anything else             | recording read from a file |
//!
//! Server-sent event streams and inline recordings are built with
//! [`Source::event_source`] and [`Source::data`].

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{PlayerError, Result};

/// Where a recording comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingSource {
    /// Fetched over HTTP.
    Url(String),
    /// Read from the local filesystem.
    Path(PathBuf),
    /// Already in memory.
    Data(String),
}

impl RecordingSource {
    /// Short human-readable name for logs and errors.
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::Url(url) => url.clone(),
            Self::Path(path) => path.display().to_string(),
            Self::Data(data) => format!("inline data ({} bytes)", data.len()),
        }
    }
}

/// Push transport for a live stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// A WebSocket connection.
    WebSocket,
    /// A server-sent events stream.
    EventSource,
}

/// Synthetic test drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntheticKind {
    /// Random printable characters at random intervals.
    Random,
    /// A wall clock redrawn every second.
    Clock,
}

impl FromStr for SyntheticKind {
    type Err = PlayerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "random" => Ok(Self::Random),
            "clock" => Ok(Self::Clock),
            other => Err(PlayerError::config(format!(
                "unknown test driver: {other}"
            ))),
        }
    }
}

/// A playback source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// A recorded session.
    Recording(RecordingSource),
    /// A live stream.
    Live {
        /// Push transport.
        transport: Transport,
        /// Stream URL.
        url: String,
    },
    /// A synthetic test driver.
    Test(SyntheticKind),
}

impl Source {
    /// Parse a source string.
    pub fn parse(source: &str) -> Result<Self> {
        let source = source.trim();
        if source.is_empty() {
            return Err(PlayerError::config("empty source"));
        }

        if source.starts_with("ws://") || source.starts_with("wss://") {
            return Ok(Self::Live {
                transport: Transport::WebSocket,
                url: source.to_string(),
            });
        }
        if let Some(kind) = source.strip_prefix("test://") {
            return kind.parse().map(Self::Test);
        }
        if source.starts_with("http://") || source.starts_with("https://") {
            return Ok(Self::Recording(RecordingSource::Url(source.to_string())));
        }
        Ok(Self::Recording(RecordingSource::Path(PathBuf::from(source))))
    }

    /// A live server-sent events stream.
    #[must_use]
    pub fn event_source(url: impl Into<String>) -> Self {
        Self::Live {
            transport: Transport::EventSource,
            url: url.into(),
        }
    }

    /// A recording held in memory.
    #[must_use]
    pub fn data(text: impl Into<String>) -> Self {
        Self::Recording(RecordingSource::Data(text.into()))
    }

    /// Whether this source is a live stream.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Live { .. })
    }
}

impl FromStr for Source {
    type Err = PlayerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recording(recording) => f.write_str(&recording.name()),
            Self::Live { url, .. } => f.write_str(url),
            Self::Test(SyntheticKind::Random) => f.write_str("test://random"),
            Self::Test(SyntheticKind::Clock) => f.write_str("test://clock"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn websocket_urls() {
        let source = Source::parse("wss://example.com/s/abc/ws").unwrap();
        assert_eq!(
            source,
            Source::Live {
                transport: Transport::WebSocket,
                url: "wss://example.com/s/abc/ws".into()
            }
        );
        assert!(source.is_live());
    }

    #[test]
    fn test_drivers() {
        assert_eq!(
            Source::parse("test://clock").unwrap(),
            Source::Test(SyntheticKind::Clock)
        );
        assert_eq!(
            "test://random".parse::<Source>().unwrap(),
            Source::Test(SyntheticKind::Random)
        );
        assert!(Source::parse("test://nope").unwrap_err().is_config());
    }

    #[test]
    fn recordings() {
        assert_eq!(
            Source::parse("https://example.com/demo.cast").unwrap(),
            Source::Recording(RecordingSource::Url("https://example.com/demo.cast".into()))
        );
        assert_eq!(
            Source::parse("demo.cast").unwrap(),
            Source::Recording(RecordingSource::Path("demo.cast".into()))
        );
        assert!(Source::parse("   ").is_err());
    }

    #[test]
    fn constructors() {
        assert!(matches!(
            Source::event_source("https://example.com/sse"),
            Source::Live {
                transport: Transport::EventSource,
                ..
            }
        ));
        let source = Source::data("{}");
        assert_eq!(source.to_string(), "inline data (2 bytes)");
    }
}
