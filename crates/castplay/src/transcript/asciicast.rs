//! Asciicast loading.
//!
//! Three document shapes are accepted:
//!
//! - v1: a single JSON object with a `stdout` array of `[delay, text]` pairs,
//!   where delays are relative to the previous event;
//! - v2: a header line followed by newline-delimited `[time, code, data]`
//!   arrays with absolute times;
//! - legacy: a JSON array `[header, event, event, ...]` with v2 semantics.

use serde::Deserialize;
use serde_json::Value;

use super::format::{EventCode, Transcript, TranscriptEvent, TranscriptMetadata};
use crate::error::{PlayerError, Result};
use crate::source::RecordingSource;

/// Header fields shared by every version. `stdout` only exists in v1.
#[derive(Debug, Default, Deserialize)]
struct Header {
    version: Option<u64>,
    width: Option<usize>,
    height: Option<usize>,
    idle_time_limit: Option<f64>,
    title: Option<String>,
    stdout: Option<Vec<(f64, String)>>,
}

impl Header {
    fn metadata(&self) -> TranscriptMetadata {
        TranscriptMetadata {
            cols: self.width,
            rows: self.height,
            idle_time_limit: self.idle_time_limit,
            title: self.title.clone(),
        }
    }
}

/// Fetch and parse a recording.
#[tracing::instrument(level = "debug", skip_all, fields(source = %source.name()))]
pub async fn load(source: &RecordingSource) -> Result<Transcript> {
    let text = match source {
        RecordingSource::Url(url) => {
            let response = reqwest::get(url.as_str()).await?;
            let status = response.status();
            if !status.is_success() {
                return Err(PlayerError::load(url.as_str(), format!("server responded with {status}")));
            }
            response.text().await?
        }
        RecordingSource::Path(path) => PlayerError::with_io_context(
            tokio::fs::read_to_string(path).await,
            format!("reading {}", path.display()),
        )?,
        RecordingSource::Data(data) => data.clone(),
    };

    let transcript = parse(&text)?;
    tracing::debug!(
        events = transcript.events.len(),
        cols = ?transcript.metadata.cols,
        rows = ?transcript.metadata.rows,
        "recording loaded"
    );
    Ok(transcript)
}

/// Parse a recording document of any supported shape.
pub fn parse(text: &str) -> Result<Transcript> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => {
            let header: Header = serde_json::from_value(Value::Object(map))?;
            match header.version {
                Some(1) => from_v1(header),
                Some(2) => Ok(Transcript::new(header.metadata())),
                Some(version) => Err(PlayerError::UnsupportedVersion { version }),
                None => Err(PlayerError::invalid_recording("header has no version")),
            }
        }
        Ok(Value::Array(items)) => parse_legacy(items),
        Ok(_) => Err(PlayerError::invalid_recording(
            "expected a JSON object or array",
        )),
        Err(_) => parse_ndjson(text),
    }
}

fn from_v1(header: Header) -> Result<Transcript> {
    let metadata = header.metadata();
    let stdout = header
        .stdout
        .ok_or_else(|| PlayerError::invalid_recording("v1 recording has no stdout events"))?;

    let events = stdout
        .into_iter()
        .scan(0.0, |time, (delay, text)| {
            *time += delay;
            Some(TranscriptEvent::output(*time, text))
        })
        .collect();

    Ok(Transcript { metadata, events })
}

fn parse_legacy(items: Vec<Value>) -> Result<Transcript> {
    let mut items = items.into_iter();
    let header = items
        .next()
        .ok_or_else(|| PlayerError::invalid_recording("empty event array"))?;
    let header: Header = serde_json::from_value(header)?;
    check_v2(&header)?;

    let events = items
        .enumerate()
        .map(|(i, item)| {
            let payload = item.to_string();
            serde_json::from_value::<(f64, String, String)>(item)
                .map(into_event)
                .map_err(|_| PlayerError::malformed_event(i + 2, payload))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Transcript {
        metadata: header.metadata(),
        events,
    })
}

fn parse_ndjson(text: &str) -> Result<Transcript> {
    let mut lines = text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty());

    let (_, header_line) = lines
        .next()
        .ok_or_else(|| PlayerError::invalid_recording("empty document"))?;
    let header: Header = serde_json::from_str(header_line)
        .map_err(|_| PlayerError::invalid_recording("first line is not a header object"))?;
    check_v2(&header)?;

    let events = lines
        .map(|(i, line)| {
            serde_json::from_str::<(f64, String, String)>(line)
                .map(into_event)
                .map_err(|_| PlayerError::malformed_event(i + 1, line))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Transcript {
        metadata: header.metadata(),
        events,
    })
}

fn check_v2(header: &Header) -> Result<()> {
    match header.version {
        Some(2) => Ok(()),
        Some(version) => Err(PlayerError::UnsupportedVersion { version }),
        None => Err(PlayerError::invalid_recording("header has no version")),
    }
}

fn into_event((time, code, data): (f64, String, String)) -> TranscriptEvent {
    TranscriptEvent {
        time,
        code: EventCode::from_code(&code),
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::fixtures;

    fn output_text(transcript: &Transcript) -> String {
        transcript
            .events
            .iter()
            .filter(|e| e.is_output())
            .map(|e| e.data.as_str())
            .collect()
    }

    #[test]
    fn parse_v2() {
        let transcript = parse(fixtures::TWO_FRAMES).unwrap();
        assert_eq!(transcript.metadata.cols, Some(2));
        assert_eq!(transcript.metadata.rows, Some(1));
        assert_eq!(transcript.events.len(), 2);
        assert_eq!(transcript.events[1].data, "b");
        assert!((transcript.events[1].time - 0.02).abs() < f64::EPSILON);
    }

    #[test]
    fn parse_v2_keeps_non_output_events() {
        let doc = "{\"version\": 2, \"width\": 80, \"height\": 24, \"idle_time_limit\": 2.5}\n\
                   [0.1, \"o\", \"$ \"]\n\
                   \n\
                   [0.2, \"i\", \"ls\\r\"]\n\
                   [0.3, \"m\", \"chapter 1\"]\n";
        let transcript = parse(doc).unwrap();
        assert_eq!(transcript.metadata.idle_time_limit, Some(2.5));
        let codes: Vec<_> = transcript.events.iter().map(|e| e.code.clone()).collect();
        assert_eq!(
            codes,
            vec![EventCode::Output, EventCode::Input, EventCode::Marker]
        );
        assert_eq!(transcript.events[1].data, "ls\r");
    }

    #[test]
    fn parse_v2_title() {
        let doc = "{\"version\": 2, \"width\": 8, \"height\": 2, \"title\": \"demo\"}\n[0, \"o\", \"x\"]\n";
        let transcript = parse(doc).unwrap();
        assert_eq!(transcript.metadata.title.as_deref(), Some("demo"));
    }

    #[test]
    fn parse_v2_header_only() {
        let transcript = parse("{\"version\": 2, \"width\": 80, \"height\": 24}\n").unwrap();
        assert!(transcript.events.is_empty());
        assert_eq!(transcript.metadata.cols, Some(80));
    }

    #[test]
    fn parse_v1_accumulates_delays() {
        let transcript = parse(fixtures::V1).unwrap();
        let times: Vec<f64> = transcript.events.iter().map(|e| e.time).collect();
        assert_eq!(times, vec![0.5, 1.0, 1.5]);
        assert_eq!(output_text(&transcript), "hello world");
        assert_eq!(transcript.metadata.cols, Some(20));
    }

    #[test]
    fn parse_v1_without_stdout() {
        let err = parse(r#"{"version": 1, "width": 80, "height": 24}"#).unwrap_err();
        assert!(matches!(err, PlayerError::InvalidRecording { .. }));
    }

    #[test]
    fn parse_legacy_array() {
        let doc = r#"[{"version": 2, "width": 4, "height": 2}, [0.5, "o", "x"], [1.0, "o", "y"]]"#;
        let transcript = parse(doc).unwrap();
        assert_eq!(transcript.metadata.cols, Some(4));
        assert_eq!(output_text(&transcript), "xy");
    }

    #[test]
    fn parse_legacy_malformed_event() {
        let doc = r#"[{"version": 2}, [0.5, "o", "x"], {"bad": true}]"#;
        match parse(doc).unwrap_err() {
            PlayerError::MalformedEvent { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unsupported_version() {
        let err = parse("{\"version\": 3, \"term\": {}}\n[0.1, \"o\", \"x\"]\n").unwrap_err();
        assert!(matches!(err, PlayerError::UnsupportedVersion { version: 3 }));

        let err = parse(r#"{"version": 9}"#).unwrap_err();
        assert!(matches!(err, PlayerError::UnsupportedVersion { version: 9 }));
    }

    #[test]
    fn malformed_event_line_number() {
        let doc = "{\"version\": 2}\n[0.1, \"o\", \"x\"]\nnot json\n";
        match parse(doc).unwrap_err() {
            PlayerError::MalformedEvent { line, payload } => {
                assert_eq!(line, 3);
                assert_eq!(payload, "not json");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_document() {
        assert!(matches!(
            parse("").unwrap_err(),
            PlayerError::InvalidRecording { .. }
        ));
        assert!(matches!(
            parse("42").unwrap_err(),
            PlayerError::InvalidRecording { .. }
        ));
    }

    #[tokio::test]
    async fn load_inline_data() {
        let source = RecordingSource::Data(fixtures::COUNTDOWN.to_string());
        let transcript = load(&source).await.unwrap();
        assert_eq!(transcript.events.len(), 4);
    }

    #[tokio::test]
    async fn load_missing_file() {
        let source = RecordingSource::Path("/definitely/not/here.cast".into());
        let err = load(&source).await.unwrap_err();
        assert!(err.is_load_error());
        assert!(err.to_string().contains("not/here.cast"));
    }
}
