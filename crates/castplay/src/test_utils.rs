//! Test utilities for castplay.
//!
//! Provides a terminal stand-in that records everything it is fed, plus a
//! handful of recording fixtures.
//!
//! # Example
//!
//! ```ignore
//! use castplay::test_utils::{RecordingTerminal, fixtures};
//! use castplay::{Player, PlayerConfig, Source};
//!
//! let player: Player<RecordingTerminal> =
//!     Player::new(Source::data(fixtures::TWO_FRAMES), PlayerConfig::default())?;
//! ```

use crate::terminal::{Segment, Terminal};

/// Full terminal reset sequence (RIS).
pub const RESET_SEQUENCE: &[u8] = b"\x1bc";

/// A minimal line-oriented terminal that records every chunk it is fed.
///
/// Understands printable text, `\r`, `\n`, the `ESC c` reset and cursor
/// show/hide (`ESC [ ? 25 h/l`). Every other escape sequence is skipped.
#[derive(Debug, Clone)]
pub struct RecordingTerminal {
    cols: usize,
    rows: Vec<String>,
    col: usize,
    row: usize,
    cursor_visible: bool,
    fed: Vec<Vec<u8>>,
    resets: usize,
}

impl RecordingTerminal {
    /// Every chunk fed so far, in order.
    #[must_use]
    pub fn fed(&self) -> &[Vec<u8>] {
        &self.fed
    }

    /// Everything fed so far as one lossy string.
    #[must_use]
    pub fn fed_text(&self) -> String {
        let bytes: Vec<u8> = self.fed.iter().flatten().copied().collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Number of `ESC c` resets seen.
    #[must_use]
    pub const fn resets(&self) -> usize {
        self.resets
    }

    /// Screen text, rows joined with `\n`, trailing blank rows dropped.
    #[must_use]
    pub fn screen_text(&self) -> String {
        let last = self.rows.iter().rposition(|r| !r.is_empty());
        last.map_or_else(String::new, |last| self.rows[..=last].join("\n"))
    }

    /// Number of columns.
    #[must_use]
    pub const fn cols(&self) -> usize {
        self.cols
    }

    /// Number of rows.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows.len()
    }

    fn clear(&mut self) -> Vec<usize> {
        for row in &mut self.rows {
            row.clear();
        }
        self.col = 0;
        self.row = 0;
        self.cursor_visible = true;
        (0..self.rows.len()).collect()
    }

    fn line_feed(&mut self, changed: &mut Vec<usize>) {
        if self.row + 1 < self.rows.len() {
            self.row += 1;
        } else if !self.rows.is_empty() {
            self.rows.remove(0);
            self.rows.push(String::new());
            changed.extend(0..self.rows.len());
        }
    }

    fn put(&mut self, c: char, changed: &mut Vec<usize>) {
        if self.rows.is_empty() {
            return;
        }
        if self.col >= self.cols {
            self.col = 0;
            self.line_feed(changed);
        }
        let row = &mut self.rows[self.row];
        let mut chars: Vec<char> = row.chars().collect();
        while chars.len() < self.col {
            chars.push(' ');
        }
        if self.col < chars.len() {
            chars[self.col] = c;
        } else {
            chars.push(c);
        }
        *row = chars.into_iter().collect();
        changed.push(self.row);
        self.col += 1;
    }
}

impl Terminal for RecordingTerminal {
    fn new(cols: usize, rows: usize) -> Self {
        Self {
            cols,
            rows: vec![String::new(); rows],
            col: 0,
            row: 0,
            cursor_visible: true,
            fed: Vec::new(),
            resets: 0,
        }
    }

    fn feed(&mut self, data: &[u8]) -> Vec<usize> {
        self.fed.push(data.to_vec());

        let text = String::from_utf8_lossy(data).into_owned();
        let mut changed = Vec::new();
        let mut chars = text.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '\x1b' => match chars.next() {
                    Some('c') => {
                        self.resets += 1;
                        changed.extend(self.clear());
                    }
                    Some('[') => {
                        let mut params = String::new();
                        for c in chars.by_ref() {
                            if c.is_ascii_alphabetic() {
                                match (params.as_str(), c) {
                                    ("?25", 'l') => self.cursor_visible = false,
                                    ("?25", 'h') => self.cursor_visible = true,
                                    _ => {}
                                }
                                break;
                            }
                            params.push(c);
                        }
                    }
                    _ => {}
                },
                '\r' => self.col = 0,
                '\n' => self.line_feed(&mut changed),
                c if c.is_control() => {}
                c => self.put(c, &mut changed),
            }
        }

        changed.sort_unstable();
        changed.dedup();
        changed
    }

    fn line(&self, row: usize) -> Vec<Segment> {
        self.rows
            .get(row)
            .map(|text| vec![Segment::new(text.clone())])
            .unwrap_or_default()
    }

    fn cursor(&self) -> Option<(usize, usize)> {
        self.cursor_visible.then_some((self.col, self.row))
    }
}

/// Recording fixtures.
pub mod fixtures {
    /// Two output frames 20 ms apart, 2×1 terminal.
    pub const TWO_FRAMES: &str =
        "{\"version\":2,\"width\":2,\"height\":1}\n[0,\"o\",\"a\"]\n[0.02,\"o\",\"b\"]\n";

    /// Four frames, one second apart, 10×3 terminal.
    pub const COUNTDOWN: &str = concat!(
        "{\"version\": 2, \"width\": 10, \"height\": 3}\n",
        "[1.0, \"o\", \"3\"]\n",
        "[2.0, \"o\", \"2\"]\n",
        "[3.0, \"o\", \"1\"]\n",
        "[4.0, \"o\", \"0\"]\n",
    );

    /// A v1 recording with delta timestamps.
    pub const V1: &str = r#"{
        "version": 1,
        "width": 20,
        "height": 5,
        "duration": 1.5,
        "stdout": [[0.5, "hello"], [0.5, " "], [0.5, "world"]]
    }"#;

    /// A recording with a long idle gap in the middle.
    pub const IDLE_GAP: &str = concat!(
        "{\"version\": 2, \"width\": 10, \"height\": 2, \"idle_time_limit\": 5}\n",
        "[0, \"o\", \"a\"]\n",
        "[1, \"o\", \"b\"]\n",
        "[50, \"o\", \"c\"]\n",
        "[51, \"o\", \"d\"]\n",
    );
}
