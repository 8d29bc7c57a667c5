//! Terminal model capability.
//!
//! The player never interprets escape sequences itself. It owns one value
//! implementing [`Terminal`], feeds it every output chunk, and reads back the
//! rows the terminal reports as changed.

use std::fmt;

bitflags::bitflags! {
    /// Text attributes for a rendered segment.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct Attributes: u8 {
        /// Bold text.
        const BOLD = 0b0000_0001;
        /// Dim/faint text.
        const DIM = 0b0000_0010;
        /// Italic text.
        const ITALIC = 0b0000_0100;
        /// Underlined text.
        const UNDERLINE = 0b0000_1000;
        /// Blinking text.
        const BLINK = 0b0001_0000;
        /// Inverse video.
        const INVERSE = 0b0010_0000;
        /// Hidden text.
        const HIDDEN = 0b0100_0000;
        /// Strikethrough text.
        const STRIKETHROUGH = 0b1000_0000;
    }
}

/// A run of text sharing one set of attributes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Segment {
    /// The text of the run.
    pub text: String,
    /// Attributes applied to the whole run.
    pub attrs: Attributes,
}

impl Segment {
    /// Create a plain segment.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attrs: Attributes::empty(),
        }
    }

    /// Set the attributes.
    #[must_use]
    pub const fn with_attrs(mut self, attrs: Attributes) -> Self {
        self.attrs = attrs;
        self
    }
}

/// One terminal row as handed to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// Row index.
    pub id: usize,
    /// Rendered segments, left to right.
    pub segments: Vec<Segment>,
}

impl Line {
    /// Concatenated text of every segment.
    #[must_use]
    pub fn text(&self) -> String {
        self.segments.iter().map(|s| s.text.as_str()).collect()
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            f.write_str(&segment.text)?;
        }
        Ok(())
    }
}

/// A terminal emulator the player can drive.
///
/// Implementations interpret escape sequences and keep the screen grid.
/// Resizing is done by constructing a fresh terminal with [`Terminal::new`].
pub trait Terminal: Send + 'static {
    /// Create a blank terminal of the given size.
    fn new(cols: usize, rows: usize) -> Self
    where
        Self: Sized;

    /// Feed output bytes, returning the indices of rows that changed.
    fn feed(&mut self, data: &[u8]) -> Vec<usize>;

    /// Read the segments of a row.
    fn line(&self, row: usize) -> Vec<Segment>;

    /// Cursor position as `(col, row)`, or `None` when hidden.
    fn cursor(&self) -> Option<(usize, usize)>;
}

/// A rendered still image of a terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PosterFrame {
    /// Cursor position, `None` when hidden.
    pub cursor: Option<(usize, usize)>,
    /// Every row of the terminal.
    pub lines: Vec<Line>,
}

impl PosterFrame {
    /// Render a poster by feeding chunks into a scratch terminal.
    pub(crate) fn render<T, I, C>(cols: usize, rows: usize, chunks: I) -> Self
    where
        T: Terminal,
        I: IntoIterator<Item = C>,
        C: AsRef<[u8]>,
    {
        let mut terminal = T::new(cols, rows);
        for chunk in chunks {
            terminal.feed(chunk.as_ref());
        }
        let lines = (0..rows)
            .map(|id| Line {
                id,
                segments: terminal.line(id),
            })
            .collect();
        Self {
            cursor: terminal.cursor(),
            lines,
        }
    }
}
