//! castplay: Playback engine for recorded and live terminal sessions
//!
//! This crate drives a terminal emulator from asciicast recordings, live
//! WebSocket or `EventSource` streams, and synthetic demo sources. The
//! emulator itself is supplied by the caller through the [`Terminal`] trait.
//!
//! # Features
//!
//! - **Async-first design** with Tokio runtime
//! - **asciicast v1 and v2** recordings from files, URLs or inline data
//! - **Idle time limiting** and frame batching at load time
//! - **Pause, resume and seek** for recordings, with a loop policy
//! - **Live streams** over WebSocket or server-sent events, with a
//!   time-shift buffer and automatic reconnection
//! - **Speed control** through a scaled clock
//!
//! # Example
//!
//! ```ignore
//! use castplay::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = PlayerConfig::new().with_speed(2.0).with_idle_time_limit(1.0);
//!     let player: Player<MyTerminal> = Player::from_source("demo.cast", config)?;
//!     player.on(EventKind::Ended, |_| println!("done"));
//!     player.start().await?;
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod driver;
pub mod error;
pub mod player;
pub mod prelude;
pub mod source;
pub mod stream;
pub mod terminal;
pub mod transcript;

pub use clock::{Clock, Timer};
pub use config::{LoopMode, PlayerConfig, Poster};
pub use driver::{
    Backoff, Driver, DriverContext, DriverHost, DriverInfo, DriverOptions, Queue, SeekTarget,
    TimeShiftBuffer,
};
pub use error::{PlayerError, Result};
pub use player::{EventKind, Player, PlayerEvent, PlayerInfo, PlayerState};
pub use source::{RecordingSource, Source, SyntheticKind, Transport};
pub use stream::{SequenceExt, Transformer};
pub use terminal::{Attributes, Line, PosterFrame, Segment, Terminal};
pub use transcript::{Frame, PrepareOptions, PreparedTranscript, Transcript, TranscriptEvent};

// Test utilities
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

#[cfg(any(test, feature = "test-utils"))]
pub use test_utils::{RecordingTerminal, fixtures};
