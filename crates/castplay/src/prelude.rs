//! Convenient re-exports for common castplay usage.
//!
//! ```ignore
//! use castplay::prelude::*;
//! ```

// Player
pub use crate::player::{EventKind, Player, PlayerEvent, PlayerInfo, PlayerState};

// Configuration
pub use crate::config::{LoopMode, PlayerConfig, Poster};

// Error handling
pub use crate::error::{PlayerError, Result};

// Sources and seeking
pub use crate::driver::SeekTarget;
pub use crate::source::Source;

// Terminal integration
pub use crate::terminal::{Attributes, Line, Segment, Terminal};
