//! Player events and listener registry.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{PlayerError, Result};

/// Kinds of events a player emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Playback was requested and the driver is initializing.
    Starting,
    /// Waiting for data.
    Waiting,
    /// The terminal was replaced with one of a new size.
    Reset,
    /// Playback started or resumed.
    Play,
    /// Playback paused.
    Pause,
    /// The terminal should be redrawn from scratch (e.g. a poster was cleared).
    TerminalUpdate,
    /// A seek completed.
    Seeked,
    /// Playback reached its end and will not loop.
    Ended,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::Starting,
        Self::Waiting,
        Self::Reset,
        Self::Play,
        Self::Pause,
        Self::TerminalUpdate,
        Self::Seeked,
        Self::Ended,
    ];

    /// The event's name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Waiting => "waiting",
            Self::Reset => "reset",
            Self::Play => "play",
            Self::Pause => "pause",
            Self::TerminalUpdate => "terminalUpdate",
            Self::Seeked => "seeked",
            Self::Ended => "ended",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EventKind {
    type Err = PlayerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| PlayerError::config(format!("unknown event: {s}")))
    }
}

/// An event delivered to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerEvent {
    /// See [`EventKind::Starting`].
    Starting,
    /// See [`EventKind::Waiting`].
    Waiting,
    /// See [`EventKind::Reset`].
    Reset {
        /// New width.
        cols: usize,
        /// New height.
        rows: usize,
    },
    /// See [`EventKind::Play`].
    Play,
    /// See [`EventKind::Pause`].
    Pause,
    /// See [`EventKind::TerminalUpdate`].
    TerminalUpdate,
    /// See [`EventKind::Seeked`].
    Seeked,
    /// See [`EventKind::Ended`].
    Ended,
}

impl PlayerEvent {
    /// The kind of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Starting => EventKind::Starting,
            Self::Waiting => EventKind::Waiting,
            Self::Reset { .. } => EventKind::Reset,
            Self::Play => EventKind::Play,
            Self::Pause => EventKind::Pause,
            Self::TerminalUpdate => EventKind::TerminalUpdate,
            Self::Seeked => EventKind::Seeked,
            Self::Ended => EventKind::Ended,
        }
    }
}

/// A registered event callback.
pub type Listener = Arc<dyn Fn(&PlayerEvent) + Send + Sync>;

/// Ordered listener lists keyed by event kind.
#[derive(Default)]
pub struct Listeners {
    by_kind: Mutex<HashMap<EventKind, Vec<Listener>>>,
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let by_kind = self.by_kind.lock().unwrap_or_else(PoisonError::into_inner);
        let counts: HashMap<EventKind, usize> =
            by_kind.iter().map(|(kind, list)| (*kind, list.len())).collect();
        f.debug_struct("Listeners").field("counts", &counts).finish()
    }
}

impl Listeners {
    /// Register a listener.
    pub fn add(&self, kind: EventKind, listener: Listener) {
        self.by_kind
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push(listener);
    }

    /// Invoke every listener for the event, in registration order.
    ///
    /// The registry lock is released before any listener runs, so listeners
    /// may register further listeners.
    pub fn dispatch(&self, event: &PlayerEvent) {
        let listeners: Vec<Listener> = self
            .by_kind
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event.kind())
            .cloned()
            .unwrap_or_default();

        tracing::trace!(event = %event.kind(), listeners = listeners.len(), "dispatch");
        for listener in listeners {
            listener(event);
        }
    }
}
