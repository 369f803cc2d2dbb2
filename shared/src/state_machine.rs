//! Serial Link State Machine
//!
//! A link is either closed or open. Reopening an open link tears the old
//! link down first, so the only states ever observable are the two below.

use std::fmt;

/// Observable state of the serial link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Closed,
    Open,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Closed => write!(f, "closed"),
            LinkState::Open => write!(f, "open"),
        }
    }
}

/// Events that can trigger state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// Channel established and both stream sides ready
    OpenSucceeded,
    /// Device lookup, connect, or timeout failure
    OpenFailed,
    /// Explicit close (also issued before a reopen)
    CloseRequested,
    /// Outbound write failed; the link is torn down implicitly
    WriteFailed,
}

impl LinkState {
    /// Get the next state for a given event
    pub fn on_event(self, event: LinkEvent) -> LinkState {
        use LinkEvent::*;
        use LinkState::*;

        match (self, event) {
            (_, OpenSucceeded) => Open,
            (_, OpenFailed) => Closed,
            (_, CloseRequested) => Closed,
            (Open, WriteFailed) => Closed,

            // Writes on a closed link never reach the stream
            (Closed, WriteFailed) => Closed,
        }
    }

    pub fn is_open(self) -> bool {
        self == LinkState::Open
    }
}
