//! Session Lifecycle
//!
//! State machine for one upstream streaming connection:
//!
//! ```text
//! Disconnected ──► Connecting ──► Connected ──► Closing ──► Closed
//!                      │              │                       ▲
//!                      └──────────────┴───────────────────────┘
//!                 handshake failed / abrupt close / read error
//! ```

use std::fmt;

use serde::Serialize;

/// Connection state of a streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No connection attempt made yet.
    #[default]
    Disconnected,
    /// TCP + TLS + WebSocket upgrade in progress.
    Connecting,
    /// Handshake complete, frames flowing.
    Connected,
    /// Local close requested, close frame in flight.
    Closing,
    /// Connection is gone. Terminal.
    Closed,
}

impl SessionState {
    /// Whether moving from `self` to `next` is a legal lifecycle step.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Disconnected, Self::Connecting)
                | (Self::Connecting, Self::Connected | Self::Closed)
                | (Self::Connected, Self::Closing | Self::Closed)
                | (Self::Closing, Self::Closed)
        )
    }

    /// Whether the session can still carry frames.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Whether the session has reached its final state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Lowercase state name for logs and health output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
