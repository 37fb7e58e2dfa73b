//! Port Interfaces
//!
//! Defines the interfaces (ports) the bridge loop depends on, following the
//! Hexagonal Architecture pattern. Infrastructure adapters implement them.
//!
//! ## Driven Ports (Outbound)
//!
//! - `TradeSink`: forwards one decoded trade to the downstream consumer
//!
//! ## Driver Ports (Inbound)
//!
//! - `FrameSource`: yields raw frames from the upstream streaming session

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::trade::TradeEvent;

// =============================================================================
// Frame Source
// =============================================================================

/// One message received from the upstream connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFrame {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
}

impl RawFrame {
    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Why a receive did not produce a frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReceiveError {
    /// The connection is gone. Terminal for the session.
    #[error("connection closed: {reason}")]
    ConnectionClosed {
        /// Close reason reported by the transport.
        reason: String,
    },

    /// A single read failed but the connection may still deliver frames.
    #[error("transient read error: {0}")]
    Transient(String),
}

impl ReceiveError {
    /// Whether the session must stop reading.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::ConnectionClosed { .. })
    }
}

/// Source of raw frames for the bridge loop.
#[async_trait]
pub trait FrameSource: Send {
    /// Wait for the next data frame.
    ///
    /// Must be cancel-safe: dropping the future loses no frames.
    async fn receive(&mut self) -> Result<RawFrame, ReceiveError>;
}

// =============================================================================
// Trade Sink
// =============================================================================

/// Failure category of a forward attempt, used for metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardFailureKind {
    /// Connection to the sink could not be established.
    Unreachable,
    /// The sink answered the call with an error.
    RejectedByPeer,
    /// The call did not complete in time.
    Timeout,
}

impl ForwardFailureKind {
    /// Label value for metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unreachable => "unreachable",
            Self::RejectedByPeer => "rejected",
            Self::Timeout => "timeout",
        }
    }
}

/// A trade could not be delivered downstream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ForwardError {
    /// Cannot establish the downstream connection.
    #[error("sink unreachable: {0}")]
    Unreachable(String),

    /// The remote call returned an error status.
    #[error("sink rejected call ({code}): {message}")]
    RejectedByPeer {
        /// Status code reported by the peer.
        code: String,
        /// Status message reported by the peer.
        message: String,
    },

    /// The connect or call exceeded its deadline.
    #[error("sink call timed out after {0:?}")]
    Timeout(Duration),
}

impl ForwardError {
    /// Failure category.
    #[must_use]
    pub const fn kind(&self) -> ForwardFailureKind {
        match self {
            Self::Unreachable(_) => ForwardFailureKind::Unreachable,
            Self::RejectedByPeer { .. } => ForwardFailureKind::RejectedByPeer,
            Self::Timeout(_) => ForwardFailureKind::Timeout,
        }
    }
}

/// Downstream consumer of trade events.
///
/// Delivery is at-most-once: callers do not retry a failed event.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TradeSink: Send + Sync + 'static {
    /// Deliver one trade event.
    async fn send(&self, event: &TradeEvent) -> Result<(), ForwardError>;
}
