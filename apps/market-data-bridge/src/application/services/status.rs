//! Bridge Status Tracking
//!
//! Written by the bridge read loop, read by the health endpoint.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::domain::session::SessionState;

/// Live state of the bridge.
#[derive(Debug, Default)]
pub struct BridgeStatus {
    state: RwLock<SessionState>,
    last_connected_at: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
    frames_received: AtomicU64,
    frames_skipped: AtomicU64,
    decode_errors: AtomicU64,
    read_errors: AtomicU64,
    trades_forwarded: AtomicU64,
    forward_failures: AtomicU64,
    reconnect_attempts: AtomicU64,
}

impl BridgeStatus {
    /// Create a status record in the `Disconnected` state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the session state.
    pub fn set_state(&self, state: SessionState) {
        *self.state.write() = state;
        if state == SessionState::Connected {
            *self.last_connected_at.write() = Some(Utc::now());
            *self.last_error.write() = None;
        }
    }

    /// Record the most recent error.
    pub fn set_error(&self, message: impl Into<String>) {
        *self.last_error.write() = Some(message.into());
    }

    /// Current session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Increment the received frame counter.
    pub fn record_frame(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the skipped frame counter.
    pub fn record_skip(&self) {
        self.frames_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the decode error counter.
    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the transient read error counter.
    pub fn record_read_error(&self) {
        self.read_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the forwarded trade counter.
    pub fn record_forwarded(&self) {
        self.trades_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the failed forward counter.
    pub fn record_forward_failure(&self) {
        self.forward_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the reconnect attempt counter.
    pub fn record_reconnect(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every field.
    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            state: self.state(),
            last_connected_at: *self.last_connected_at.read(),
            last_error: self.last_error.read().clone(),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            trades_forwarded: self.trades_forwarded.load(Ordering::Relaxed),
            forward_failures: self.forward_failures.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
        }
    }
}

/// Serializable copy of [`BridgeStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    /// Session state.
    pub state: SessionState,
    /// Last time a session reached `Connected`.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Most recent error message, cleared on connect.
    pub last_error: Option<String>,
    /// Data frames received.
    pub frames_received: u64,
    /// Frames without a price field.
    pub frames_skipped: u64,
    /// Frames that failed to decode.
    pub decode_errors: u64,
    /// Transient read errors.
    pub read_errors: u64,
    /// Trades delivered to the sink.
    pub trades_forwarded: u64,
    /// Trades the sink did not accept.
    pub forward_failures: u64,
    /// Reconnect attempts since start.
    pub reconnect_attempts: u64,
}
