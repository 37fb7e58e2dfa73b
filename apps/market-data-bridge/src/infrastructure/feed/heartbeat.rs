//! Heartbeat Runner
//!
//! Sends a keepalive ping over an open session on a fixed cadence. The first
//! ping goes out as soon as the runner starts; after that one per interval.
//!
//! The runner stops when its cancellation token fires or when a ping cannot
//! be sent. A ping still being written when the token fires is abandoned, and
//! a ping that takes longer than one interval counts as failed. It never
//! reconnects and never closes the session; the read loop owns both.

use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::metrics;

/// Default interval between pings.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between ping frames.
    pub interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

impl HeartbeatConfig {
    /// Create a configuration with a custom interval.
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

/// A keepalive ping could not be written.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("keepalive send failed: {0}")]
pub struct KeepaliveError(pub String);

/// Something a heartbeat can ping.
#[async_trait]
pub trait Keepalive: Send + Sync + 'static {
    /// Write one ping frame.
    async fn send_keepalive(&self) -> Result<(), KeepaliveError>;
}

/// Why the runner stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatStop {
    /// Cancellation was requested.
    Cancelled,
    /// A ping could not be written.
    SendFailed(KeepaliveError),
}

/// Summary returned when the runner exits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatReport {
    /// Pings written successfully.
    pub pings_sent: u64,
    /// Why the runner stopped.
    pub stop: HeartbeatStop,
}

/// Periodic ping task bound to one session.
pub struct HeartbeatRunner<K> {
    config: HeartbeatConfig,
    target: K,
    cancel: CancellationToken,
}

impl<K: Keepalive> HeartbeatRunner<K> {
    /// Create a runner pinging `target` until `cancel` fires.
    #[must_use]
    pub const fn new(config: HeartbeatConfig, target: K, cancel: CancellationToken) -> Self {
        Self {
            config,
            target,
            cancel,
        }
    }

    /// Spawn the runner on the current runtime.
    pub fn spawn(self) -> JoinHandle<HeartbeatReport> {
        tokio::spawn(self.run())
    }

    /// Run until cancelled or a ping fails.
    pub async fn run(self) -> HeartbeatReport {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut pings_sent = 0_u64;

        let stop = loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => break HeartbeatStop::Cancelled,
                _ = interval.tick() => {
                    let sent = tokio::select! {
                        biased;

                        () = self.cancel.cancelled() => break HeartbeatStop::Cancelled,
                        sent = tokio::time::timeout(
                            self.config.interval,
                            self.target.send_keepalive(),
                        ) => sent,
                    };
                    let sent = sent.unwrap_or_else(|_| {
                        Err(KeepaliveError(format!(
                            "ping not written within {:?}",
                            self.config.interval
                        )))
                    });
                    match sent {
                        Ok(()) => {
                            pings_sent += 1;
                            metrics::record_heartbeat(true);
                            tracing::trace!(pings_sent, "Heartbeat ping sent");
                        }
                        Err(e) => {
                            metrics::record_heartbeat(false);
                            tracing::warn!(
                                error = %e,
                                pings_sent,
                                "Heartbeat ping failed, stopping"
                            );
                            break HeartbeatStop::SendFailed(e);
                        }
                    }
                }
            }
        };

        if stop == HeartbeatStop::Cancelled {
            tracing::debug!(pings_sent, "Heartbeat cancelled");
        }

        HeartbeatReport { pings_sent, stop }
    }
}
