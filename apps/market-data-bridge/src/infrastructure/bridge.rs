//! Bridge
//!
//! The read loop: receive a frame, decode it, forward any trade. One
//! [`StreamSession`] per run, with its heartbeat running beside the loop.
//!
//! # Failure handling
//!
//! Only a closed connection (or shutdown) ends a session. Decode failures,
//! transient read errors and forward failures are logged, counted and
//! skipped. A failed forward is not retried.
//!
//! # Forwarding modes
//!
//! - `Sequential`: each forward is awaited before the next receive.
//! - `Detached`: forwards run as tasks, at most `max_in_flight` at once. The
//!   loop waits for a free slot when saturated, and in-flight forwards are
//!   drained before the session loop returns.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::feed::{
    DEFAULT_PRICE_FIELD, Decoded, FrameCodec, HeartbeatConfig, ReconnectConfig, ReconnectPolicy,
    SessionConfig, SessionError, StreamSession,
};
use super::grpc::{GrpcForwardingSink, SinkConfig};
use super::metrics;
use crate::application::ports::{FrameSource, RawFrame, ReceiveError, TradeSink};
use crate::application::services::BridgeStatus;
use crate::domain::session::SessionState;
use crate::domain::trade::TradeEvent;

/// Default symbol for the Binance BTC/USDT trade stream.
pub const DEFAULT_SYMBOL: &str = "BTCUSDT";

/// Default bound on concurrent detached forwards.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;

// =============================================================================
// Configuration
// =============================================================================

/// How forwards are scheduled relative to the read loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ForwardMode {
    /// Await each forward before receiving the next frame.
    #[default]
    Sequential,
    /// Spawn forwards, bounded by `max_in_flight`.
    Detached {
        /// Maximum forwards in flight.
        max_in_flight: usize,
    },
}

impl ForwardMode {
    /// Parse `sequential` or `detached`, case-insensitively.
    #[must_use]
    pub fn parse(name: &str, max_in_flight: usize) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "sequential" => Some(Self::Sequential),
            "detached" => Some(Self::Detached {
                max_in_flight: max_in_flight.max(1),
            }),
            _ => None,
        }
    }

    /// Mode name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Detached { .. } => "detached",
        }
    }
}

/// Everything a bridge needs besides its sink.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Feed connection.
    pub session: SessionConfig,
    /// Ping cadence.
    pub heartbeat: HeartbeatConfig,
    /// Symbol stamped on every trade.
    pub symbol: String,
    /// JSON key carrying the price.
    pub price_field: String,
    /// Forward scheduling.
    pub forward_mode: ForwardMode,
    /// Backoff between sessions.
    pub reconnect: ReconnectConfig,
}

impl BridgeConfig {
    /// Defaults around a feed URL and symbol.
    #[must_use]
    pub fn new(feed_url: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            session: SessionConfig::new(feed_url),
            heartbeat: HeartbeatConfig::default(),
            symbol: symbol.into(),
            price_field: DEFAULT_PRICE_FIELD.to_string(),
            forward_mode: ForwardMode::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

// =============================================================================
// Errors and Outcomes
// =============================================================================

/// Bridge errors.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The feed session could not be opened.
    #[error("feed session failed: {0}")]
    Session(#[from] SessionError),

    /// Reconnect attempts ran out.
    #[error("gave up reconnecting after {0} attempts")]
    ReconnectExhausted(u32),
}

/// Why a session loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The feed connection closed.
    ConnectionClosed(String),
    /// Shutdown was requested.
    Shutdown,
}

// =============================================================================
// Bridge
// =============================================================================

/// Feed-to-sink bridge.
pub struct Bridge<S> {
    config: BridgeConfig,
    codec: FrameCodec,
    sink: Arc<S>,
    status: Arc<BridgeStatus>,
    cancel: CancellationToken,
}

impl<S: TradeSink> Bridge<S> {
    /// Create a bridge. `cancel` stops every loop it runs.
    #[must_use]
    pub fn new(config: BridgeConfig, sink: Arc<S>, cancel: CancellationToken) -> Self {
        let codec = FrameCodec::new(config.symbol.clone(), config.price_field.clone());
        Self {
            config,
            codec,
            sink,
            status: Arc::new(BridgeStatus::new()),
            cancel,
        }
    }

    /// Publish status into an existing record.
    #[must_use]
    pub fn with_status(mut self, status: Arc<BridgeStatus>) -> Self {
        self.status = status;
        self
    }

    /// Shared status record.
    #[must_use]
    pub fn status(&self) -> Arc<BridgeStatus> {
        Arc::clone(&self.status)
    }

    /// Supervise sessions until shutdown.
    ///
    /// A session that ends with a closed connection, or fails to connect, is
    /// followed by a backoff delay and a new session. Failures no retry can
    /// fix (bad URL, TLS setup) are returned at once. The backoff resets
    /// after every session that connected.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ReconnectExhausted`] when the retry budget is
    /// spent, or [`BridgeError::Session`] for a non-retryable open failure.
    pub async fn run(&self) -> Result<(), BridgeError> {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            match self.run_session().await {
                Ok(SessionEnd::Shutdown) => return Ok(()),
                Ok(SessionEnd::ConnectionClosed(reason)) => {
                    policy.reset();
                    tracing::info!(%reason, "Feed session ended");
                }
                Err(BridgeError::Session(e)) if !e.is_retryable() => {
                    tracing::error!(error = %e, "Feed session cannot be opened, giving up");
                    return Err(BridgeError::Session(e));
                }
                Err(e) => tracing::warn!(error = %e, "Feed session failed to open"),
            }

            if self.cancel.is_cancelled() {
                return Ok(());
            }

            let Some(delay) = policy.next_delay() else {
                let attempts = policy.attempt_count();
                tracing::error!(attempts, "Reconnect attempts exhausted");
                return Err(BridgeError::ReconnectExhausted(attempts));
            };

            self.status.record_reconnect();
            metrics::record_reconnect();
            tracing::info!(
                attempt = policy.attempt_count(),
                delay_ms = delay.as_millis(),
                "Reconnecting to feed"
            );

            tokio::select! {
                () = self.cancel.cancelled() => return Ok(()),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Run one session: open, heartbeat, read loop, close.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Session`] if the session cannot be opened.
    pub async fn run_session(&self) -> Result<SessionEnd, BridgeError> {
        let mut session = StreamSession::new(self.config.session.clone());
        self.status.set_state(session.state());

        let opened = tokio::select! {
            biased;

            () = self.cancel.cancelled() => None,
            opened = async {
                self.status.set_state(SessionState::Connecting);
                session.open().await
            } => Some(opened),
        };

        match opened {
            None => {
                session.close().await;
                self.status.set_state(session.state());
                return Ok(SessionEnd::Shutdown);
            }
            Some(Err(e)) => {
                self.status.set_state(session.state());
                self.status.set_error(e.to_string());
                return Err(e.into());
            }
            Some(Ok(())) => {}
        }

        self.status.set_state(session.state());
        metrics::set_session_connected(true);
        session.start_heartbeat(self.config.heartbeat);

        let span = tracing::info_span!(
            "session",
            session_id = %session.id(),
            symbol = %self.config.symbol
        );
        let end = self.pump(&mut session).instrument(span).await;

        session.close().await;
        self.status.set_state(session.state());
        metrics::set_session_connected(false);
        if let SessionEnd::ConnectionClosed(reason) = &end {
            self.status.set_error(format!("connection closed: {reason}"));
        }

        Ok(end)
    }

    /// Read, decode and forward until the source closes or shutdown.
    pub async fn pump<F: FrameSource>(&self, source: &mut F) -> SessionEnd {
        let mut forwarder = Forwarder::new(
            self.config.forward_mode,
            Arc::clone(&self.sink),
            Arc::clone(&self.status),
        );

        let end = loop {
            let received = tokio::select! {
                biased;

                () = self.cancel.cancelled() => break SessionEnd::Shutdown,
                received = source.receive() => received,
            };

            match received {
                Ok(frame) => self.handle_frame(&frame, &mut forwarder).await,
                Err(ReceiveError::ConnectionClosed { reason }) => {
                    break SessionEnd::ConnectionClosed(reason);
                }
                Err(ReceiveError::Transient(message)) => {
                    self.status.record_read_error();
                    metrics::record_read_error();
                    tracing::warn!(error = %message, "Transient read error, continuing");
                }
            }
        };

        forwarder.drain().await;
        end
    }

    async fn handle_frame(&self, frame: &RawFrame, forwarder: &mut Forwarder<S>) {
        self.status.record_frame();
        metrics::record_frame_received();

        match self.codec.decode(frame) {
            Ok(Decoded::Trade(event)) => forwarder.forward(event).await,
            Ok(Decoded::Skip) => {
                self.status.record_skip();
                metrics::record_frame_skipped();
                tracing::trace!(frame_len = frame.len(), "Frame has no price, skipped");
            }
            Err(e) => {
                self.status.record_decode_error();
                metrics::record_decode_error(e.reason());
                tracing::warn!(error = %e, frame_len = frame.len(), "Dropping undecodable frame");
            }
        }
    }
}

/// Run a single session against a gRPC sink with default settings.
///
/// # Errors
///
/// Returns [`BridgeError::Session`] if the feed cannot be opened.
pub async fn run_bridge(
    feed_url: &str,
    sink_address: &str,
    symbol: &str,
) -> Result<SessionEnd, BridgeError> {
    let sink = Arc::new(GrpcForwardingSink::new(SinkConfig::new(sink_address)));
    Bridge::new(BridgeConfig::new(feed_url, symbol), sink, CancellationToken::new())
        .run_session()
        .await
}

// =============================================================================
// Forwarding
// =============================================================================

struct Forwarder<S> {
    sink: Arc<S>,
    status: Arc<BridgeStatus>,
    detached: Option<Detached>,
}

struct Detached {
    permits: Arc<Semaphore>,
    tasks: JoinSet<()>,
}

impl<S: TradeSink> Forwarder<S> {
    fn new(mode: ForwardMode, sink: Arc<S>, status: Arc<BridgeStatus>) -> Self {
        let detached = match mode {
            ForwardMode::Sequential => None,
            ForwardMode::Detached { max_in_flight } => Some(Detached {
                permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
                tasks: JoinSet::new(),
            }),
        };
        Self {
            sink,
            status,
            detached,
        }
    }

    async fn forward(&mut self, event: TradeEvent) {
        let Some(detached) = self.detached.as_mut() else {
            deliver(self.sink.as_ref(), &self.status, &event).await;
            return;
        };

        while let Some(finished) = detached.tasks.try_join_next() {
            log_join_error(finished);
        }

        let Ok(permit) = Arc::clone(&detached.permits).acquire_owned().await else {
            deliver(self.sink.as_ref(), &self.status, &event).await;
            return;
        };

        let sink = Arc::clone(&self.sink);
        let status = Arc::clone(&self.status);
        detached.tasks.spawn(
            async move {
                let _permit = permit;
                deliver(sink.as_ref(), &status, &event).await;
            }
            .in_current_span(),
        );
    }

    async fn drain(&mut self) {
        if let Some(detached) = self.detached.as_mut() {
            while let Some(finished) = detached.tasks.join_next().await {
                log_join_error(finished);
            }
        }
    }
}

fn log_join_error(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        tracing::error!(error = %e, "Forward task failed");
    }
}

async fn deliver<S: TradeSink>(sink: &S, status: &BridgeStatus, event: &TradeEvent) {
    let started = Instant::now();
    let result = sink.send(event).await;
    let elapsed = started.elapsed();

    match result {
        Ok(()) => {
            status.record_forwarded();
            metrics::record_forward(Ok(()), elapsed);
            tracing::debug!(
                symbol = event.symbol(),
                price = event.price(),
                elapsed_ms = elapsed.as_millis(),
                "Trade forwarded"
            );
        }
        Err(e) => {
            status.record_forward_failure();
            metrics::record_forward(Err(e.kind()), elapsed);
            tracing::warn!(
                error = %e,
                kind = e.kind().as_str(),
                symbol = event.symbol(),
                price = event.price(),
                "Forward failed, trade dropped"
            );
        }
    }
}
