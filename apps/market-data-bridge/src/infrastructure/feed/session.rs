//! Stream Session
//!
//! One WebSocket connection to the upstream feed: connect, receive frames,
//! keep alive, close.
//!
//! The socket is split. The session owns the read half; the write half sits
//! behind a `tokio::sync::Mutex` inside a cloneable [`SessionHandle`], which
//! the heartbeat task holds so pings and the close frame never interleave.
//!
//! tungstenite never sends pings on its own, so the heartbeat runner is the
//! only source of outbound liveness traffic. Server pings are still answered
//! by the protocol layer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::heartbeat::{
    HeartbeatConfig, HeartbeatReport, HeartbeatRunner, Keepalive, KeepaliveError,
};
use super::tls::{TlsError, TlsPolicy};
use crate::application::ports::{FrameSource, RawFrame, ReceiveError};
use crate::domain::session::SessionState;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

/// Default WebSocket handshake timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on waiting for the close frame to be written.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound on joining the heartbeat task before aborting it.
const HEARTBEAT_STOP_TIMEOUT: Duration = Duration::from_secs(2);

// =============================================================================
// Error Type
// =============================================================================

/// Errors opening or writing to a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// URL is not a usable `ws://` or `wss://` address.
    #[error("invalid feed URL '{url}': {reason}")]
    InvalidUrl {
        /// Offending URL.
        url: String,
        /// What is wrong with it.
        reason: String,
    },

    /// TLS setup failed.
    #[error(transparent)]
    Tls(#[from] TlsError),

    /// Handshake did not complete in time.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// WebSocket handshake failed.
    #[error("WebSocket handshake failed: {0}")]
    Handshake(#[from] tungstenite::Error),

    /// A frame could not be written.
    #[error("send failed: {0}")]
    Send(String),

    /// `open` was called on a session that already left `Disconnected`.
    #[error("session cannot be opened from state {0}")]
    InvalidState(SessionState),
}

impl SessionError {
    /// Whether another connection attempt could succeed.
    ///
    /// Bad URLs, TLS setup failures and misuse never recover by retrying.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectTimeout(_) | Self::Handshake(_) | Self::Send(_)
        )
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Connection parameters for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Feed URL (`ws://` or `wss://`).
    pub url: String,
    /// Certificate policy for `wss://`.
    pub tls: TlsPolicy,
    /// Handshake timeout.
    pub connect_timeout: Duration,
}

impl SessionConfig {
    /// Strict TLS and the default connect timeout.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            tls: TlsPolicy::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Override the TLS policy.
    #[must_use]
    pub const fn with_tls(mut self, tls: TlsPolicy) -> Self {
        self.tls = tls;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scheme {
    Plain,
    Secure,
}

/// Check that `url` is a `ws://` or `wss://` URL with a host.
///
/// # Errors
///
/// Returns [`SessionError::InvalidUrl`] describing the problem.
pub fn validate_url(url: &str) -> Result<(), SessionError> {
    parse_scheme(url).map(|_| ())
}

fn parse_scheme(url: &str) -> Result<Scheme, SessionError> {
    let invalid = |reason: &str| SessionError::InvalidUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    let uri: Uri = url
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| invalid(&e.to_string()))?;
    let scheme = match uri.scheme_str().map(str::to_ascii_lowercase).as_deref() {
        Some("ws") => Scheme::Plain,
        Some("wss") => Scheme::Secure,
        Some(other) => return Err(invalid(&format!("unsupported scheme '{other}'"))),
        None => return Err(invalid("missing scheme")),
    };
    if uri.host().is_none_or(str::is_empty) {
        return Err(invalid("missing host"));
    }
    Ok(scheme)
}

// =============================================================================
// Session Handle
// =============================================================================

/// Shared write side of a session.
#[derive(Clone)]
pub struct SessionHandle {
    session_id: Uuid,
    writer: Arc<tokio::sync::Mutex<WsWriter>>,
}

impl SessionHandle {
    /// Id of the owning session.
    #[must_use]
    pub const fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Write a WebSocket ping.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Send`] if the socket rejects the frame.
    pub async fn ping(&self) -> Result<(), SessionError> {
        self.writer
            .lock()
            .await
            .send(Message::Ping(Vec::new().into()))
            .await
            .map_err(|e| SessionError::Send(e.to_string()))
    }

    async fn send_close(&self) -> Result<(), SessionError> {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "bridge shutdown".into(),
        };
        self.writer
            .lock()
            .await
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| SessionError::Send(e.to_string()))
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Keepalive for SessionHandle {
    async fn send_keepalive(&self) -> Result<(), KeepaliveError> {
        self.ping().await.map_err(|e| KeepaliveError(e.to_string()))
    }
}

// =============================================================================
// Stream Session
// =============================================================================

struct HeartbeatTask {
    cancel: CancellationToken,
    join: JoinHandle<HeartbeatReport>,
}

struct Connection {
    reader: WsReader,
    handle: SessionHandle,
}

/// One connection attempt to the upstream feed and its lifecycle.
///
/// A session starts `Disconnected`, and [`open`](Self::open) moves it through
/// `Connecting` to `Connected`, or to `Closed` if the attempt fails. Sessions
/// are single-use: a closed session is never reopened.
pub struct StreamSession {
    id: Uuid,
    config: SessionConfig,
    state: SessionState,
    connection: Option<Connection>,
    heartbeat: Option<HeartbeatTask>,
}

impl StreamSession {
    /// Create a session in `Disconnected`. Nothing is dialed yet.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            state: SessionState::Disconnected,
            connection: None,
            heartbeat: None,
        }
    }

    /// Connect to the feed.
    ///
    /// TLS is only configured for `wss://` URLs.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the session was already opened, the URL is
    /// invalid, TLS setup fails, or the handshake fails or times out. Every
    /// failure after leaving `Disconnected` leaves the session `Closed`.
    pub async fn open(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Disconnected {
            return Err(SessionError::InvalidState(self.state));
        }
        self.transition(SessionState::Connecting);

        match self.connect().await {
            Ok(connection) => {
                self.connection = Some(connection);
                self.transition(SessionState::Connected);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %self.id,
                    url = %self.config.url,
                    error = %e,
                    "Feed connect failed"
                );
                self.transition(SessionState::Closed);
                Err(e)
            }
        }
    }

    async fn connect(&self) -> Result<Connection, SessionError> {
        let config = &self.config;
        let scheme = parse_scheme(&config.url)?;
        let connector = match scheme {
            Scheme::Secure => Some(config.tls.connector()?),
            Scheme::Plain => None,
        };

        tracing::info!(
            session_id = %self.id,
            url = %config.url,
            tls = %config.tls,
            "Connecting to feed"
        );

        let connect = tokio_tungstenite::connect_async_tls_with_config(
            config.url.as_str(),
            None,
            true,
            connector,
        );
        let (stream, response) = tokio::time::timeout(config.connect_timeout, connect)
            .await
            .map_err(|_| SessionError::ConnectTimeout(config.connect_timeout))??;

        tracing::info!(session_id = %self.id, status = %response.status(), "Feed connected");

        let (writer, reader) = stream.split();
        Ok(Connection {
            reader,
            handle: SessionHandle {
                session_id: self.id,
                writer: Arc::new(tokio::sync::Mutex::new(writer)),
            },
        })
    }

    /// Session id attached to log lines.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Cloneable write handle, once connected.
    #[must_use]
    pub fn handle(&self) -> Option<SessionHandle> {
        self.connection.as_ref().map(|c| c.handle.clone())
    }

    /// Whether a heartbeat task is still running.
    #[must_use]
    pub fn heartbeat_running(&self) -> bool {
        self.heartbeat
            .as_ref()
            .is_some_and(|task| !task.join.is_finished())
    }

    /// Start the heartbeat task bound to this session.
    ///
    /// The task stops when the session closes, is dropped, or a ping fails.
    /// Calling this again replaces the running task. Does nothing unless the
    /// session is connected.
    pub fn start_heartbeat(&mut self, config: HeartbeatConfig) {
        let Some(handle) = self.handle().filter(|_| self.state.is_connected()) else {
            tracing::debug!(session_id = %self.id, state = %self.state, "Heartbeat not started");
            return;
        };
        if let Some(previous) = self.heartbeat.take() {
            previous.cancel.cancel();
        }
        let cancel = CancellationToken::new();
        let join = HeartbeatRunner::new(config, handle, cancel.clone()).spawn();
        tracing::debug!(
            session_id = %self.id,
            interval_ms = config.interval.as_millis(),
            "Heartbeat started"
        );
        self.heartbeat = Some(HeartbeatTask { cancel, join });
    }

    /// Wait for the next data frame.
    ///
    /// Control frames are consumed here. A close frame, end of stream, or
    /// fatal socket error moves the session straight to `Closed`.
    ///
    /// # Errors
    ///
    /// [`ReceiveError::ConnectionClosed`] is terminal; [`ReceiveError::Transient`]
    /// may be retried.
    pub async fn receive(&mut self) -> Result<RawFrame, ReceiveError> {
        let reader = match self.connection.as_mut() {
            Some(connection) if self.state.is_connected() => &mut connection.reader,
            _ => {
                return Err(ReceiveError::ConnectionClosed {
                    reason: format!("session is {}", self.state),
                });
            }
        };

        loop {
            match reader.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(RawFrame::Text(text.as_str().to_owned()));
                }
                Some(Ok(Message::Binary(data))) => return Ok(RawFrame::Binary(data.to_vec())),
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame.map_or_else(
                        || "close frame".to_string(),
                        |f| format!("close frame {}: {}", u16::from(f.code), f.reason.as_str()),
                    );
                    return Err(self.abort(reason));
                }
                Some(Err(e @ (tungstenite::Error::Capacity(_) | tungstenite::Error::Utf8(_)))) => {
                    return Err(ReceiveError::Transient(e.to_string()));
                }
                Some(Err(e)) => return Err(self.abort(e.to_string())),
                None => return Err(self.abort("stream ended".to_string())),
            }
        }
    }

    /// Close the session.
    ///
    /// Stops and joins the heartbeat, sends a close frame (bounded wait) and
    /// leaves the session `Closed`. Safe to call more than once; returns the
    /// heartbeat's report the first time one is collected.
    pub async fn close(&mut self) -> Option<HeartbeatReport> {
        if self.state.is_connected() {
            self.transition(SessionState::Closing);
        }

        let report = self.stop_heartbeat().await;

        if self.state == SessionState::Closing
            && let Some(connection) = &self.connection
        {
            match tokio::time::timeout(CLOSE_TIMEOUT, connection.handle.send_close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::debug!(session_id = %self.id, error = %e, "Close frame not sent");
                }
                Err(_) => tracing::debug!(session_id = %self.id, "Close frame timed out"),
            }
        }
        // An open that was abandoned mid-handshake also ends here.
        if !self.state.is_terminal() && self.state != SessionState::Disconnected {
            self.transition(SessionState::Closed);
        }

        if let Some(report) = &report {
            tracing::debug!(
                session_id = %self.id,
                pings_sent = report.pings_sent,
                "Heartbeat stopped"
            );
        }
        report
    }

    fn abort(&mut self, reason: String) -> ReceiveError {
        tracing::info!(session_id = %self.id, %reason, "Feed connection closed");
        if let Some(task) = &self.heartbeat {
            task.cancel.cancel();
        }
        self.transition(SessionState::Closed);
        ReceiveError::ConnectionClosed { reason }
    }

    async fn stop_heartbeat(&mut self) -> Option<HeartbeatReport> {
        let mut task = self.heartbeat.take()?;
        task.cancel.cancel();
        match tokio::time::timeout(HEARTBEAT_STOP_TIMEOUT, &mut task.join).await {
            Ok(Ok(report)) => Some(report),
            Ok(Err(e)) => {
                tracing::warn!(session_id = %self.id, error = %e, "Heartbeat task failed");
                None
            }
            Err(_) => {
                tracing::warn!(session_id = %self.id, "Heartbeat did not stop, aborting");
                task.join.abort();
                None
            }
        }
    }

    fn transition(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        if !self.state.can_transition_to(next) {
            tracing::warn!(
                session_id = %self.id,
                from = %self.state,
                to = %next,
                "Unexpected session transition"
            );
        }
        tracing::debug!(
            session_id = %self.id,
            from = %self.state,
            to = %next,
            "Session state changed"
        );
        self.state = next;
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        if let Some(task) = &self.heartbeat {
            task.cancel.cancel();
            task.join.abort();
        }
    }
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("id", &self.id)
            .field("url", &self.config.url)
            .field("state", &self.state)
            .field("heartbeat", &self.heartbeat.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl FrameSource for StreamSession {
    async fn receive(&mut self) -> Result<RawFrame, ReceiveError> {
        Self::receive(self).await
    }
}

#[cfg(test)]
mod tests {
    use futures_util::SinkExt;
    use test_case::test_case;
    use tokio::net::TcpListener;

    use super::*;

    /// Accept one client, send `frames`, then run `after` on the open socket.
    async fn feed<F, Fut>(frames: Vec<&'static str>, after: F) -> String
    where
        F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            for frame in frames {
                ws.send(Message::Text(frame.into())).await.unwrap();
            }
            after(ws).await;
        });
        url
    }

    async fn wait_for_heartbeat_exit(session: &StreamSession) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while session.heartbeat_running() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("heartbeat kept running after the session closed");
    }

    #[test_case("ws://localhost:9000/ws", Scheme::Plain)]
    #[test_case("wss://stream.binance.us:9443/ws/btcusdt@trade", Scheme::Secure)]
    #[test_case("WSS://example.com", Scheme::Secure)]
    fn accepts_websocket_urls(url: &str, expected: Scheme) {
        assert_eq!(parse_scheme(url).unwrap(), expected);
        assert!(validate_url(url).is_ok());
    }

    #[test_case("http://example.com" ; "http scheme")]
    #[test_case("example.com/ws" ; "no scheme")]
    #[test_case("not a url" ; "garbage")]
    fn rejects_non_websocket_urls(url: &str) {
        assert!(matches!(
            validate_url(url),
            Err(SessionError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn only_connection_failures_are_retryable() {
        assert!(SessionError::ConnectTimeout(Duration::from_secs(1)).is_retryable());
        assert!(SessionError::Send("reset".to_string()).is_retryable());
        assert!(
            !SessionError::InvalidUrl {
                url: "http://x".to_string(),
                reason: "scheme".to_string(),
            }
            .is_retryable()
        );
        assert!(!SessionError::InvalidState(SessionState::Closed).is_retryable());
    }

    #[test]
    fn new_session_is_disconnected() {
        let session = StreamSession::new(SessionConfig::new("ws://127.0.0.1:1/"));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.handle().is_none());
        assert!(!session.heartbeat_running());
    }

    #[tokio::test]
    async fn failed_open_ends_closed() {
        let mut session = StreamSession::new(SessionConfig::new("https://example.com"));
        let err = session.open().await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidUrl { .. }));
        assert_eq!(session.state(), SessionState::Closed);

        let err = session.open().await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidState(SessionState::Closed)));
    }

    #[tokio::test]
    async fn open_reports_handshake_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut session = StreamSession::new(SessionConfig::new(format!("ws://{addr}/")));
        let err = session.open().await.unwrap_err();
        assert!(matches!(err, SessionError::Handshake(_)), "{err:?}");
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn open_times_out_when_server_never_answers() {
        // Accepts TCP but never completes the WebSocket handshake.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let config = SessionConfig {
            connect_timeout: Duration::from_millis(100),
            ..SessionConfig::new(format!("ws://{addr}/"))
        };
        let mut session = StreamSession::new(config);
        let err = session.open().await.unwrap_err();
        assert!(matches!(err, SessionError::ConnectTimeout(_)), "{err:?}");
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn local_close_walks_the_lifecycle() {
        let url = feed(Vec::new(), |mut ws| async move {
            while let Some(Ok(_)) = futures_util::StreamExt::next(&mut ws).await {}
        })
        .await;

        let mut session = StreamSession::new(SessionConfig::new(url));
        session.open().await.unwrap();
        assert_eq!(session.state(), SessionState::Connected);

        session.start_heartbeat(HeartbeatConfig::new(Duration::from_millis(20)));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let report = session.close().await.expect("heartbeat report");
        assert!(report.pings_sent >= 1);
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.heartbeat_running());
        assert!(session.close().await.is_none());

        let err = session.open().await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidState(SessionState::Closed)));
    }

    #[tokio::test]
    async fn dropped_tcp_connection_closes_session_and_heartbeat() {
        let url = feed(vec![r#"{"p":"1.5"}"#], |ws| async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            // No close frame: the socket just goes away.
            drop(ws);
        })
        .await;

        let mut session = StreamSession::new(SessionConfig::new(url));
        session.open().await.unwrap();
        session.start_heartbeat(HeartbeatConfig::new(Duration::from_millis(10)));

        assert_eq!(
            session.receive().await.unwrap(),
            RawFrame::Text(r#"{"p":"1.5"}"#.to_string())
        );

        let err = tokio::time::timeout(Duration::from_secs(2), session.receive())
            .await
            .expect("receive did not notice the dropped connection")
            .unwrap_err();
        assert!(matches!(err, ReceiveError::ConnectionClosed { .. }), "{err:?}");
        assert_eq!(session.state(), SessionState::Closed);

        wait_for_heartbeat_exit(&session).await;
        let report = session.close().await.expect("heartbeat report");
        assert_eq!(session.state(), SessionState::Closed);

        // A closed session stays closed and the runner's count is final.
        assert!(matches!(
            session.receive().await,
            Err(ReceiveError::ConnectionClosed { .. })
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!session.heartbeat_running());
        assert!(report.pings_sent >= 1);
    }
}
