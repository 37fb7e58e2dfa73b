//! gRPC Forwarding Sink
//!
//! Delivers each [`TradeEvent`] as one `SendPrice` unary call.
//!
//! By default one channel is kept and reused across calls. It is dropped when
//! the peer reports itself unavailable and re-established lazily on the next
//! send. With `reuse_connection` off every call dials a fresh channel.

use std::time::Duration;

use async_trait::async_trait;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tonic::{Code, Request, Status};

use super::proto::marketdata::PriceUpdate;
use super::proto::marketdata::market_data_streamer_client::MarketDataStreamerClient;
use crate::application::ports::{ForwardError, TradeSink};
use crate::domain::trade::TradeEvent;

type Client = MarketDataStreamerClient<Channel>;

/// Default sink address.
pub const DEFAULT_SINK_ADDR: &str = "http://localhost:50051";

/// Connection settings for the sink.
///
/// `https://` addresses are dialed over TLS with the platform's native roots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkConfig {
    /// Endpoint URI, `http://host:port`.
    pub address: String,
    /// Deadline for establishing the channel.
    pub connect_timeout: Duration,
    /// Deadline for one `SendPrice` call.
    pub request_timeout: Duration,
    /// Keep one channel across calls.
    pub reuse_connection: bool,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self::new(DEFAULT_SINK_ADDR)
    }
}

impl SinkConfig {
    /// Settings with default timeouts. A bare `host:port` gets `http://`.
    #[must_use]
    pub fn new(address: impl AsRef<str>) -> Self {
        Self {
            address: normalize_address(address.as_ref()),
            connect_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(5),
            reuse_connection: true,
        }
    }
}

/// Prepend `http://` when the address has no scheme.
#[must_use]
pub fn normalize_address(address: &str) -> String {
    let trimmed = address.trim();
    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

impl From<&TradeEvent> for PriceUpdate {
    fn from(event: &TradeEvent) -> Self {
        Self {
            symbol: event.symbol().to_string(),
            price: event.price(),
            timestamp: event.timestamp_millis(),
        }
    }
}

/// [`TradeSink`] backed by `MarketDataStreamer.SendPrice`.
#[derive(Debug)]
pub struct GrpcForwardingSink {
    config: SinkConfig,
    client: tokio::sync::Mutex<Option<Client>>,
}

impl GrpcForwardingSink {
    /// Create a sink. No connection is made until the first send.
    #[must_use]
    pub fn new(config: SinkConfig) -> Self {
        Self {
            config,
            client: tokio::sync::Mutex::new(None),
        }
    }

    /// Sink settings.
    #[must_use]
    pub const fn config(&self) -> &SinkConfig {
        &self.config
    }

    async fn client(&self) -> Result<Client, ForwardError> {
        if !self.config.reuse_connection {
            return self.connect().await;
        }

        let mut cached = self.client.lock().await;
        if let Some(client) = cached.as_ref() {
            return Ok(client.clone());
        }
        let client = self.connect().await?;
        *cached = Some(client.clone());
        Ok(client)
    }

    async fn connect(&self) -> Result<Client, ForwardError> {
        let mut endpoint = Endpoint::from_shared(self.config.address.clone())
            .map_err(|e| ForwardError::Unreachable(format!("invalid sink address: {e}")))?;
        if self.config.address.starts_with("https://") {
            endpoint = endpoint
                .tls_config(ClientTlsConfig::new().with_native_roots())
                .map_err(|e| ForwardError::Unreachable(format!("sink TLS setup failed: {e}")))?;
        }

        let timeout = self.config.connect_timeout;
        match tokio::time::timeout(timeout, endpoint.connect()).await {
            Ok(Ok(channel)) => {
                tracing::debug!(address = %self.config.address, "Sink channel connected");
                Ok(MarketDataStreamerClient::new(channel))
            }
            Ok(Err(e)) => Err(ForwardError::Unreachable(transport_error_chain(&e))),
            Err(_) => Err(ForwardError::Timeout(timeout)),
        }
    }

    async fn invalidate(&self) {
        if self.config.reuse_connection {
            self.client.lock().await.take();
        }
    }

    async fn classify(&self, status: Status) -> ForwardError {
        match status.code() {
            Code::DeadlineExceeded => ForwardError::Timeout(self.config.request_timeout),
            Code::Unavailable => {
                self.invalidate().await;
                ForwardError::Unreachable(status.message().to_string())
            }
            code => ForwardError::RejectedByPeer {
                code: format!("{code:?}"),
                message: status.message().to_string(),
            },
        }
    }
}

#[async_trait]
impl TradeSink for GrpcForwardingSink {
    async fn send(&self, event: &TradeEvent) -> Result<(), ForwardError> {
        let mut client = self.client().await?;

        let timeout = self.config.request_timeout;
        let mut request = Request::new(PriceUpdate::from(event));
        request.set_timeout(timeout);

        match tokio::time::timeout(timeout, client.send_price(request)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(status)) => Err(self.classify(status).await),
            Err(_) => Err(ForwardError::Timeout(timeout)),
        }
    }
}

fn transport_error_chain(error: &tonic::transport::Error) -> String {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
