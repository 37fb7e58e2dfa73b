//! Local feed and sink servers shared by the integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

use market_data_bridge::proto::market_data_streamer_server::{
    MarketDataStreamer, MarketDataStreamerServer,
};
use market_data_bridge::proto::{PriceRequest, PriceUpdate};

// =============================================================================
// gRPC sink
// =============================================================================

/// How the recording sink answers `SendPrice`.
#[derive(Debug, Clone)]
pub enum SinkBehavior {
    Accept,
    Reject(tonic::Code, &'static str),
    Delay(Duration),
}

/// `MarketDataStreamer` that records every update it receives.
#[derive(Debug, Clone)]
pub struct RecordingSink {
    received: Arc<Mutex<Vec<PriceUpdate>>>,
    behavior: SinkBehavior,
}

impl RecordingSink {
    pub fn new(behavior: SinkBehavior) -> Self {
        Self {
            received: Arc::new(Mutex::new(Vec::new())),
            behavior,
        }
    }

    pub fn received(&self) -> Vec<PriceUpdate> {
        self.received.lock().clone()
    }
}

#[async_trait::async_trait]
impl MarketDataStreamer for RecordingSink {
    async fn send_price(&self, request: Request<PriceUpdate>) -> Result<Response<()>, Status> {
        match &self.behavior {
            SinkBehavior::Accept => {}
            SinkBehavior::Reject(code, message) => return Err(Status::new(*code, *message)),
            SinkBehavior::Delay(delay) => tokio::time::sleep(*delay).await,
        }
        self.received.lock().push(request.into_inner());
        Ok(Response::new(()))
    }

    type StreamPricesStream =
        tokio_stream::Iter<std::vec::IntoIter<Result<PriceUpdate, Status>>>;

    async fn stream_prices(
        &self,
        request: Request<PriceRequest>,
    ) -> Result<Response<Self::StreamPricesStream>, Status> {
        let symbols = request.into_inner().symbols;
        let updates: Vec<_> = self
            .received()
            .into_iter()
            .filter(|u| symbols.is_empty() || symbols.contains(&u.symbol))
            .map(Ok)
            .collect();
        Ok(Response::new(tokio_stream::iter(updates)))
    }
}

/// Serve `sink` on an ephemeral port.
pub async fn spawn_sink(sink: RecordingSink) -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (addr, serve_sink_on(listener, sink))
}

/// Serve `sink` on an already bound listener.
pub fn serve_sink_on(listener: TcpListener, sink: RecordingSink) -> JoinHandle<()> {
    tokio::spawn(async move {
        Server::builder()
            .add_service(MarketDataStreamerServer::new(sink))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    })
}

// =============================================================================
// WebSocket feed
// =============================================================================

/// What the scripted feed observed from the bridge.
#[derive(Debug, Default)]
pub struct FeedObservations {
    pings: AtomicUsize,
}

impl FeedObservations {
    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }
}

/// Accept one WebSocket client, send `frames`, keep reading for `linger`
/// while counting pings, then close with a normal close frame.
pub async fn spawn_scripted_feed(
    frames: Vec<&'static str>,
    linger: Duration,
) -> (String, Arc<FeedObservations>, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let observations = Arc::new(FeedObservations::default());
    let seen = Arc::clone(&observations);

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        for frame in frames {
            ws.send(Message::Text(frame.into())).await.unwrap();
        }

        let deadline = tokio::time::Instant::now() + linger;
        while let Ok(Some(Ok(message))) = tokio::time::timeout_at(deadline, ws.next()).await {
            if message.is_ping() {
                seen.pings.fetch_add(1, Ordering::SeqCst);
            }
        }

        let _ = ws
            .send(Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "script finished".into(),
            })))
            .await;
        // Drain until the client acknowledges the close.
        while let Ok(Some(Ok(_))) = tokio::time::timeout(Duration::from_secs(2), ws.next()).await {}
    });

    (url, observations, handle)
}

/// Accept one WebSocket client, send `frames`, then drop the TCP connection
/// without a close frame. Pings seen before the drop are counted.
pub async fn spawn_dropping_feed(
    frames: Vec<&'static str>,
    hold: Duration,
) -> (String, Arc<FeedObservations>, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let observations = Arc::new(FeedObservations::default());
    let seen = Arc::clone(&observations);

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        for frame in frames {
            ws.send(Message::Text(frame.into())).await.unwrap();
        }

        let deadline = tokio::time::Instant::now() + hold;
        while let Ok(Some(Ok(message))) = tokio::time::timeout_at(deadline, ws.next()).await {
            if message.is_ping() {
                seen.pings.fetch_add(1, Ordering::SeqCst);
            }
        }
        drop(ws);
        drop(listener);
    });

    (url, observations, handle)
}
