//! gRPC Forwarding Sink Tests
//!
//! Each failure kind against a real socket.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::time::Duration;

use tokio::net::TcpListener;
use tonic::Code;

use common::{RecordingSink, SinkBehavior, serve_sink_on, spawn_sink};
use market_data_bridge::proto::PriceRequest;
use market_data_bridge::proto::market_data_streamer_client::MarketDataStreamerClient;
use market_data_bridge::{ForwardError, GrpcForwardingSink, SinkConfig, TradeEvent, TradeSink};

fn trade(price: f64) -> TradeEvent {
    TradeEvent::new("BTCUSDT", price, 1_700_000_000_000)
}

#[tokio::test]
async fn delivers_symbol_price_and_timestamp() {
    let server = RecordingSink::new(SinkBehavior::Accept);
    let (addr, _task) = spawn_sink(server.clone()).await;

    let sink = GrpcForwardingSink::new(SinkConfig::new(addr.to_string()));
    sink.send(&trade(50_000.12)).await.unwrap();
    sink.send(&trade(50_001.0)).await.unwrap();

    let received = server.received();
    assert_eq!(received.len(), 2);
    assert_eq!(received[0].symbol, "BTCUSDT");
    assert!((received[0].price - 50_000.12).abs() < f64::EPSILON);
    assert_eq!(received[0].timestamp, 1_700_000_000_000);
}

#[tokio::test]
async fn connect_per_call_also_delivers() {
    let server = RecordingSink::new(SinkBehavior::Accept);
    let (addr, _task) = spawn_sink(server.clone()).await;

    let sink = GrpcForwardingSink::new(SinkConfig {
        reuse_connection: false,
        ..SinkConfig::new(addr.to_string())
    });
    for price in [1.0, 2.0, 3.0] {
        sink.send(&trade(price)).await.unwrap();
    }
    assert_eq!(server.received().len(), 3);
}

#[tokio::test]
async fn error_status_is_rejected_by_peer() {
    let (addr, _task) = spawn_sink(RecordingSink::new(SinkBehavior::Reject(
        Code::InvalidArgument,
        "unknown symbol",
    )))
    .await;

    let sink = GrpcForwardingSink::new(SinkConfig::new(addr.to_string()));
    let err = sink.send(&trade(1.0)).await.unwrap_err();
    assert_eq!(
        err,
        ForwardError::RejectedByPeer {
            code: "InvalidArgument".to_string(),
            message: "unknown symbol".to_string(),
        }
    );
}

#[tokio::test]
async fn slow_peer_is_a_timeout() {
    let (addr, _task) =
        spawn_sink(RecordingSink::new(SinkBehavior::Delay(Duration::from_secs(2)))).await;

    let sink = GrpcForwardingSink::new(SinkConfig {
        request_timeout: Duration::from_millis(100),
        ..SinkConfig::new(addr.to_string())
    });
    let err = sink.send(&trade(1.0)).await.unwrap_err();
    assert!(matches!(err, ForwardError::Timeout(_)), "{err:?}");
}

#[tokio::test]
async fn reconnects_lazily_once_the_peer_appears() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let sink = GrpcForwardingSink::new(SinkConfig::new(addr.to_string()));
    let err = sink.send(&trade(1.0)).await.unwrap_err();
    assert!(matches!(err, ForwardError::Unreachable(_)), "{err:?}");

    let server = RecordingSink::new(SinkBehavior::Accept);
    let listener = TcpListener::bind(addr).await.unwrap();
    let _task = serve_sink_on(listener, server.clone());

    sink.send(&trade(2.0)).await.unwrap();
    assert_eq!(server.received().len(), 1);
}

#[tokio::test]
async fn forwarded_prices_can_be_streamed_back() {
    let server = RecordingSink::new(SinkBehavior::Accept);
    let (addr, _task) = spawn_sink(server.clone()).await;

    let sink = GrpcForwardingSink::new(SinkConfig::new(addr.to_string()));
    sink.send(&trade(10.0)).await.unwrap();
    sink.send(&TradeEvent::new("ETHUSDT", 20.0, 0)).await.unwrap();

    let mut client = MarketDataStreamerClient::connect(format!("http://{addr}"))
        .await
        .unwrap();
    let mut stream = client
        .stream_prices(PriceRequest {
            symbols: vec!["ETHUSDT".to_string()],
        })
        .await
        .unwrap()
        .into_inner();

    let first = stream.message().await.unwrap().unwrap();
    assert_eq!(first.symbol, "ETHUSDT");
    assert!(stream.message().await.unwrap().is_none());
}
