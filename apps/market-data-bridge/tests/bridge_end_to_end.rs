//! End-to-End Bridge Tests
//!
//! Drives a real WebSocket feed into a real gRPC sink over loopback.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use common::{
    RecordingSink, SinkBehavior, spawn_dropping_feed, spawn_scripted_feed, spawn_sink,
};
use market_data_bridge::{
    Bridge, BridgeConfig, BridgeStatus, ForwardMode, GrpcForwardingSink, HeartbeatConfig,
    SessionEnd, SessionState, SinkConfig, run_bridge,
};

const FRAMES: [&str; 4] = [
    r#"{"p":"50000.12"}"#,
    "{}",
    r#"{"p":"abc"}"#,
    r#"{"p":"50001.00"}"#,
];

fn assert_two_trades(received: &[market_data_bridge::proto::PriceUpdate], symbol: &str) {
    assert_eq!(received.len(), 2, "{received:?}");
    assert!((received[0].price - 50_000.12).abs() < 1e-9);
    assert!((received[1].price - 50_001.0).abs() < 1e-9);
    assert!(received.iter().all(|u| u.symbol == symbol));
    assert!(received.iter().all(|u| u.timestamp > 0));
}

#[tokio::test]
async fn forwards_only_priced_frames() {
    let sink = RecordingSink::new(SinkBehavior::Accept);
    let (sink_addr, _sink_task) = spawn_sink(sink.clone()).await;
    let (feed_url, _, feed_task) =
        spawn_scripted_feed(FRAMES.to_vec(), Duration::from_millis(100)).await;

    let end = timeout(
        Duration::from_secs(10),
        run_bridge(&feed_url, &sink_addr.to_string(), "BTCUSDT"),
    )
    .await
    .expect("bridge did not finish")
    .unwrap();

    assert!(matches!(end, SessionEnd::ConnectionClosed(_)), "{end:?}");
    assert_two_trades(&sink.received(), "BTCUSDT");
    feed_task.await.unwrap();
}

#[tokio::test]
async fn heartbeat_pings_reach_the_feed() {
    let sink = RecordingSink::new(SinkBehavior::Accept);
    let (sink_addr, _sink_task) = spawn_sink(sink.clone()).await;
    let (feed_url, observations, feed_task) =
        spawn_scripted_feed(FRAMES.to_vec(), Duration::from_millis(2_500)).await;

    let mut config = BridgeConfig::new(feed_url, "ETHUSDT");
    config.heartbeat = HeartbeatConfig::new(Duration::from_secs(1));

    let status = Arc::new(BridgeStatus::new());
    let bridge = Bridge::new(
        config,
        Arc::new(GrpcForwardingSink::new(SinkConfig::new(sink_addr.to_string()))),
        CancellationToken::new(),
    )
    .with_status(Arc::clone(&status));

    let end = timeout(Duration::from_secs(10), bridge.run_session())
        .await
        .expect("bridge did not finish")
        .unwrap();
    feed_task.await.unwrap();

    assert!(matches!(end, SessionEnd::ConnectionClosed(_)));
    // Immediate first ping plus at least one more within the linger window.
    assert!(observations.pings() >= 2, "pings: {}", observations.pings());
    assert_two_trades(&sink.received(), "ETHUSDT");

    let snapshot = status.snapshot();
    assert_eq!(snapshot.state, SessionState::Closed);
    assert_eq!(snapshot.frames_received, 4);
    assert_eq!(snapshot.frames_skipped, 1);
    assert_eq!(snapshot.decode_errors, 1);
    assert_eq!(snapshot.trades_forwarded, 2);
}

#[tokio::test]
async fn detached_forwarding_delivers_everything_before_returning() {
    let sink = RecordingSink::new(SinkBehavior::Delay(Duration::from_millis(50)));
    let (sink_addr, _sink_task) = spawn_sink(sink.clone()).await;
    let (feed_url, _, _feed_task) =
        spawn_scripted_feed(FRAMES.to_vec(), Duration::from_millis(10)).await;

    let mut config = BridgeConfig::new(feed_url, "BTCUSDT");
    config.forward_mode = ForwardMode::Detached { max_in_flight: 4 };
    let bridge = Bridge::new(
        config,
        Arc::new(GrpcForwardingSink::new(SinkConfig::new(sink_addr.to_string()))),
        CancellationToken::new(),
    );

    let end = timeout(Duration::from_secs(10), bridge.run_session())
        .await
        .expect("bridge did not finish")
        .unwrap();

    assert!(matches!(end, SessionEnd::ConnectionClosed(_)));
    let mut prices: Vec<f64> = sink.received().iter().map(|u| u.price).collect();
    prices.sort_by(f64::total_cmp);
    assert_eq!(prices.len(), 2);
    assert!((prices[0] - 50_000.12).abs() < 1e-9);
    assert!((prices[1] - 50_001.0).abs() < 1e-9);
}

#[tokio::test]
async fn unreachable_sink_does_not_stop_the_session() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = listener.local_addr().unwrap();
    drop(listener);

    let (feed_url, _, _feed_task) =
        spawn_scripted_feed(FRAMES.to_vec(), Duration::from_millis(10)).await;

    let status = Arc::new(BridgeStatus::new());
    let bridge = Bridge::new(
        BridgeConfig::new(feed_url, "BTCUSDT"),
        Arc::new(GrpcForwardingSink::new(SinkConfig::new(dead_addr.to_string()))),
        CancellationToken::new(),
    )
    .with_status(Arc::clone(&status));

    let end = timeout(Duration::from_secs(15), bridge.run_session())
        .await
        .expect("bridge did not finish")
        .unwrap();

    assert!(matches!(end, SessionEnd::ConnectionClosed(_)));
    let snapshot = status.snapshot();
    assert_eq!(snapshot.frames_received, 4);
    assert_eq!(snapshot.forward_failures, 2);
    assert_eq!(snapshot.trades_forwarded, 0);
}

#[tokio::test]
async fn shutdown_closes_an_idle_session() {
    let (feed_url, _, _feed_task) = spawn_scripted_feed(Vec::new(), Duration::from_secs(30)).await;

    let cancel = CancellationToken::new();
    let status = Arc::new(BridgeStatus::new());
    let bridge = Bridge::new(
        BridgeConfig::new(feed_url, "BTCUSDT"),
        Arc::new(GrpcForwardingSink::new(SinkConfig::default())),
        cancel.clone(),
    )
    .with_status(Arc::clone(&status));

    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
    });

    let end = timeout(Duration::from_secs(10), bridge.run_session())
        .await
        .expect("bridge ignored shutdown")
        .unwrap();
    stopper.await.unwrap();

    assert_eq!(end, SessionEnd::Shutdown);
    assert_eq!(status.state(), SessionState::Closed);
}

#[tokio::test]
async fn dropped_feed_connection_ends_the_session() {
    let sink = RecordingSink::new(SinkBehavior::Accept);
    let (sink_addr, _sink_task) = spawn_sink(sink.clone()).await;
    let (feed_url, observations, feed_task) =
        spawn_dropping_feed(FRAMES.to_vec(), Duration::from_millis(1_500)).await;

    let mut config = BridgeConfig::new(feed_url, "BTCUSDT");
    config.heartbeat = HeartbeatConfig::new(Duration::from_secs(1));

    let status = Arc::new(BridgeStatus::new());
    let bridge = Bridge::new(
        config,
        Arc::new(GrpcForwardingSink::new(SinkConfig::new(sink_addr.to_string()))),
        CancellationToken::new(),
    )
    .with_status(Arc::clone(&status));

    let end = timeout(Duration::from_secs(10), bridge.run_session())
        .await
        .expect("bridge did not notice the dropped connection")
        .unwrap();
    feed_task.await.unwrap();

    assert!(matches!(end, SessionEnd::ConnectionClosed(_)), "{end:?}");
    assert_two_trades(&sink.received(), "BTCUSDT");
    assert!(observations.pings() >= 1, "pings: {}", observations.pings());

    let snapshot = status.snapshot();
    assert_eq!(snapshot.state, SessionState::Closed);
    assert!(snapshot.last_error.is_some());
}
