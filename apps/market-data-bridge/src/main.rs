//! Market Data Bridge Binary
//!
//! Streams trades from a WebSocket feed into a gRPC `MarketDataStreamer`.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-data-bridge
//! ```
//!
//! # Environment Variables
//!
//! - `BRIDGE_FEED_URL`: upstream WebSocket URL
//!   (default: wss://stream.binance.us:9443/ws/btcusdt@trade)
//! - `BRIDGE_SYMBOL`: symbol stamped on every trade (default: BTCUSDT)
//! - `BRIDGE_PRICE_FIELD`: JSON key carrying the price (default: p)
//! - `BRIDGE_TLS_VERIFY`: strict | insecure (default: strict)
//! - `BRIDGE_SINK_ADDR`: gRPC sink address (default: <http://localhost:50051>)
//! - `BRIDGE_HEARTBEAT_INTERVAL_SECS`: ping interval (default: 10)
//! - `BRIDGE_RECONNECT_ENABLED`: reconnect after the feed closes (default: true)
//! - `BRIDGE_FORWARD_MODE`: sequential | detached (default: sequential)
//! - `BRIDGE_HEALTH_PORT`: health and metrics HTTP port, 0 disables (default: 8083)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `OTEL_SERVICE_NAME`: Service name (default: market-data-bridge)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;

use anyhow::Context;
use market_data_bridge::{
    AppConfig, Bridge, BridgeStatus, GrpcForwardingSink, HealthServer, HealthServerState,
    SessionEnd, init_metrics, init_telemetry,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        anyhow::bail!("a rustls crypto provider is already installed");
    }

    load_dotenv();

    let _telemetry_guard = init_telemetry().context("failed to initialize telemetry")?;

    tracing::info!("Starting Market Data Bridge");

    init_metrics().context("failed to install Prometheus recorder")?;

    let config = AppConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();
    let status = Arc::new(BridgeStatus::new());

    if config.server.health_port != 0 {
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION"),
            Arc::clone(&status),
        ));
        let health_server = HealthServer::new(
            config.server.health_port,
            health_state,
            shutdown_token.clone(),
        );
        tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        });
    }

    let sink = Arc::new(GrpcForwardingSink::new(config.sink_config()));
    let bridge = Bridge::new(config.bridge_config(), sink, shutdown_token.clone())
        .with_status(Arc::clone(&status));

    let bridge_task = async {
        if config.websocket.reconnect_enabled {
            bridge.run().await
        } else {
            bridge.run_session().await.map(|end| {
                if let SessionEnd::ConnectionClosed(reason) = end {
                    tracing::info!(%reason, "Feed closed, reconnect disabled");
                }
            })
        }
    };

    tokio::spawn(await_shutdown(shutdown_token.clone()));

    tracing::info!("Bridge ready");

    // The bridge observes the token itself and closes its session before returning.
    let result = bridge_task.await;
    shutdown_token.cancel();

    match result {
        Ok(()) => {
            tracing::info!(snapshot = ?status.snapshot(), "Market Data Bridge stopped");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "Bridge stopped with error");
            Err(e.into())
        }
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &AppConfig) {
    tracing::info!(
        feed_url = %config.feed.url,
        symbol = %config.feed.symbol,
        tls = config.feed.tls.as_str(),
        sink = %config.sink.address,
        forward_mode = config.forward_mode.as_str(),
        reconnect = config.websocket.reconnect_enabled,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        heartbeat_secs = config.websocket.heartbeat_interval.as_secs(),
        price_field = %config.feed.price_field,
        sink_request_timeout_ms = config.sink.request_timeout.as_millis(),
        "Bridge tuning"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
