#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Market Data Bridge - WebSocket trade feed to gRPC
//!
//! Holds one WebSocket connection to a trade stream, keeps it alive with
//! periodic pings, decodes each trade frame and forwards the price to a
//! `marketdata.MarketDataStreamer` gRPC service.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: `TradeEvent`, `SessionState`
//! - **Application**: ports (`FrameSource`, `TradeSink`) and `BridgeStatus`
//! - **Infrastructure**:
//!   - `feed`: WebSocket session, heartbeat, frame codec, TLS policy, backoff
//!   - `grpc`: forwarding sink and generated stubs
//!   - `bridge`: the read loop and session supervisor
//!   - `config`, `telemetry`, `metrics`, `health`
//!
//! # Data Flow
//!
//! ```text
//!             ping every interval
//!          ┌──────────────────────┐
//!          │                      ▼
//!   HeartbeatRunner        WebSocket feed ──frames──► Bridge::pump
//!                                                      │ FrameCodec
//!                                                      ▼
//!                                           TradeSink (SendPrice) ──► gRPC
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

/// Domain layer - trade events and session states.
pub mod domain;

/// Application layer - ports and runtime status.
pub mod application;

/// Infrastructure layer - adapters and process plumbing.
pub mod infrastructure;

// Domain types
pub use domain::session::SessionState;
pub use domain::trade::TradeEvent;

// Ports
pub use application::ports::{
    ForwardError, ForwardFailureKind, FrameSource, RawFrame, ReceiveError, TradeSink,
};
pub use application::services::{BridgeStatus, StatusSnapshot};

// Bridge
pub use infrastructure::bridge::{
    Bridge, BridgeConfig, BridgeError, ForwardMode, SessionEnd, run_bridge,
};

// Feed adapters
pub use infrastructure::feed::{
    CodecError, Decoded, FrameCodec, HeartbeatConfig, HeartbeatRunner, SessionConfig,
    SessionError, StreamSession, TlsPolicy,
};

// gRPC sink (and generated types, for integration tests)
pub use infrastructure::grpc::{GrpcForwardingSink, SinkConfig, proto::marketdata as proto};

// Config
pub use infrastructure::config::{AppConfig, ConfigError};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
