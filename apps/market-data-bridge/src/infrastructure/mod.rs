//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the process-level plumbing
//! (configuration, telemetry, metrics, health).

/// Upstream WebSocket feed adapters (session, heartbeat, codec).
pub mod feed;

/// gRPC forwarding sink and generated `marketdata` stubs.
pub mod grpc;

/// The read loop tying a feed session to the sink.
pub mod bridge;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
