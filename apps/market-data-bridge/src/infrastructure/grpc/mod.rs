//! gRPC Forwarding
//!
//! Client side of the `marketdata.MarketDataStreamer` service. The bridge
//! calls `SendPrice` once per decoded trade; `StreamPrices` is generated so
//! test servers and other consumers share one definition.
//!
//! The stubs under `generated/` mirror `proto/marketdata/market_data.proto`
//! and are checked in, so building the crate does not require `protoc`.
//! Keep them in step with the proto by hand.

pub mod sink;

// Allow clippy warnings and missing docs in generated code
#[allow(
    missing_docs,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::unwrap_used,
    clippy::expect_used
)]
pub mod proto {
    pub mod marketdata {
        include!("generated/marketdata.rs");
    }
}

pub use sink::{GrpcForwardingSink, SinkConfig};
