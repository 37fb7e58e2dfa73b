//! Domain Layer - Core market data types and session lifecycle.
//!
//! This layer contains the types the rest of the bridge agrees on. Nothing
//! here performs I/O.

/// Streaming session lifecycle states.
pub mod session;

/// Decoded trade events.
pub mod trade;
