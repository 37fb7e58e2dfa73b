//! Application Layer - Port definitions and shared runtime status.
//!
//! This layer contains the contracts the bridge loop is written against and
//! the status record the read loop publishes for the health endpoint.

/// Port interfaces for the upstream frame source and downstream sink.
pub mod ports;

/// Application services (bridge status tracking).
pub mod services;
