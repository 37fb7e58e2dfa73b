//! Application Services
//!
//! - `BridgeStatus`: connection state and counters published by the read loop

mod status;

pub use status::{BridgeStatus, StatusSnapshot};
