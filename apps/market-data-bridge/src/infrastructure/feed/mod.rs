//! Upstream Feed Adapters
//!
//! WebSocket client side of the bridge:
//!
//! - **session**: connection lifecycle and frame reads
//! - **heartbeat**: periodic pings on an open session
//! - **codec**: JSON trade frames to `TradeEvent`
//! - **tls**: certificate policy for `wss://`
//! - **reconnect**: backoff between sessions

pub mod codec;
pub mod heartbeat;
pub mod reconnect;
pub mod session;
pub mod tls;

pub use codec::{CodecError, DEFAULT_PRICE_FIELD, Decoded, FrameCodec};
pub use heartbeat::{
    HeartbeatConfig, HeartbeatReport, HeartbeatRunner, HeartbeatStop, Keepalive, KeepaliveError,
};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use session::{SessionConfig, SessionError, SessionHandle, StreamSession};
pub use tls::{TlsError, TlsPolicy};
