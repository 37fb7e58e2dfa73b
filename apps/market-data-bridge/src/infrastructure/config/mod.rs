//! Configuration Module
//!
//! Environment-driven configuration for the bridge binary.

mod settings;

pub use settings::{
    AppConfig, ConfigError, DEFAULT_FEED_URL, FeedSettings, ServerSettings, SinkSettings,
    WebSocketSettings,
};
