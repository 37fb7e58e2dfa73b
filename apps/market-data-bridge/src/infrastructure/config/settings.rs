//! Bridge Configuration Settings
//!
//! Configuration types for the bridge, loaded from `BRIDGE_*` environment
//! variables. Numeric values fall back to their defaults when unset or
//! unparseable; enumerated values, the feed URL and the symbol are
//! validated.

use std::time::Duration;

use crate::infrastructure::bridge::{
    BridgeConfig, DEFAULT_MAX_IN_FLIGHT, DEFAULT_SYMBOL, ForwardMode,
};
use crate::infrastructure::feed::session::validate_url;
use crate::infrastructure::feed::{
    DEFAULT_PRICE_FIELD, HeartbeatConfig, ReconnectConfig, SessionConfig, TlsPolicy,
};
use crate::infrastructure::grpc::SinkConfig;
use crate::infrastructure::grpc::sink::{DEFAULT_SINK_ADDR, normalize_address};

/// Default upstream feed.
pub const DEFAULT_FEED_URL: &str = "wss://stream.binance.us:9443/ws/btcusdt@trade";

/// Upstream feed settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSettings {
    /// WebSocket URL.
    pub url: String,
    /// Symbol stamped on every trade.
    pub symbol: String,
    /// JSON key carrying the price.
    pub price_field: String,
    /// Certificate policy for `wss://`.
    pub tls: TlsPolicy,
    /// Handshake timeout.
    pub connect_timeout: Duration,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_FEED_URL.to_string(),
            symbol: DEFAULT_SYMBOL.to_string(),
            price_field: DEFAULT_PRICE_FIELD.to_string(),
            tls: TlsPolicy::Strict,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// WebSocket keepalive and reconnect settings.
#[derive(Debug, Clone, PartialEq)]
pub struct WebSocketSettings {
    /// Heartbeat ping interval.
    pub heartbeat_interval: Duration,
    /// Open a new session after the previous one ends.
    pub reconnect_enabled: bool,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(10),
            reconnect_enabled: true,
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 0,
        }
    }
}

/// Downstream gRPC sink settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkSettings {
    /// Endpoint URI.
    pub address: String,
    /// Channel connect timeout.
    pub connect_timeout: Duration,
    /// Per-call deadline.
    pub request_timeout: Duration,
    /// Keep one channel across calls.
    pub reuse_connection: bool,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            address: DEFAULT_SINK_ADDR.to_string(),
            connect_timeout: Duration::from_millis(3_000),
            request_timeout: Duration::from_millis(5_000),
            reuse_connection: true,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health and metrics HTTP port (0 = disabled).
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete bridge configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Upstream feed.
    pub feed: FeedSettings,
    /// Keepalive and reconnect.
    pub websocket: WebSocketSettings,
    /// Downstream sink.
    pub sink: SinkSettings,
    /// Forward scheduling.
    pub forward_mode: ForwardMode,
    /// Server ports.
    pub server: ServerSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            feed: FeedSettings::default(),
            websocket: WebSocketSettings::default(),
            sink: SinkSettings::default(),
            forward_mode: ForwardMode::Sequential,
            server: ServerSettings::default(),
        }
    }
}

impl AppConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let defaults = Self::default();

        let symbol = env.string("BRIDGE_SYMBOL", &defaults.feed.symbol);
        if symbol.is_empty() {
            return Err(ConfigError::EmptyValue("BRIDGE_SYMBOL".to_string()));
        }
        let price_field = env.string("BRIDGE_PRICE_FIELD", &defaults.feed.price_field);
        if price_field.is_empty() {
            return Err(ConfigError::EmptyValue("BRIDGE_PRICE_FIELD".to_string()));
        }

        let tls = match env.get("BRIDGE_TLS_VERIFY") {
            Some(value) => value
                .parse::<TlsPolicy>()
                .map_err(|e| ConfigError::invalid("BRIDGE_TLS_VERIFY", &value, e))?,
            None => defaults.feed.tls,
        };

        let url = env.string("BRIDGE_FEED_URL", &defaults.feed.url);
        validate_url(&url).map_err(|e| ConfigError::invalid("BRIDGE_FEED_URL", &url, e))?;

        let feed = FeedSettings {
            url,
            symbol,
            price_field,
            tls,
            connect_timeout: env.secs("BRIDGE_CONNECT_TIMEOUT_SECS", defaults.feed.connect_timeout),
        };

        let websocket = WebSocketSettings {
            heartbeat_interval: env
                .secs("BRIDGE_HEARTBEAT_INTERVAL_SECS", defaults.websocket.heartbeat_interval)
                .max(Duration::from_secs(1)),
            reconnect_enabled: env.flag(
                "BRIDGE_RECONNECT_ENABLED",
                defaults.websocket.reconnect_enabled,
            ),
            reconnect_delay_initial: env.millis(
                "BRIDGE_RECONNECT_DELAY_INITIAL_MS",
                defaults.websocket.reconnect_delay_initial,
            ),
            reconnect_delay_max: env.secs(
                "BRIDGE_RECONNECT_DELAY_MAX_SECS",
                defaults.websocket.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: env.number(
                "BRIDGE_RECONNECT_DELAY_MULTIPLIER",
                defaults.websocket.reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: env.number(
                "BRIDGE_MAX_RECONNECT_ATTEMPTS",
                defaults.websocket.max_reconnect_attempts,
            ),
        };

        let sink = SinkSettings {
            address: normalize_address(&env.string("BRIDGE_SINK_ADDR", &defaults.sink.address)),
            connect_timeout: env.millis(
                "BRIDGE_SINK_CONNECT_TIMEOUT_MS",
                defaults.sink.connect_timeout,
            ),
            request_timeout: env.millis(
                "BRIDGE_SINK_REQUEST_TIMEOUT_MS",
                defaults.sink.request_timeout,
            ),
            reuse_connection: env.flag(
                "BRIDGE_SINK_REUSE_CONNECTION",
                defaults.sink.reuse_connection,
            ),
        };

        let max_in_flight = env.number("BRIDGE_MAX_IN_FLIGHT", DEFAULT_MAX_IN_FLIGHT);
        let forward_mode = match env.get("BRIDGE_FORWARD_MODE") {
            Some(value) => ForwardMode::parse(&value, max_in_flight).ok_or_else(|| {
                ConfigError::invalid(
                    "BRIDGE_FORWARD_MODE",
                    &value,
                    "expected 'sequential' or 'detached'",
                )
            })?,
            None => defaults.forward_mode,
        };

        let server = ServerSettings {
            health_port: env.number("BRIDGE_HEALTH_PORT", defaults.server.health_port),
        };

        Ok(Self {
            feed,
            websocket,
            sink,
            forward_mode,
            server,
        })
    }

    /// Settings for the bridge loop.
    #[must_use]
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            session: SessionConfig {
                url: self.feed.url.clone(),
                tls: self.feed.tls,
                connect_timeout: self.feed.connect_timeout,
            },
            heartbeat: HeartbeatConfig::new(self.websocket.heartbeat_interval),
            symbol: self.feed.symbol.clone(),
            price_field: self.feed.price_field.clone(),
            forward_mode: self.forward_mode,
            reconnect: ReconnectConfig::from_websocket_settings(&self.websocket),
        }
    }

    /// Settings for the gRPC sink.
    #[must_use]
    pub fn sink_config(&self) -> SinkConfig {
        SinkConfig {
            address: self.sink.address.clone(),
            connect_timeout: self.sink.connect_timeout,
            request_timeout: self.sink.request_timeout,
            reuse_connection: self.sink.reuse_connection,
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),

    /// Environment variable has an unusable value.
    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Value found.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &str, value: &str, reason: impl std::fmt::Display) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn number<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        match self.get(key).map(|v| v.to_ascii_lowercase()).as_deref() {
            Some("true" | "1" | "yes" | "on") => true,
            Some("false" | "0" | "no" | "off") => false,
            _ => default,
        }
    }
}
