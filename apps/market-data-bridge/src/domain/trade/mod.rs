//! Trade Events
//!
//! A `TradeEvent` is one executed trade taken off the upstream feed. It is
//! built by the frame codec, handed to the sink exactly once, and dropped.

use serde::Serialize;

/// One executed trade: symbol, price and the time it was observed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeEvent {
    symbol: String,
    price: f64,
    timestamp_millis: i64,
}

impl TradeEvent {
    /// Create a trade event.
    ///
    /// Callers are expected to have validated `price` as a finite number;
    /// the frame codec is the only producer on the streaming path.
    #[must_use]
    pub fn new(symbol: impl Into<String>, price: f64, timestamp_millis: i64) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            timestamp_millis,
        }
    }

    /// Instrument symbol (e.g. `BTCUSDT`).
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Trade price.
    #[must_use]
    pub const fn price(&self) -> f64 {
        self.price
    }

    /// Wall-clock time the frame was decoded, in Unix epoch milliseconds.
    #[must_use]
    pub const fn timestamp_millis(&self) -> i64 {
        self.timestamp_millis
    }
}
