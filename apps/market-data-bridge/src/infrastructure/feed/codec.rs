//! Frame Codec
//!
//! Decodes trade-stream frames into [`TradeEvent`]s.
//!
//! Each frame is a JSON object. Only trade frames carry a price; other event
//! types on the same stream are skipped rather than treated as errors.
//!
//! # Wire Format (Binance trade stream)
//! ```json
//! {"e":"trade","E":1700000000000,"s":"BTCUSDT","t":12345,"p":"50000.12","q":"0.01"}
//! ```
//!
//! The symbol is not read from the frame: a session streams exactly one
//! instrument, and its label comes from configuration.

use chrono::Utc;
use serde_json::{Map, Value};

use crate::application::ports::RawFrame;
use crate::domain::trade::TradeEvent;

/// Default JSON key carrying the trade price.
pub const DEFAULT_PRICE_FIELD: &str = "p";

/// Codec errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Frame is not a JSON object.
    #[error("invalid frame format: {0}")]
    InvalidFormat(String),

    /// Price field present but not a finite decimal number.
    #[error("malformed price: {0}")]
    MalformedPrice(String),
}

impl CodecError {
    /// Short reason label for metrics.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::InvalidFormat(_) => "invalid_format",
            Self::MalformedPrice(_) => "malformed_price",
        }
    }
}

/// Outcome of decoding one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// The frame carried a trade.
    Trade(TradeEvent),
    /// The frame has no price and is not forwarded.
    Skip,
}

/// JSON codec for single-symbol trade streams.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    symbol: String,
    price_field: String,
}

impl FrameCodec {
    /// Create a codec stamping `symbol` on every event, reading the price
    /// from `price_field`.
    #[must_use]
    pub fn new(symbol: impl Into<String>, price_field: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            price_field: price_field.into(),
        }
    }

    /// Create a codec reading the price from [`DEFAULT_PRICE_FIELD`].
    #[must_use]
    pub fn with_default_field(symbol: impl Into<String>) -> Self {
        Self::new(symbol, DEFAULT_PRICE_FIELD)
    }

    /// Symbol stamped on decoded events.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Decode a frame, stamping the current wall-clock time.
    ///
    /// # Errors
    ///
    /// See [`FrameCodec::decode_at`].
    pub fn decode(&self, frame: &RawFrame) -> Result<Decoded, CodecError> {
        self.decode_at(frame, Utc::now().timestamp_millis())
    }

    /// Decode a frame with an explicit timestamp.
    ///
    /// A missing, `null` or empty-string price yields [`Decoded::Skip`]. A
    /// price of only whitespace is present but unparseable, so it is
    /// malformed.
    ///
    /// # Errors
    ///
    /// - [`CodecError::InvalidFormat`] if the frame is not a UTF-8 JSON object.
    /// - [`CodecError::MalformedPrice`] if the price is present but is not a
    ///   finite number or numeric string.
    pub fn decode_at(
        &self,
        frame: &RawFrame,
        timestamp_millis: i64,
    ) -> Result<Decoded, CodecError> {
        let object = parse_object(frame)?;

        let Some(price) = extract_price(&object, &self.price_field)? else {
            return Ok(Decoded::Skip);
        };

        Ok(Decoded::Trade(TradeEvent::new(
            self.symbol.clone(),
            price,
            timestamp_millis,
        )))
    }
}

fn parse_object(frame: &RawFrame) -> Result<Map<String, Value>, CodecError> {
    let text = match frame {
        RawFrame::Text(text) => text.as_str(),
        RawFrame::Binary(bytes) => std::str::from_utf8(bytes)
            .map_err(|e| CodecError::InvalidFormat(format!("binary frame is not UTF-8: {e}")))?,
    };

    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(object)) => Ok(object),
        Ok(other) => Err(CodecError::InvalidFormat(format!(
            "expected JSON object, got {}",
            json_type_name(&other)
        ))),
        Err(e) => Err(CodecError::InvalidFormat(e.to_string())),
    }
}

fn extract_price(object: &Map<String, Value>, field: &str) -> Result<Option<f64>, CodecError> {
    let price = match object.get(field) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(s)) if s.is_empty() => return Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| CodecError::MalformedPrice(s.clone()))?,
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| CodecError::MalformedPrice(n.to_string()))?,
        Some(other) => {
            return Err(CodecError::MalformedPrice(format!(
                "expected string or number, got {}",
                json_type_name(other)
            )));
        }
    };

    if price.is_finite() {
        Ok(Some(price))
    } else {
        Err(CodecError::MalformedPrice(price.to_string()))
    }
}

const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
