//! Ticker Codec
//!
//! Turns a raw feed text frame into a validated [`TickMessage`].
//!
//! Two failure classes:
//! - `MalformedPayload`: the frame is not well-formed JSON
//! - `SchemaViolation`: well-formed, but not a complete `ticker` event
//!
//! Decoding is pure: no logging and no shared state. Callers count and
//! report failures.

use serde_json::Value;

use crate::domain::tick::{TICKER_MESSAGE_TYPE, TickMessage};
use crate::infrastructure::coinbase::messages::TickerPayload;

/// Fields a frame must carry to be accepted as a ticker event.
const REQUIRED_FIELDS: [&str; 5] = ["type", "product_id", "price", "best_bid", "best_ask"];

/// Decode errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Input is not well-formed JSON.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Input is JSON but not an acceptable ticker event.
    #[error("schema violation: {0}")]
    SchemaViolation(String),
}

impl DecodeError {
    /// Short label used for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MalformedPayload(_) => "malformed",
            Self::SchemaViolation(_) => "schema",
        }
    }
}

/// JSON codec for the Coinbase ticker channel.
#[derive(Debug, Default, Clone, Copy)]
pub struct TickerCodec;

impl TickerCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one text frame.
    ///
    /// # Errors
    ///
    /// Returns `DecodeError::MalformedPayload` if `raw` is not JSON, and
    /// `DecodeError::SchemaViolation` if it is not an object, lacks a required
    /// field, has a `type` other than `"ticker"`, or carries a price field that
    /// is not a finite number or numeric string.
    pub fn decode(&self, raw: &str) -> Result<TickMessage, DecodeError> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| DecodeError::MalformedPayload(e.to_string()))?;

        let Some(object) = value.as_object() else {
            return Err(DecodeError::SchemaViolation(
                "expected a JSON object".to_string(),
            ));
        };

        if let Some(missing) = REQUIRED_FIELDS.iter().find(|f| !object.contains_key(**f)) {
            return Err(DecodeError::SchemaViolation(format!(
                "missing field `{missing}`"
            )));
        }

        match object.get("type").and_then(Value::as_str) {
            Some(TICKER_MESSAGE_TYPE) => {}
            Some(other) => {
                return Err(DecodeError::SchemaViolation(format!(
                    "unexpected message type `{other}`"
                )));
            }
            None => {
                return Err(DecodeError::SchemaViolation(
                    "`type` is not a string".to_string(),
                ));
            }
        }

        let payload: TickerPayload = serde_json::from_value(value)
            .map_err(|e| DecodeError::SchemaViolation(e.to_string()))?;

        Ok(payload.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    const ETH_TICK: &str = r#"{"type":"ticker","product_id":"ETH-USD","price":"3000.00","best_bid":"2999.00","best_ask":"3001.00","time":"T"}"#;

    #[test]
    fn decodes_valid_ticker() {
        let tick = TickerCodec::new().decode(ETH_TICK).unwrap();
        assert_eq!(tick.message_type, "ticker");
        assert_eq!(tick.series_id, "ETH-USD");
        assert!((tick.price - 3000.0).abs() < f64::EPSILON);
        assert!((tick.best_bid - 2999.0).abs() < f64::EPSILON);
        assert!((tick.best_ask - 3001.0).abs() < f64::EPSILON);
        assert_eq!(tick.event_time, "T");
        assert!((tick.mid_price() - 3000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn decodes_numeric_literals() {
        let raw = r#"{"type":"ticker","product_id":"BTC-USD","price":50000.5,"best_bid":50000,"best_ask":50001}"#;
        let tick = TickerCodec::new().decode(raw).unwrap();
        assert!((tick.price - 50000.5).abs() < f64::EPSILON);
        assert_eq!(tick.event_time, "");
    }

    #[test_case("" ; "empty input")]
    #[test_case("not json" ; "plain text")]
    #[test_case(r#"{"type":"ticker""# ; "truncated object")]
    #[test_case(r#"{"type":"ticker",}"# ; "trailing comma")]
    fn malformed_payloads(raw: &str) {
        let err = TickerCodec::new().decode(raw).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedPayload(_)), "{err:?}");
        assert_eq!(err.kind(), "malformed");
    }

    #[test_case(r#"{"type":"heartbeat","product_id":"BTC-USD","price":"1","best_bid":"1","best_ask":"1"}"# ; "wrong type")]
    #[test_case(r#"{"type":"subscriptions","channels":[]}"# ; "subscription ack")]
    #[test_case(r#"{"product_id":"BTC-USD","price":"1","best_bid":"1","best_ask":"1"}"# ; "missing type")]
    #[test_case(r#"{"type":"ticker","price":"1","best_bid":"1","best_ask":"1"}"# ; "missing product id")]
    #[test_case(r#"{"type":"ticker","product_id":"BTC-USD","best_bid":"1","best_ask":"1"}"# ; "missing price")]
    #[test_case(r#"{"type":"ticker","product_id":"BTC-USD","price":"1","best_ask":"1"}"# ; "missing best bid")]
    #[test_case(r#"{"type":"ticker","product_id":"BTC-USD","price":"1","best_bid":"1"}"# ; "missing best ask")]
    #[test_case(r#"{"type":"ticker","product_id":"BTC-USD","price":"abc","best_bid":"1","best_ask":"1"}"# ; "non numeric price")]
    #[test_case(r#"{"type":"ticker","product_id":"BTC-USD","price":null,"best_bid":"1","best_ask":"1"}"# ; "null price")]
    #[test_case(r#"{"type":"ticker","product_id":"BTC-USD","price":"1","best_bid":true,"best_ask":"1"}"# ; "boolean bid")]
    #[test_case(r#"{"type":7,"product_id":"BTC-USD","price":"1","best_bid":"1","best_ask":"1"}"# ; "numeric type")]
    #[test_case(r#"{"type":"ticker","product_id":42,"price":"1","best_bid":"1","best_ask":"1"}"# ; "numeric product id")]
    #[test_case("[1,2,3]" ; "array")]
    #[test_case("42" ; "scalar")]
    fn schema_violations(raw: &str) {
        let err = TickerCodec::new().decode(raw).unwrap_err();
        assert!(matches!(err, DecodeError::SchemaViolation(_)), "{err:?}");
        assert_eq!(err.kind(), "schema");
    }

    #[test]
    fn schema_violation_names_missing_field() {
        let raw = r#"{"type":"ticker","product_id":"BTC-USD","price":"1","best_bid":"1"}"#;
        let err = TickerCodec::new().decode(raw).unwrap_err();
        assert_eq!(
            err,
            DecodeError::SchemaViolation("missing field `best_ask`".to_string())
        );
    }
}
