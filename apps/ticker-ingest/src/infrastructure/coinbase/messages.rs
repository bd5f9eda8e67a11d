//! Coinbase Feed Message Types
//!
//! Wire format types for the Coinbase Exchange WebSocket feed.
//!
//! # Outbound
//! - `SubscriptionRequest`: subscribe a list of products to the `ticker` channel
//!
//! # Inbound
//! - `TickerPayload`: one `ticker` event
//! - `subscriptions`: acknowledgment of a subscribe request, recognised by
//!   [`is_subscription_ack`] and otherwise ignored
//!
//! # References
//!
//! - [Exchange WebSocket Feed](https://docs.cdp.coinbase.com/exchange/docs/websocket-overview)

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

use crate::domain::tick::TickMessage;

/// Production feed endpoint.
pub const COINBASE_FEED_URL: &str = "wss://ws-feed.exchange.coinbase.com";

/// Channel carrying best bid/ask and last trade price updates.
pub const TICKER_CHANNEL: &str = "ticker";

/// Marker present in every subscription acknowledgment.
const SUBSCRIPTION_ACK_MARKER: &str = r#""type":"subscriptions""#;

// =============================================================================
// Outbound
// =============================================================================

/// Subscribe request sent once per connection after the grace period.
///
/// Serializes as
/// `{"type":"subscribe","product_ids":["BTC-USD"],"channels":["ticker"]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionRequest {
    /// Request type: "subscribe"
    #[serde(rename = "type")]
    pub request_type: &'static str,

    /// Products to subscribe
    pub product_ids: Vec<String>,

    /// Channels to subscribe the products to
    pub channels: Vec<String>,
}

impl SubscriptionRequest {
    /// Subscribe `product_ids` to the ticker channel.
    #[must_use]
    pub fn ticker(product_ids: Vec<String>) -> Self {
        Self {
            request_type: "subscribe",
            product_ids,
            channels: vec![TICKER_CHANNEL.to_string()],
        }
    }

    /// Serialize to the JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// Inbound
// =============================================================================

/// Returns true if `text` is a subscription acknowledgment.
///
/// Content sniffing only; the frame is not parsed.
#[must_use]
pub fn is_subscription_ack(text: &str) -> bool {
    text.contains(SUBSCRIPTION_ACK_MARKER)
}

/// A `ticker` event as sent by the exchange.
///
/// Prices arrive as decimal strings; numeric literals are accepted too.
/// Fields the pipeline does not use (`sequence`, `volume_24h`, ...) are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TickerPayload {
    /// Message type ("ticker")
    #[serde(rename = "type")]
    pub msg_type: String,

    /// Product identifier, e.g. "BTC-USD"
    pub product_id: String,

    /// Last trade price
    #[serde(deserialize_with = "deserialize_price")]
    pub price: f64,

    /// Best bid
    #[serde(deserialize_with = "deserialize_price")]
    pub best_bid: f64,

    /// Best ask
    #[serde(deserialize_with = "deserialize_price")]
    pub best_ask: f64,

    /// Exchange timestamp (ISO-8601), kept verbatim
    #[serde(default)]
    pub time: Option<String>,
}

impl From<TickerPayload> for TickMessage {
    fn from(payload: TickerPayload) -> Self {
        Self {
            message_type: payload.msg_type,
            series_id: payload.product_id,
            price: payload.price,
            best_bid: payload.best_bid,
            best_ask: payload.best_ask,
            event_time: payload.time.unwrap_or_default(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PriceRepr {
    Number(f64),
    Text(String),
}

/// Accepts `"123.45"` or `123.45`; rejects anything that is not a finite number.
fn deserialize_price<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = match PriceRepr::deserialize(deserializer)? {
        PriceRepr::Number(n) => n,
        PriceRepr::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| de::Error::custom(format!("invalid price string `{s}`")))?,
    };

    if value.is_finite() {
        Ok(value)
    } else {
        Err(de::Error::custom(format!("non-finite price {value}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_request_wire_format() {
        let req = SubscriptionRequest::ticker(vec!["BTC-USD".to_string()]);
        assert_eq!(
            req.to_json().unwrap(),
            r#"{"type":"subscribe","product_ids":["BTC-USD"],"channels":["ticker"]}"#
        );
    }

    #[test]
    fn subscription_request_multiple_products() {
        let req = SubscriptionRequest::ticker(vec!["BTC-USD".to_string(), "ETH-USD".to_string()]);
        let json = req.to_json().unwrap();
        assert!(json.contains(r#""product_ids":["BTC-USD","ETH-USD"]"#));
    }

    #[test]
    fn detects_subscription_ack() {
        let ack = r#"{"type":"subscriptions","channels":[{"name":"ticker","product_ids":["BTC-USD"]}]}"#;
        assert!(is_subscription_ack(ack));
        assert!(!is_subscription_ack(r#"{"type":"ticker","product_id":"BTC-USD"}"#));
        assert!(!is_subscription_ack(r#"{"type":"subscribe"}"#));
    }

    #[test]
    fn deserialize_string_prices() {
        let json = r#"{
            "type": "ticker",
            "sequence": 37475248783,
            "product_id": "BTC-USD",
            "price": "50000.12",
            "best_bid": "49999.99",
            "best_ask": "50000.25",
            "volume_24h": "1234.5",
            "time": "2024-01-15T14:30:00.123456Z"
        }"#;
        let payload: TickerPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.product_id, "BTC-USD");
        assert!((payload.price - 50000.12).abs() < 1e-9);
        assert!((payload.best_bid - 49999.99).abs() < 1e-9);
        assert!((payload.best_ask - 50000.25).abs() < 1e-9);
        assert_eq!(payload.time.as_deref(), Some("2024-01-15T14:30:00.123456Z"));
    }

    #[test]
    fn deserialize_numeric_prices() {
        let json = r#"{"type":"ticker","product_id":"ETH-USD","price":3000,"best_bid":2999.5,"best_ask":3000.5}"#;
        let payload: TickerPayload = serde_json::from_str(json).unwrap();
        assert!((payload.price - 3000.0).abs() < f64::EPSILON);
        assert!(payload.time.is_none());

        let tick = TickMessage::from(payload);
        assert_eq!(tick.series_id, "ETH-USD");
        assert_eq!(tick.event_time, "");
    }

    #[test]
    fn rejects_non_numeric_price() {
        let json = r#"{"type":"ticker","product_id":"BTC-USD","price":"n/a","best_bid":"1","best_ask":"2"}"#;
        assert!(serde_json::from_str::<TickerPayload>(json).is_err());

        let json = r#"{"type":"ticker","product_id":"BTC-USD","price":null,"best_bid":"1","best_ask":"2"}"#;
        assert!(serde_json::from_str::<TickerPayload>(json).is_err());
    }

    #[test]
    fn rejects_non_finite_price() {
        let json = r#"{"type":"ticker","product_id":"BTC-USD","price":"NaN","best_bid":"1","best_ask":"2"}"#;
        assert!(serde_json::from_str::<TickerPayload>(json).is_err());

        let json = r#"{"type":"ticker","product_id":"BTC-USD","price":"inf","best_bid":"1","best_ask":"2"}"#;
        assert!(serde_json::from_str::<TickerPayload>(json).is_err());
    }
}
