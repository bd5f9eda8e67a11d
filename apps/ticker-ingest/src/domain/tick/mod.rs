//! Ticker Domain Types
//!
//! `TickMessage` is the validated output of the decoder. `EnrichedTick`
//! is the record produced by the enrichment pipeline and handed to the sink.
//! Neither type is retained after the sink has consumed it.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Message type accepted by the pipeline.
pub const TICKER_MESSAGE_TYPE: &str = "ticker";

// =============================================================================
// Tick Message
// =============================================================================

/// A validated ticker event for one series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickMessage {
    /// Message type (always `"ticker"` after validation).
    pub message_type: String,
    /// Series (product) identifier, e.g. `BTC-USD`.
    pub series_id: String,
    /// Last traded price.
    pub price: f64,
    /// Best bid price.
    pub best_bid: f64,
    /// Best ask price.
    pub best_ask: f64,
    /// Source-provided event time, kept verbatim.
    pub event_time: String,
}

impl TickMessage {
    /// Midpoint of the best bid and best ask.
    #[must_use]
    pub fn mid_price(&self) -> f64 {
        (self.best_bid + self.best_ask) / 2.0
    }
}

// =============================================================================
// Enriched Tick
// =============================================================================

/// A tick stamped with its sequence number, capture time and smoothed prices.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedTick {
    /// Wall-clock time at which the pipeline captured the tick.
    pub ingest_timestamp: DateTime<Utc>,
    /// Pipeline-assigned sequence number, starting at 1.
    pub sequence_number: u64,
    /// Message type.
    pub message_type: String,
    /// Series identifier.
    pub series_id: String,
    /// Last traded price.
    pub price: f64,
    /// Best bid price.
    pub best_bid: f64,
    /// Best ask price.
    pub best_ask: f64,
    /// `(best_bid + best_ask) / 2`.
    pub mid_price: f64,
    /// EMA of `price` for this series.
    pub price_ema: f64,
    /// EMA of `mid_price` for this series.
    pub mid_price_ema: f64,
    /// Source-provided event time.
    pub event_time: String,
}

impl EnrichedTick {
    /// Build an enriched record from a decoded tick.
    #[must_use]
    pub fn new(
        tick: TickMessage,
        sequence_number: u64,
        ingest_timestamp: DateTime<Utc>,
        price_ema: f64,
        mid_price_ema: f64,
    ) -> Self {
        let mid_price = tick.mid_price();
        Self {
            ingest_timestamp,
            sequence_number,
            message_type: tick.message_type,
            series_id: tick.series_id,
            price: tick.price,
            best_bid: tick.best_bid,
            best_ask: tick.best_ask,
            mid_price,
            price_ema,
            mid_price_ema,
            event_time: tick.event_time,
        }
    }

    /// One-line human-readable summary used in periodic progress logs.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "#{} {} [{}] - Price: ${:.2} | Mid: ${:.2} | Price EMA: ${:.4} | Mid EMA: ${:.4}",
            self.sequence_number,
            self.series_id,
            self.ingest_timestamp.format("%H:%M:%S%.6f"),
            self.price,
            self.mid_price,
            self.price_ema,
            self.mid_price_ema,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_tick() -> TickMessage {
        TickMessage {
            message_type: TICKER_MESSAGE_TYPE.to_string(),
            series_id: "ETH-USD".to_string(),
            price: 3000.0,
            best_bid: 2999.0,
            best_ask: 3001.0,
            event_time: "2024-01-15T10:00:00.000000Z".to_string(),
        }
    }

    #[test]
    fn mid_price_is_bid_ask_midpoint() {
        let tick = sample_tick();
        assert!((tick.mid_price() - 3000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn enriched_tick_carries_mid_price_and_event_time() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        let enriched = EnrichedTick::new(sample_tick(), 7, ts, 3000.5, 3000.25);

        assert_eq!(enriched.sequence_number, 7);
        assert_eq!(enriched.series_id, "ETH-USD");
        assert!((enriched.mid_price - 3000.0).abs() < f64::EPSILON);
        assert_eq!(enriched.event_time, "2024-01-15T10:00:00.000000Z");
        assert_eq!(enriched.ingest_timestamp, ts);
    }

    #[test]
    fn summary_includes_sequence_and_prices() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        let enriched = EnrichedTick::new(sample_tick(), 25, ts, 3000.12346, 3000.0);
        let line = enriched.summary();

        assert!(line.starts_with("#25 ETH-USD [10:00:00.000000]"));
        assert!(line.contains("Price: $3000.00"));
        assert!(line.contains("Price EMA: $3000.1235"));
    }
}
