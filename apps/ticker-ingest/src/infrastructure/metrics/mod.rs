//! Prometheus Metrics Module
//!
//! Exposes pipeline metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Messages**: frames received, parse errors by kind
//! - **Pipeline**: ticks processed per series, sink errors, records written
//! - **Connection**: feed connection gauge, reconnects
//! - **Latency**: decode-to-durable-append time per tick
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

const MESSAGES_RECEIVED: &str = "ticker_ingest_messages_received_total";
const PARSE_ERRORS: &str = "ticker_ingest_parse_errors_total";
const TICKS_PROCESSED: &str = "ticker_ingest_ticks_processed_total";
const SINK_ERRORS: &str = "ticker_ingest_sink_errors_total";
const RECORDS_WRITTEN: &str = "ticker_ingest_records_written_total";
const RECONNECTS: &str = "ticker_ingest_reconnects_total";
const FEED_CONNECTED: &str = "ticker_ingest_feed_connected";
const LAST_SEQUENCE: &str = "ticker_ingest_last_sequence_number";
const TICK_PROCESSING: &str = "ticker_ingest_tick_processing_seconds";

/// Histogram buckets for per-tick processing, 10µs to 100ms.
const PROCESSING_BUCKETS: [f64; 10] = [
    0.000_01, 0.000_025, 0.000_05, 0.000_1, 0.000_25, 0.000_5, 0.001, 0.005, 0.025, 0.1,
];

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder, or return the existing handle.
///
/// # Errors
///
/// Returns `BuildError` if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(TICK_PROCESSING.to_string()),
            &PROCESSING_BUCKETS,
        )?
        .install_recorder()?;

    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(MESSAGES_RECEIVED, "Total frames received from the feed");
    describe_counter!(PARSE_ERRORS, "Frames rejected by the decoder, by kind");
    describe_counter!(
        TICKS_PROCESSED,
        "Ticks enriched and durably appended, by series"
    );
    describe_counter!(SINK_ERRORS, "Appends rejected by the sink");
    describe_counter!(RECORDS_WRITTEN, "Rows the sink reports as written this session");
    describe_counter!(RECONNECTS, "Feed reconnection attempts");

    describe_gauge!(FEED_CONNECTED, "1 while the feed connection is open");
    describe_gauge!(LAST_SEQUENCE, "Sequence number of the last persisted tick");

    describe_histogram!(
        TICK_PROCESSING,
        "Time from decoded tick to durable append"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a frame received from the feed.
pub fn record_message_received() {
    counter!(MESSAGES_RECEIVED).increment(1);
}

/// Record a frame the decoder rejected.
pub fn record_parse_error(kind: &'static str) {
    counter!(PARSE_ERRORS, "kind" => kind).increment(1);
}

/// Record a tick that was enriched and persisted.
///
/// `records_written` is the sink's own row count, mirrored as an absolute
/// counter value.
pub fn record_tick_processed(
    series_id: &str,
    sequence_number: u64,
    duration: Duration,
    records_written: u64,
) {
    counter!(TICKS_PROCESSED, "series" => series_id.to_string()).increment(1);
    counter!(RECORDS_WRITTEN).absolute(records_written);
    #[allow(clippy::cast_precision_loss)]
    gauge!(LAST_SEQUENCE).set(sequence_number as f64);
    histogram!(TICK_PROCESSING).record(duration.as_secs_f64());
}

/// Record an append the sink rejected.
pub fn record_sink_error() {
    counter!(SINK_ERRORS).increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect() {
    counter!(RECONNECTS).increment(1);
}

/// Update the feed connection gauge.
pub fn set_feed_connected(connected: bool) {
    gauge!(FEED_CONNECTED).set(if connected { 1.0 } else { 0.0 });
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_a_no_op() {
        record_message_received();
        record_parse_error("schema");
        record_tick_processed("BTC-USD", 1, Duration::from_micros(40), 1);
        record_sink_error();
        record_reconnect();
        set_feed_connected(true);
    }

    #[test]
    fn records_written_mirrors_sink_count() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            record_tick_processed("BTC-USD", 8, Duration::from_micros(40), 3);
            record_tick_processed("BTC-USD", 9, Duration::from_micros(40), 5);
        });

        let rendered = handle.render();
        assert!(rendered.contains("ticker_ingest_records_written_total 5"));
        assert!(rendered.contains("ticker_ingest_ticks_processed_total{series=\"BTC-USD\"} 2"));
        assert!(rendered.contains("ticker_ingest_last_sequence_number 9"));
    }

    #[test]
    fn buckets_are_sorted() {
        assert!(PROCESSING_BUCKETS.windows(2).all(|w| w[0] < w[1]));
    }
}
