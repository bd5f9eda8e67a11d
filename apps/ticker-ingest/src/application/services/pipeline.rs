//! Enrichment Pipeline
//!
//! Sequencer → EMA → sink chain applied to every decoded tick.
//!
//! The record is built from the *next* sequence number and *previewed* EMA
//! values. Sequencer, smoothers and counters only advance once the sink has
//! accepted the row, so a failed append leaves no gap and no drift.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::application::ports::{SinkError, TickSink};
use crate::domain::ema::{EmaError, EmaState};
use crate::domain::sequencing::{PipelineStats, Sequencer};
use crate::domain::tick::{EnrichedTick, TickMessage};

/// Every this many processed ticks an EMA progress line is logged.
const EMA_PROGRESS_EVERY: u64 = 100;

/// Errors produced while processing a tick.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Smoother construction failed.
    #[error(transparent)]
    InvalidParameter(#[from] EmaError),

    /// The sink rejected the record.
    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Pipeline settings.
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    /// EMA smoothing factor, `0 < alpha <= 1`.
    pub alpha: f64,
    /// Log a tick summary every this many processed ticks (0 = never).
    pub log_every: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            alpha: EmaState::DEFAULT_ALPHA,
            log_every: 25,
        }
    }
}

/// Price and mid-price smoothers of one series.
#[derive(Debug)]
struct SeriesSmoothers {
    price: EmaState,
    mid: EmaState,
}

impl SeriesSmoothers {
    fn new(alpha: f64) -> Result<Self, EmaError> {
        Ok(Self {
            price: EmaState::new(alpha)?,
            mid: EmaState::new(alpha)?,
        })
    }
}

/// Stateful enrichment stage owned by a single session.
pub struct EnrichmentPipeline {
    config: PipelineConfig,
    sequencer: Sequencer,
    series: HashMap<String, SeriesSmoothers>,
    sink: Arc<dyn TickSink>,
    stats: Arc<PipelineStats>,
}

impl std::fmt::Debug for EnrichmentPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnrichmentPipeline")
            .field("config", &self.config)
            .field("last_sequence", &self.sequencer.last_issued())
            .field("series", &self.series.len())
            .finish_non_exhaustive()
    }
}

impl EnrichmentPipeline {
    /// Create a pipeline writing to `sink`.
    ///
    /// # Errors
    ///
    /// Returns `EmaError::InvalidParameter` if `config.alpha` is outside `(0, 1]`.
    pub fn new(config: PipelineConfig, sink: Arc<dyn TickSink>) -> Result<Self, EmaError> {
        EmaState::new(config.alpha)?;

        tracing::info!(
            alpha = config.alpha,
            log_every = config.log_every,
            "Enrichment pipeline initialized"
        );

        Ok(Self {
            config,
            sequencer: Sequencer::new(),
            series: HashMap::new(),
            sink,
            stats: Arc::new(PipelineStats::new()),
        })
    }

    /// Continue numbering after `last_sequence`, typically the last row of a
    /// reopened log.
    #[must_use]
    pub fn resume_after(mut self, last_sequence: u64) -> Self {
        if last_sequence > 0 {
            tracing::info!(last_sequence, "Resuming sequence numbering");
        }
        self.sequencer = Sequencer::resuming_after(last_sequence);
        self
    }

    /// Shared handle to the pipeline counters.
    #[must_use]
    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    /// The sink this pipeline writes to.
    #[must_use]
    pub fn sink(&self) -> Arc<dyn TickSink> {
        Arc::clone(&self.sink)
    }

    /// Last sequence number issued to a persisted tick.
    #[must_use]
    pub const fn last_sequence(&self) -> u64 {
        self.sequencer.last_issued()
    }

    /// Current `(price_ema, mid_price_ema)` of a series, if it has been seen.
    #[must_use]
    pub fn series_emas(&self, series_id: &str) -> Option<(f64, f64)> {
        self.series
            .get(series_id)
            .map(|s| (s.price.current(), s.mid.current()))
    }

    /// Enrich and persist a tick captured now.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Sink` if the append fails; pipeline state is
    /// left untouched in that case.
    pub fn process(&mut self, tick: TickMessage) -> Result<EnrichedTick, PipelineError> {
        self.process_at(tick, Utc::now())
    }

    /// Enrich and persist a tick with an explicit capture time.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Sink` if the append fails; pipeline state is
    /// left untouched in that case.
    pub fn process_at(
        &mut self,
        tick: TickMessage,
        ingest_timestamp: DateTime<Utc>,
    ) -> Result<EnrichedTick, PipelineError> {
        let smoothers = match self.series.entry(tick.series_id.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                tracing::info!(series = %tick.series_id, "Tracking new series");
                entry.insert(SeriesSmoothers::new(self.config.alpha)?)
            }
        };

        let sequence_number = self.sequencer.peek_next();
        let price_ema = smoothers.price.preview(tick.price);
        let mid_price_ema = smoothers.mid.preview(tick.mid_price());
        let enriched = EnrichedTick::new(
            tick,
            sequence_number,
            ingest_timestamp,
            price_ema,
            mid_price_ema,
        );

        if let Err(e) = self.sink.append(&enriched) {
            self.stats.record_sink_error();
            return Err(e.into());
        }

        smoothers.price.update(enriched.price);
        smoothers.mid.update(enriched.mid_price);
        self.sequencer.next_sequence();
        self.stats.record_processed(sequence_number);

        self.log_progress(&enriched);
        Ok(enriched)
    }

    fn log_progress(&self, enriched: &EnrichedTick) {
        let processed = self.stats.total_processed();

        if self.config.log_every > 0 && processed % self.config.log_every == 0 {
            tracing::info!("{}", enriched.summary());
        }

        if processed % EMA_PROGRESS_EVERY == 0 {
            tracing::info!(
                sequence = enriched.sequence_number,
                ema_updates = self.stats.enrichment_count(),
                price_ema = enriched.price_ema,
                mid_price_ema = enriched.mid_price_ema,
                "EMA progress"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::MockTickSink;
    use crate::domain::tick::TICKER_MESSAGE_TYPE;
    use parking_lot::Mutex;

    /// Sink that keeps every appended record in memory.
    #[derive(Default)]
    struct RecordingSink {
        rows: Mutex<Vec<EnrichedTick>>,
    }

    impl TickSink for RecordingSink {
        fn append(&self, tick: &EnrichedTick) -> Result<(), SinkError> {
            self.rows.lock().push(tick.clone());
            Ok(())
        }

        fn flush(&self) -> Result<(), SinkError> {
            Ok(())
        }

        fn records_written(&self) -> u64 {
            self.rows.lock().len() as u64
        }
    }

    fn tick(series: &str, price: f64, bid: f64, ask: f64) -> TickMessage {
        TickMessage {
            message_type: TICKER_MESSAGE_TYPE.to_string(),
            series_id: series.to_string(),
            price,
            best_bid: bid,
            best_ask: ask,
            event_time: "T".to_string(),
        }
    }

    fn write_failed() -> SinkError {
        SinkError::WriteFailed {
            sequence_number: 1,
            source: std::io::Error::other("disk full"),
        }
    }

    #[test]
    fn rejects_invalid_alpha() {
        let sink = Arc::new(RecordingSink::default());
        let config = PipelineConfig {
            alpha: 1.5,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            EnrichmentPipeline::new(config, sink),
            Err(EmaError::InvalidParameter(_))
        ));
    }

    #[test]
    fn first_tick_seeds_both_emas() {
        let sink = Arc::new(RecordingSink::default());
        let mut pipeline =
            EnrichmentPipeline::new(PipelineConfig::default(), sink.clone()).unwrap();

        let enriched = pipeline
            .process(tick("ETH-USD", 3000.0, 2999.0, 3001.0))
            .unwrap();

        assert_eq!(enriched.sequence_number, 1);
        assert_eq!(enriched.mid_price, 3000.0);
        assert_eq!(enriched.price_ema, 3000.0);
        assert_eq!(enriched.mid_price_ema, 3000.0);
        assert_eq!(sink.records_written(), 1);
    }

    #[test]
    fn second_tick_applies_recurrence() {
        let sink = Arc::new(RecordingSink::default());
        let mut pipeline =
            EnrichmentPipeline::new(PipelineConfig::default(), sink.clone()).unwrap();

        pipeline.process(tick("BTC-USD", 100.0, 99.0, 101.0)).unwrap();
        let second = pipeline.process(tick("BTC-USD", 110.0, 109.0, 111.0)).unwrap();

        assert_eq!(second.sequence_number, 2);
        assert!((second.price_ema - 102.0).abs() < 1e-9);
        assert!((second.mid_price_ema - 102.0).abs() < 1e-9);
    }

    #[test]
    fn resumed_pipeline_continues_numbering() {
        let sink = Arc::new(RecordingSink::default());
        let mut pipeline = EnrichmentPipeline::new(PipelineConfig::default(), sink.clone())
            .unwrap()
            .resume_after(41);

        let first = pipeline.process(tick("BTC-USD", 100.0, 99.0, 101.0)).unwrap();
        assert_eq!(first.sequence_number, 42);
        assert_eq!(first.price_ema, 100.0);
        assert_eq!(pipeline.last_sequence(), 42);
    }

    #[test]
    fn series_are_smoothed_independently() {
        let sink = Arc::new(RecordingSink::default());
        let mut pipeline =
            EnrichmentPipeline::new(PipelineConfig::default(), sink.clone()).unwrap();

        pipeline.process(tick("BTC-USD", 100.0, 99.0, 101.0)).unwrap();
        let eth = pipeline.process(tick("ETH-USD", 3000.0, 2999.0, 3001.0)).unwrap();
        let btc = pipeline.process(tick("BTC-USD", 110.0, 109.0, 111.0)).unwrap();

        assert_eq!(eth.price_ema, 3000.0);
        assert!((btc.price_ema - 102.0).abs() < 1e-9);
        let sequences: Vec<u64> = sink.rows.lock().iter().map(|t| t.sequence_number).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert!(pipeline.series_emas("ETH-USD").is_some());
        assert!(pipeline.series_emas("SOL-USD").is_none());
    }

    #[test]
    fn counters_advance_once_per_tick() {
        let sink = Arc::new(RecordingSink::default());
        let mut pipeline =
            EnrichmentPipeline::new(PipelineConfig::default(), sink.clone()).unwrap();
        let stats = pipeline.stats();

        for i in 0..5 {
            let price = 100.0 + f64::from(i);
            pipeline.process(tick("BTC-USD", price, price, price)).unwrap();
        }

        let snap = stats.snapshot();
        assert_eq!(snap.total_processed, 5);
        assert_eq!(snap.enrichment_count, 5);
        assert_eq!(snap.last_sequence, 5);
        assert_eq!(pipeline.last_sequence(), 5);
    }

    #[test]
    fn failed_append_consumes_no_sequence_and_keeps_emas() {
        let mut sink = MockTickSink::new();
        let mut seq = mockall::Sequence::new();
        sink.expect_append()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        sink.expect_append()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(write_failed()));
        sink.expect_append()
            .withf(|t| t.sequence_number == 2)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let mut pipeline =
            EnrichmentPipeline::new(PipelineConfig::default(), Arc::new(sink)).unwrap();
        let stats = pipeline.stats();

        pipeline.process(tick("BTC-USD", 100.0, 100.0, 100.0)).unwrap();
        let err = pipeline
            .process(tick("BTC-USD", 500.0, 500.0, 500.0))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Sink(SinkError::WriteFailed { .. })));
        assert_eq!(pipeline.series_emas("BTC-USD"), Some((100.0, 100.0)));

        let third = pipeline.process(tick("BTC-USD", 110.0, 110.0, 110.0)).unwrap();
        assert_eq!(third.sequence_number, 2);
        assert!((third.price_ema - 102.0).abs() < 1e-9);

        let snap = stats.snapshot();
        assert_eq!(snap.total_processed, 2);
        assert_eq!(snap.sink_errors, 1);
    }

    #[test]
    fn process_at_uses_given_timestamp() {
        let sink = Arc::new(RecordingSink::default());
        let mut pipeline =
            EnrichmentPipeline::new(PipelineConfig::default(), sink.clone()).unwrap();
        let ts = DateTime::from_timestamp(1_700_000_000, 123_456_000).unwrap();

        let enriched = pipeline
            .process_at(tick("BTC-USD", 1.0, 1.0, 1.0), ts)
            .unwrap();
        assert_eq!(enriched.ingest_timestamp, ts);
    }
}
