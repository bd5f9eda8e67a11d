//! Sequencing and Pipeline Counters
//!
//! The `Sequencer` is owned by the pipeline and only advanced on the
//! delivery task. `PipelineStats` is shared read-only with the control
//! task, the health endpoint and the logs.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// =============================================================================
// Sequencer
// =============================================================================

/// Issues strictly increasing sequence numbers starting at 1.
#[derive(Debug)]
pub struct Sequencer {
    last: u64,
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl Sequencer {
    /// Create a sequencer that has issued nothing yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { last: 0 }
    }

    /// Create a sequencer that continues after `last`.
    #[must_use]
    pub const fn resuming_after(last: u64) -> Self {
        Self { last }
    }

    /// The number the next call to `next_sequence` will return.
    #[must_use]
    pub const fn peek_next(&self) -> u64 {
        self.last + 1
    }

    /// Issue the next sequence number.
    pub const fn next_sequence(&mut self) -> u64 {
        self.last += 1;
        self.last
    }

    /// Last issued number (0 if none).
    #[must_use]
    pub const fn last_issued(&self) -> u64 {
        self.last
    }
}

// =============================================================================
// Pipeline Stats
// =============================================================================

/// Counters updated once per successfully enriched and persisted tick.
#[derive(Debug, Default)]
pub struct PipelineStats {
    total_processed: AtomicU64,
    enrichment_count: AtomicU64,
    sink_errors: AtomicU64,
    last_sequence: AtomicU64,
}

impl PipelineStats {
    /// Create zeroed counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            total_processed: AtomicU64::new(0),
            enrichment_count: AtomicU64::new(0),
            sink_errors: AtomicU64::new(0),
            last_sequence: AtomicU64::new(0),
        }
    }

    /// Record a tick that went through enrichment and the sink.
    pub fn record_processed(&self, sequence_number: u64) {
        self.total_processed.fetch_add(1, Ordering::Relaxed);
        self.enrichment_count.fetch_add(1, Ordering::Relaxed);
        self.last_sequence.store(sequence_number, Ordering::Relaxed);
    }

    /// Record a failed sink append.
    pub fn record_sink_error(&self) {
        self.sink_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Ticks fully processed.
    #[must_use]
    pub fn total_processed(&self) -> u64 {
        self.total_processed.load(Ordering::Relaxed)
    }

    /// EMA update pairs performed.
    #[must_use]
    pub fn enrichment_count(&self) -> u64 {
        self.enrichment_count.load(Ordering::Relaxed)
    }

    /// Failed sink appends.
    #[must_use]
    pub fn sink_errors(&self) -> u64 {
        self.sink_errors.load(Ordering::Relaxed)
    }

    /// Sequence number of the last persisted tick.
    #[must_use]
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_processed: self.total_processed(),
            enrichment_count: self.enrichment_count(),
            sink_errors: self.sink_errors(),
            last_sequence: self.last_sequence(),
        }
    }
}

/// Copy of the pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Ticks fully processed.
    pub total_processed: u64,
    /// EMA update pairs performed.
    pub enrichment_count: u64,
    /// Failed sink appends.
    pub sink_errors: u64,
    /// Sequence number of the last persisted tick.
    pub last_sequence: u64,
}

impl StatsSnapshot {
    /// Share of processed ticks that received an EMA update, in percent.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn ema_efficiency(&self) -> f64 {
        if self.total_processed == 0 {
            return 0.0;
        }
        self.enrichment_count as f64 / self.total_processed as f64 * 100.0
    }
}
