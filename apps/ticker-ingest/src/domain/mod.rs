//! Domain Layer - Ticker types and enrichment primitives.
//!
//! Pure Rust with no I/O: the decoded and enriched tick types, the
//! exponential moving average and the sequencer/counters.

/// Decoded and enriched ticker records.
pub mod tick;

/// Exponential moving average state.
pub mod ema;

/// Sequence numbering and pipeline counters.
pub mod sequencing;
