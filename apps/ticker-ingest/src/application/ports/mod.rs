//! Port Interfaces
//!
//! Contracts between the pipeline and its infrastructure adapters,
//! following the Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - `TickSink`: durable destination for enriched ticks
//! - `FeedTransport`: outbound half of the feed connection

use async_trait::async_trait;

use crate::domain::tick::EnrichedTick;

// =============================================================================
// Tick Sink
// =============================================================================

/// Errors raised by a tick sink.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The destination could not be opened for writing.
    #[error("failed to open sink {path}: {source}")]
    OpenFailed {
        /// Destination that failed to open.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A record could not be written or flushed.
    #[error("failed to write record {sequence_number}: {source}")]
    WriteFailed {
        /// Sequence number of the rejected record (0 for header/flush).
        sequence_number: u64,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Append-only destination for enriched ticks.
///
/// Implementations serialize appends internally, so a shared reference is
/// enough to write. An append either lands completely and durably or
/// returns `SinkError::WriteFailed`.
#[cfg_attr(test, mockall::automock)]
pub trait TickSink: Send + Sync {
    /// Append one record and flush it before returning.
    ///
    /// # Errors
    ///
    /// Returns `SinkError::WriteFailed` if the record could not be persisted.
    fn append(&self, tick: &EnrichedTick) -> Result<(), SinkError>;

    /// Flush any buffered output.
    ///
    /// # Errors
    ///
    /// Returns `SinkError::WriteFailed` if flushing fails.
    fn flush(&self) -> Result<(), SinkError>;

    /// Number of records appended so far.
    fn records_written(&self) -> u64;
}

// =============================================================================
// Feed Transport
// =============================================================================

/// Errors raised when sending on the feed transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Sending a frame failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The connection is already closed.
    #[error("transport closed")]
    Closed,
}

/// Outbound half of a feed connection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FeedTransport: Send {
    /// Send a text frame, returning the payload size in bytes.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the frame could not be sent.
    async fn send_text(&mut self, text: String) -> Result<usize, TransportError>;
}
