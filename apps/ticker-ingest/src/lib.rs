#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::cast_possible_truncation
    )
)]

//! Ticker Ingest - Real-time Ticker Enrichment Pipeline
//!
//! Maintains a WebSocket session to the Coinbase ticker feed, validates each
//! ticker event, enriches it with per-series exponential moving averages and
//! a global sequence number, and appends it to a CSV log.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and arithmetic
//!   - `tick`: decoded and enriched tick records
//!   - `ema`: exponential moving average state
//!   - `sequencing`: sequence numbers and pipeline counters
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: `TickSink` and `FeedTransport` interfaces
//!   - `services`: the enrichment pipeline
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `coinbase`: feed codec, session manager, reconnect policy
//!   - `persistence`: CSV sink
//!   - `config`: environment configuration
//!   - `health`, `metrics`, `telemetry`: observability
//!
//! # Data Flow
//!
//! ```text
//! Coinbase WS ──► SessionManager ──► TickerCodec ──► EnrichmentPipeline ──► CsvTickSink
//!                 (delivery task)                    (sequence + 2×EMA)     (append + flush)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Tick types and enrichment primitives with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::ema::{EmaError, EmaState};
pub use domain::sequencing::{PipelineStats, Sequencer, StatsSnapshot};
pub use domain::tick::{EnrichedTick, TickMessage};

// Ports and services
pub use application::ports::{FeedTransport, SinkError, TickSink, TransportError};
pub use application::services::{EnrichmentPipeline, PipelineConfig, PipelineError};

// Feed adapter
pub use infrastructure::coinbase::{
    DecodeError, ReconnectConfig, ReconnectPolicy, SessionConfig, SessionError, SessionManager,
    SessionSnapshot, SessionState, TickerCodec, TransportEvent,
};

// Persistence
pub use infrastructure::persistence::CsvTickSink;

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, FeedSettings, IngestConfig, PipelineSettings, ServerSettings, SinkSettings,
    WebSocketSettings,
};

// Health server
pub use infrastructure::health::{
    HealthReport, HealthServer, HealthServerError, HealthServerState, HealthStatus,
};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{
    CheckOutcome, TelemetryConfig, TelemetryError, TelemetryGuard, init as init_telemetry,
    record_check,
};
