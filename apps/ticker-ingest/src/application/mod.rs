//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the enrichment pipeline and the port interfaces
//! that define how it reaches the sink and the feed transport.

/// Port interfaces for external systems (sink, transport).
pub mod ports;

/// Application services (enrichment pipeline).
pub mod services;
