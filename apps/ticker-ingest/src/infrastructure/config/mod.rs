//! Configuration Module
//!
//! Environment-driven configuration for the ingest service.

mod settings;

pub use settings::{
    ConfigError, FeedSettings, IngestConfig, PipelineSettings, ServerSettings, SinkSettings,
    WebSocketSettings,
};
