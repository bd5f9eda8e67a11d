//! Application Services
//!
//! - `EnrichmentPipeline`: sequences, smooths and persists decoded ticks

mod pipeline;

pub use pipeline::{EnrichmentPipeline, PipelineConfig, PipelineError};
