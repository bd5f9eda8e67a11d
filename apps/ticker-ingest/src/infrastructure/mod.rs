//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the process-level plumbing.

/// Coinbase WebSocket feed adapter (codec, session, reconnect).
pub mod coinbase;

/// Durable tick sinks.
pub mod persistence;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Tracing subscriber, log files and verification checkpoints.
pub mod telemetry;
