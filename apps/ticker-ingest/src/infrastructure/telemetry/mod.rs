//! Logging and Tracing Setup
//!
//! Installs the `tracing` subscriber used by every component:
//!
//! - stdout fmt layer
//! - application log file (`TICKER_LOG_FILE`)
//! - verification log (`TICKER_VERIFICATION_LOG`), which only receives
//!   checkpoints emitted through [`record_check`]
//! - optional OpenTelemetry OTLP export
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Filter directives (default: `ticker_ingest=info`)
//! - `TICKER_LOG_FILE`: Application log file (default: `ticker_ingest.log`, empty disables)
//! - `TICKER_VERIFICATION_LOG`: Verification log (default: `verification.log`, empty disables)
//! - `OTEL_ENABLED`: Set to "true" to export spans (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: http://localhost:4317)
//! - `OTEL_SERVICE_NAME`: Service name for traces (default: ticker-ingest)

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::filter::{Directive, filter_fn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Target carrying verification checkpoints.
pub const VERIFICATION_TARGET: &str = "ticker_ingest::verification";

const DEFAULT_SERVICE_NAME: &str = "ticker-ingest";
const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317";
const DEFAULT_LOG_FILE: &str = "ticker_ingest.log";
const DEFAULT_VERIFICATION_LOG: &str = "verification.log";
const DEFAULT_FILTER: &str = "ticker_ingest=info,tower_http=info,hyper=warn,tungstenite=warn";

// =============================================================================
// Verification Checkpoints
// =============================================================================

/// Outcome of a verification checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Expected behaviour observed.
    Passed,
    /// Expected behaviour not observed.
    Failed,
    /// Degraded but tolerated.
    Warning,
    /// Informational milestone.
    Info,
}

impl CheckOutcome {
    /// Label written to the log.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "PASS",
            Self::Failed => "FAIL",
            Self::Warning => "WARN",
            Self::Info => "INFO",
        }
    }
}

/// Emit a verification checkpoint on [`VERIFICATION_TARGET`].
pub fn record_check(check: &str, outcome: CheckOutcome, details: &str) {
    let label = outcome.as_str();
    match outcome {
        CheckOutcome::Failed => {
            tracing::error!(target: VERIFICATION_TARGET, check, outcome = label, details, "verification check");
        }
        CheckOutcome::Warning => {
            tracing::warn!(target: VERIFICATION_TARGET, check, outcome = label, details, "verification check");
        }
        CheckOutcome::Passed | CheckOutcome::Info => {
            tracing::info!(target: VERIFICATION_TARGET, check, outcome = label, details, "verification check");
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Telemetry configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Application log file.
    pub log_file: Option<PathBuf>,
    /// Verification log file.
    pub verification_log: Option<PathBuf>,
    /// Whether OpenTelemetry export is enabled.
    pub otel_enabled: bool,
    /// OTLP exporter endpoint.
    pub otlp_endpoint: String,
    /// Service name for traces.
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_file: Some(PathBuf::from(DEFAULT_LOG_FILE)),
            verification_log: Some(PathBuf::from(DEFAULT_VERIFICATION_LOG)),
            otel_enabled: false,
            otlp_endpoint: DEFAULT_OTLP_ENDPOINT.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let file_setting = |key: &str, default: Option<PathBuf>| match lookup(key) {
            Some(v) if v.trim().is_empty() => None,
            Some(v) => Some(PathBuf::from(v)),
            None => default,
        };

        Self {
            log_file: file_setting("TICKER_LOG_FILE", defaults.log_file),
            verification_log: file_setting("TICKER_VERIFICATION_LOG", defaults.verification_log),
            otel_enabled: lookup("OTEL_ENABLED").is_some_and(|v| v.eq_ignore_ascii_case("true")),
            otlp_endpoint: lookup("OTEL_EXPORTER_OTLP_ENDPOINT").unwrap_or(defaults.otlp_endpoint),
            service_name: lookup("OTEL_SERVICE_NAME").unwrap_or(defaults.service_name),
        }
    }
}

// =============================================================================
// Initialization
// =============================================================================

/// Telemetry initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// A log file could not be opened.
    #[error("failed to open log file {path}: {source}")]
    LogFile {
        /// Offending path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A filter directive failed to parse.
    #[error("invalid filter directive: {0}")]
    Directive(#[from] tracing_subscriber::filter::ParseError),

    /// The OTLP exporter could not be built.
    #[error("failed to build OTLP exporter: {0}")]
    Exporter(String),

    /// A global subscriber is already installed.
    #[error("failed to install subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Guard that shuts down OpenTelemetry when dropped.
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
}

impl std::fmt::Debug for TelemetryGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryGuard")
            .field("otel", &self.tracer_provider.is_some())
            .finish()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("Failed to shutdown OpenTelemetry tracer provider: {e}");
        }
    }
}

/// Initialize telemetry from the environment.
///
/// # Errors
///
/// See [`init_with_config`].
pub fn init() -> Result<TelemetryGuard, TelemetryError> {
    init_with_config(&TelemetryConfig::from_env())
}

/// Initialize telemetry with an explicit configuration.
///
/// The returned guard must be kept alive for the duration of the program.
///
/// # Errors
///
/// Returns `TelemetryError` if a log file cannot be opened, the OTLP exporter
/// cannot be built, or a global subscriber is already set.
pub fn init_with_config(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
        .add_directive(format!("{VERIFICATION_TARGET}=info").parse::<Directive>()?);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let file_layer = config
        .log_file
        .as_deref()
        .map(open_log_file)
        .transpose()?
        .map(|file| {
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(file)
        });

    let verification_layer = config
        .verification_log
        .as_deref()
        .map(open_log_file)
        .transpose()?
        .map(|file| {
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(file)
                .with_filter(filter_fn(|meta| meta.target() == VERIFICATION_TARGET))
        });

    let tracer_provider = if config.otel_enabled {
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(&config.otlp_endpoint)
            .build()
            .map_err(|e| TelemetryError::Exporter(e.to_string()))?;

        Some(
            SdkTracerProvider::builder()
                .with_batch_exporter(exporter)
                .with_resource(
                    opentelemetry_sdk::Resource::builder()
                        .with_service_name(config.service_name.clone())
                        .build(),
                )
                .build(),
        )
    } else {
        None
    };

    let otel_layer = tracer_provider.as_ref().map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer(config.service_name.clone()))
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .with(verification_layer)
        .with(otel_layer)
        .try_init()?;

    Ok(TelemetryGuard { tracer_provider })
}

fn open_log_file(path: &Path) -> Result<Arc<File>, TelemetryError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map(Arc::new)
        .map_err(|source| TelemetryError::LogFile {
            path: path.display().to_string(),
            source,
        })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> TelemetryConfig {
        let vars: HashMap<&str, &str> = pairs.iter().copied().collect();
        TelemetryConfig::from_lookup(|key| vars.get(key).map(|v| (*v).to_string()))
    }

    #[test]
    fn default_config() {
        let config = config_from(&[]);
        assert_eq!(config, TelemetryConfig::default());
        assert!(!config.otel_enabled);
        assert_eq!(config.log_file, Some(PathBuf::from("ticker_ingest.log")));
        assert_eq!(config.verification_log, Some(PathBuf::from("verification.log")));
        assert_eq!(config.service_name, "ticker-ingest");
    }

    #[test]
    fn empty_paths_disable_files() {
        let config = config_from(&[("TICKER_LOG_FILE", ""), ("TICKER_VERIFICATION_LOG", " ")]);
        assert!(config.log_file.is_none());
        assert!(config.verification_log.is_none());
    }

    #[test]
    fn otel_enabled_flag() {
        assert!(config_from(&[("OTEL_ENABLED", "TRUE")]).otel_enabled);
        assert!(!config_from(&[("OTEL_ENABLED", "yes please")]).otel_enabled);
    }

    #[test]
    fn check_outcome_labels() {
        assert_eq!(CheckOutcome::Passed.as_str(), "PASS");
        assert_eq!(CheckOutcome::Failed.as_str(), "FAIL");
        assert_eq!(CheckOutcome::Warning.as_str(), "WARN");
        assert_eq!(CheckOutcome::Info.as_str(), "INFO");
    }

    #[test]
    fn unwritable_log_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no-such-dir").join("app.log");
        let err = open_log_file(&missing).unwrap_err();
        assert!(matches!(err, TelemetryError::LogFile { .. }));
    }
}
