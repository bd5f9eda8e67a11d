//! Ingest Configuration Settings
//!
//! Configuration types for the ingest service, loaded from environment variables.
//! Optional numeric settings fall back to their defaults when unparseable;
//! the product list and the EMA smoothing factor are validated.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::application::services::PipelineConfig;
use crate::domain::ema::EmaState;
use crate::infrastructure::coinbase::messages::COINBASE_FEED_URL;

/// Feed endpoint and subscription settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSettings {
    /// WebSocket endpoint.
    pub url: String,
    /// Series subscribed on every connection.
    pub product_ids: Vec<String>,
    /// Delay between the connection opening and the subscribe request.
    pub subscribe_grace: Duration,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            url: COINBASE_FEED_URL.to_string(),
            product_ids: vec!["BTC-USD".to_string()],
            subscribe_grace: Duration::from_millis(1000),
        }
    }
}

/// WebSocket keep-alive and reconnection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct WebSocketSettings {
    /// Keep-alive ping interval.
    pub ping_interval: Duration,
    /// Silence after which the connection is considered dead.
    pub idle_timeout: Duration,
    /// Reconnect automatically after a drop.
    pub reconnect_enabled: bool,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(20),
            idle_timeout: Duration::from_secs(60),
            reconnect_enabled: true,
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 0,
        }
    }
}

/// Enrichment settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineSettings {
    /// EMA smoothing factor.
    pub ema_alpha: f64,
    /// Tick summary cadence (0 = never).
    pub log_every: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            ema_alpha: EmaState::DEFAULT_ALPHA,
            log_every: 25,
        }
    }
}

/// CSV sink settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkSettings {
    /// Output file, appended to if it exists.
    pub output_path: PathBuf,
    /// `fsync` data after every append.
    pub sync_on_append: bool,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from("ticker_data.csv"),
            sync_on_append: false,
        }
    }
}

/// HTTP server and reporting settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health check HTTP port (0 = disabled).
    pub health_port: u16,
    /// Interval between runtime statistics lines.
    pub stats_interval: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            health_port: 8083,
            stats_interval: Duration::from_secs(30),
        }
    }
}

/// Complete ingest configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestConfig {
    /// Feed settings.
    pub feed: FeedSettings,
    /// WebSocket settings.
    pub websocket: WebSocketSettings,
    /// Enrichment settings.
    pub pipeline: PipelineSettings,
    /// Sink settings.
    pub sink: SinkSettings,
    /// Server settings.
    pub server: ServerSettings,
}

impl IngestConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the product list is empty or the EMA alpha is not a number.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the product list is empty or the EMA alpha is not a number.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let product_ids = match lookup("TICKER_PRODUCT_IDS") {
            Some(raw) => parse_product_ids(&raw)
                .ok_or_else(|| ConfigError::EmptyValue("TICKER_PRODUCT_IDS".to_string()))?,
            None => defaults.feed.product_ids,
        };

        let feed = FeedSettings {
            url: lookup("TICKER_FEED_URL")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.feed.url),
            product_ids,
            subscribe_grace: parse_duration_millis(
                &lookup,
                "TICKER_SUBSCRIBE_GRACE_MS",
                defaults.feed.subscribe_grace,
            ),
        };

        let websocket = WebSocketSettings {
            ping_interval: parse_duration_secs(
                &lookup,
                "TICKER_PING_INTERVAL_SECS",
                defaults.websocket.ping_interval,
            ),
            idle_timeout: parse_duration_secs(
                &lookup,
                "TICKER_IDLE_TIMEOUT_SECS",
                defaults.websocket.idle_timeout,
            ),
            reconnect_enabled: parse_bool(
                &lookup,
                "TICKER_RECONNECT_ENABLED",
                defaults.websocket.reconnect_enabled,
            ),
            reconnect_delay_initial: parse_duration_millis(
                &lookup,
                "TICKER_RECONNECT_DELAY_INITIAL_MS",
                defaults.websocket.reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_duration_secs(
                &lookup,
                "TICKER_RECONNECT_DELAY_MAX_SECS",
                defaults.websocket.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: parse_or(
                &lookup,
                "TICKER_RECONNECT_DELAY_MULTIPLIER",
                defaults.websocket.reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: parse_or(
                &lookup,
                "TICKER_MAX_RECONNECT_ATTEMPTS",
                defaults.websocket.max_reconnect_attempts,
            ),
        };

        let ema_alpha = match lookup("TICKER_EMA_ALPHA") {
            Some(raw) => raw
                .trim()
                .parse::<f64>()
                .map_err(|_| ConfigError::InvalidValue {
                    key: "TICKER_EMA_ALPHA".to_string(),
                    value: raw.clone(),
                })?,
            None => defaults.pipeline.ema_alpha,
        };

        let pipeline = PipelineSettings {
            ema_alpha,
            log_every: parse_or(&lookup, "TICKER_LOG_EVERY", defaults.pipeline.log_every),
        };

        let sink = SinkSettings {
            output_path: lookup("TICKER_OUTPUT_PATH")
                .filter(|v| !v.trim().is_empty())
                .map_or(defaults.sink.output_path, PathBuf::from),
            sync_on_append: parse_bool(
                &lookup,
                "TICKER_SYNC_ON_APPEND",
                defaults.sink.sync_on_append,
            ),
        };

        let server = ServerSettings {
            health_port: parse_or(&lookup, "TICKER_HEALTH_PORT", defaults.server.health_port),
            stats_interval: parse_duration_secs(
                &lookup,
                "TICKER_STATS_INTERVAL_SECS",
                defaults.server.stats_interval,
            ),
        };

        Ok(Self {
            feed,
            websocket,
            pipeline,
            sink,
            server,
        })
    }

    /// Enrichment pipeline settings.
    #[must_use]
    pub const fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            alpha: self.pipeline.ema_alpha,
            log_every: self.pipeline.log_every,
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),

    /// Environment variable could not be parsed.
    #[error("environment variable {key} has invalid value `{value}`")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
    },
}

/// Split a comma-separated product list, dropping blanks and duplicates.
fn parse_product_ids(raw: &str) -> Option<Vec<String>> {
    let mut ids: Vec<String> = Vec::new();
    for id in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !ids.iter().any(|existing| existing == id) {
            ids.push(id.to_string());
        }
    }
    (!ids.is_empty()).then_some(ids)
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_bool<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|v| v.trim().to_lowercase()).as_deref() {
        Some("true" | "1" | "yes" | "on") => true,
        Some("false" | "0" | "no" | "off") => false,
        _ => default,
    }
}

fn parse_duration_secs<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_duration_millis<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
