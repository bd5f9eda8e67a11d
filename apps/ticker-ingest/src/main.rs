//! Ticker Ingest Binary
//!
//! Streams ticker events into the enriched CSV log until interrupted.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin ticker-ingest
//! ```
//!
//! # Environment Variables
//!
//! - `TICKER_PRODUCT_IDS`: Comma-separated series (default: BTC-USD)
//! - `TICKER_FEED_URL`: Feed endpoint (default: wss://ws-feed.exchange.coinbase.com)
//! - `TICKER_OUTPUT_PATH`: CSV output (default: `ticker_data.csv`)
//! - `TICKER_EMA_ALPHA`: Smoothing factor in (0, 1] (default: 0.2)
//! - `TICKER_LOG_EVERY`: Tick summary cadence (default: 25)
//! - `TICKER_HEALTH_PORT`: Health check HTTP port, 0 disables (default: 8083)
//! - `TICKER_STATS_INTERVAL_SECS`: Runtime statistics cadence (default: 30)
//! - `TICKER_LOG_FILE` / `TICKER_VERIFICATION_LOG`: Log files
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use futures_util::FutureExt;
use ticker_ingest::infrastructure::health::{HealthServer, HealthServerState};
use ticker_ingest::infrastructure::telemetry;
use ticker_ingest::{
    CheckOutcome, CsvTickSink, EnrichmentPipeline, IngestConfig, SessionConfig, SessionManager,
    init_metrics, record_check,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("failed to install rustls crypto provider"))?;

    let dotenv_path = load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting ticker ingest");
    if let Some(path) = &dotenv_path {
        tracing::debug!(path = %path.display(), "Loaded environment file");
    }

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus metrics unavailable");
    }

    let config = IngestConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let sink = CsvTickSink::open(&config.sink.output_path, config.sink.sync_on_append)
        .context("failed to open output sink")?;
    record_check(
        "Sink",
        CheckOutcome::Passed,
        &format!(
            "{} (resuming after sequence {})",
            config.sink.output_path.display(),
            sink.last_sequence()
        ),
    );

    let last_sequence = sink.last_sequence();
    let pipeline = EnrichmentPipeline::new(config.pipeline_config(), Arc::new(sink))
        .context("failed to build enrichment pipeline")?
        .resume_after(last_sequence);

    let session = Arc::new(SessionManager::new(
        SessionConfig::from_settings(&config.feed, &config.websocket),
        pipeline,
    ));

    let shutdown_token = CancellationToken::new();

    if config.server.health_port > 0 {
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION"),
            Arc::clone(&session),
        ));
        let health_server = HealthServer::bind(config.server.health_port, health_state)
            .await
            .context("failed to start health server")?;
        tokio::spawn(health_server.serve(shutdown_token.clone()).map(|result| {
            if let Err(e) = result {
                tracing::error!(error = %e, "Health server error");
            }
        }));
    }

    session.start().context("failed to start feed session")?;

    if !config.server.stats_interval.is_zero() {
        tokio::spawn(report_runtime_stats(
            Arc::clone(&session),
            config.server.stats_interval,
            shutdown_token.clone(),
        ));
    }

    tracing::info!("Ticker ingest ready");

    await_shutdown(shutdown_token).await;

    session.stop().await;

    tracing::info!("Ticker ingest stopped");
    Ok(())
}

/// Log runtime statistics every `interval` until cancelled.
async fn report_runtime_stats(
    session: Arc<SessionManager>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);

    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = ticker.tick() => session.log_runtime_stats(),
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &IngestConfig) {
    tracing::info!(
        url = %config.feed.url,
        products = ?config.feed.product_ids,
        output = %config.sink.output_path.display(),
        alpha = config.pipeline.ema_alpha,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        subscribe_grace_ms = config.feed.subscribe_grace.as_millis(),
        ping_interval_secs = config.websocket.ping_interval.as_secs(),
        idle_timeout_secs = config.websocket.idle_timeout.as_secs(),
        reconnect = config.websocket.reconnect_enabled,
        max_reconnect_attempts = config.websocket.max_reconnect_attempts,
        "WebSocket settings"
    );
}

/// Load the nearest `.env`, searching upward from the working directory.
///
/// Returns the file that was loaded, if any.
fn load_dotenv() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    let path = cwd
        .ancestors()
        .map(|dir| dir.join(".env"))
        .find(|candidate| candidate.is_file())?;
    dotenvy::from_path(&path).ok()?;
    Some(path)
}

/// Resolve once SIGINT or SIGTERM arrives, then cancel background tasks.
async fn await_shutdown(shutdown_token: CancellationToken) {
    let signal_name = wait_for_signal().await;
    tracing::info!(signal = signal_name, "Shutdown signal received");
    shutdown_token.cancel();
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use signal::unix::{SignalKind, signal as unix_signal};

    let mut sigterm = match unix_signal(SignalKind::terminate()) {
        Ok(stream) => Some(stream),
        Err(e) => {
            tracing::error!(error = %e, "SIGTERM handler unavailable");
            None
        }
    };
    let sigterm_recv = async {
        match sigterm.as_mut() {
            Some(stream) => stream.recv().await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        result = signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Ctrl+C handler failed");
            }
            "SIGINT"
        }
        _ = sigterm_recv => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    if let Err(e) = signal::ctrl_c().await {
        tracing::error!(error = %e, "Ctrl+C handler failed");
        std::future::pending::<()>().await;
    }
    "Ctrl+C"
}
