//! Health and Metrics Endpoint
//!
//! Small axum server exposing the feed session to probes and scrapers:
//!
//! | Route      | Response                                              |
//! |------------|-------------------------------------------------------|
//! | `/health`  | JSON status, 503 once the delivery task has stopped   |
//! | `/healthz` | `OK` while the process answers                        |
//! | `/readyz`  | `READY` only while ticks are streaming                |
//! | `/metrics` | Prometheus text exposition                            |

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::coinbase::{SessionManager, SessionSnapshot, SessionState};
use crate::infrastructure::metrics::get_metrics_handle;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// The listening socket could not be bound.
    #[error("failed to bind health server to {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The HTTP server stopped with an error.
    #[error("health server failed: {0}")]
    Serve(#[source] io::Error),
}

/// Coarse classification of the feed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Streaming ticks.
    Healthy,
    /// Delivery task alive but connecting, subscribing or backing off.
    Degraded,
    /// Delivery task gone.
    Unhealthy,
}

impl HealthStatus {
    /// Classify a session snapshot.
    #[must_use]
    pub const fn from_snapshot(snapshot: &SessionSnapshot) -> Self {
        match (snapshot.running, snapshot.state) {
            (true, SessionState::Streaming) => Self::Healthy,
            (true, _) => Self::Degraded,
            (false, _) => Self::Unhealthy,
        }
    }

    const fn http_status(self) -> StatusCode {
        match self {
            Self::Healthy | Self::Degraded => StatusCode::OK,
            Self::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Session classification.
    pub status: HealthStatus,
    /// Crate version.
    pub version: String,
    /// Seconds since the server state was created.
    pub uptime_secs: u64,
    /// Wall-clock time of the report.
    pub current_time: DateTime<Utc>,
    /// Session state and counters.
    pub session: SessionSnapshot,
}

/// State shared by the route handlers.
#[derive(Debug)]
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    session: Arc<SessionManager>,
}

impl HealthServerState {
    /// Wrap a session for reporting.
    #[must_use]
    pub fn new(version: impl Into<String>, session: Arc<SessionManager>) -> Self {
        Self {
            version: version.into(),
            started_at: Instant::now(),
            session,
        }
    }

    /// Build the current health report.
    #[must_use]
    pub fn report(&self) -> HealthReport {
        let session = self.session.snapshot();
        HealthReport {
            status: HealthStatus::from_snapshot(&session),
            version: self.version.clone(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            current_time: Utc::now(),
            session,
        }
    }
}

/// A bound health server, ready to serve.
#[derive(Debug)]
pub struct HealthServer {
    listener: TcpListener,
    state: Arc<HealthServerState>,
}

impl HealthServer {
    /// Bind the listener on all interfaces.
    ///
    /// Port 0 picks an ephemeral port; see [`HealthServer::local_addr`].
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError::Bind` if the port is unavailable.
    pub async fn bind(port: u16, state: Arc<HealthServerState>) -> Result<Self, HealthServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| HealthServerError::Bind { addr, source })?;
        Ok(Self { listener, state })
    }

    /// Address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns the socket error if the address cannot be read.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve requests until `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError::Serve` if the server fails.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), HealthServerError> {
        if let Ok(addr) = self.listener.local_addr() {
            tracing::info!(%addr, "Health server listening");
        }

        axum::serve(self.listener, router(self.state))
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            .map_err(HealthServerError::Serve)?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Routes for the health server.
#[must_use]
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/healthz", get(|| async { "OK" }))
        .route("/readyz", get(readiness))
        .route("/metrics", get(prometheus))
        .with_state(state)
}

async fn health(State(state): State<Arc<HealthServerState>>) -> Response {
    let report = state.report();
    (report.status.http_status(), Json(report)).into_response()
}

async fn readiness(State(state): State<Arc<HealthServerState>>) -> Response {
    match state.session.state() {
        SessionState::Streaming => (StatusCode::OK, "READY").into_response(),
        other => (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("NOT READY ({other})"),
        )
            .into_response(),
    }
}

async fn prometheus() -> Response {
    let Some(handle) = get_metrics_handle() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response();
    };
    ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], handle.render()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::MockTickSink;
    use crate::application::services::{EnrichmentPipeline, PipelineConfig};
    use crate::domain::sequencing::StatsSnapshot;
    use crate::infrastructure::coinbase::{ReconnectConfig, SessionConfig};
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use test_case::test_case;
    use tower::ServiceExt;

    fn snapshot(running: bool, state: SessionState) -> SessionSnapshot {
        SessionSnapshot {
            state,
            connected: state == SessionState::Streaming,
            running,
            messages_received: 0,
            parse_errors: 0,
            reconnects: 0,
            records_written: 0,
            pipeline: StatsSnapshot::default(),
        }
    }

    fn idle_state() -> Arc<HealthServerState> {
        let mut sink = MockTickSink::new();
        sink.expect_records_written().return_const(0_u64);
        let pipeline = EnrichmentPipeline::new(PipelineConfig::default(), Arc::new(sink)).unwrap();
        let session = SessionManager::new(
            SessionConfig {
                url: "ws://127.0.0.1:1".to_string(),
                product_ids: vec!["BTC-USD".to_string()],
                subscribe_grace: Duration::ZERO,
                ping_interval: Duration::ZERO,
                idle_timeout: Duration::ZERO,
                reconnect: ReconnectConfig::disabled(),
            },
            pipeline,
        );
        Arc::new(HealthServerState::new("0.1.0", Arc::new(session)))
    }

    async fn get_path(path: &str) -> Response {
        router(idle_state())
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[test_case(true, SessionState::Streaming, HealthStatus::Healthy ; "streaming")]
    #[test_case(true, SessionState::Connecting, HealthStatus::Degraded ; "connecting")]
    #[test_case(true, SessionState::Subscribing, HealthStatus::Degraded ; "subscribing")]
    #[test_case(false, SessionState::Disconnected, HealthStatus::Unhealthy ; "stopped")]
    fn classifies_session(running: bool, state: SessionState, expected: HealthStatus) {
        assert_eq!(HealthStatus::from_snapshot(&snapshot(running, state)), expected);
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
    }

    #[tokio::test]
    async fn liveness_answers_ok() {
        assert_eq!(get_path("/healthz").await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn readiness_requires_streaming() {
        let response = get_path("/readyz").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"NOT READY (disconnected)");
    }

    #[tokio::test]
    async fn health_reports_session_counters() {
        let response = get_path("/health").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "unhealthy");
        assert_eq!(json["version"], "0.1.0");
        assert_eq!(json["session"]["state"], "disconnected");
        assert_eq!(json["session"]["running"], false);
        assert_eq!(json["session"]["pipeline"]["total_processed"], 0);
    }

    #[tokio::test]
    async fn binds_ephemeral_port_and_shuts_down() {
        let server = HealthServer::bind(0, idle_state()).await.unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(server.serve(shutdown.clone()));
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
