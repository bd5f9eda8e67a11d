//! Feed Session Manager
//!
//! Owns the WebSocket connection to the ticker feed and drives the
//! enrichment pipeline from inbound transport events.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected --start()--> Connecting --Open--> Subscribing --subscribe sent--> Streaming
//!      ^                                                                            |
//!      +------------------------------ Close / Error / idle -------------------------+
//! ```
//!
//! After a drop the session reconnects with exponential backoff and
//! re-subscribes. `stop()` is valid from any state: it cancels the delivery
//! task, waits for it to finish and leaves the session `Disconnected`.
//!
//! Decode, enrichment and the sink append run synchronously on the delivery
//! task, so a slow sink back-pressures the socket read.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{Sink, SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::codec::{DecodeError, TickerCodec};
use super::messages::{SubscriptionRequest, is_subscription_ack};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{FeedTransport, TickSink, TransportError};
use crate::application::services::EnrichmentPipeline;
use crate::domain::sequencing::{PipelineStats, StatsSnapshot};
use crate::domain::tick::TickMessage;
use crate::infrastructure::config::{FeedSettings, WebSocketSettings};
use crate::infrastructure::metrics;
use crate::infrastructure::telemetry::{CheckOutcome, record_check};

/// Raw frames logged verbatim after startup.
const RAW_MESSAGES_LOGGED: u64 = 3;
/// Receive progress is logged every this many frames.
const RECEIVE_PROGRESS_EVERY: u64 = 25;
/// A verification warning is emitted every this many parse errors.
const PARSE_ERROR_WARN_EVERY: u64 = 10;
/// Rejected payloads logged at debug level.
const BAD_PAYLOADS_LOGGED: u64 = 3;
/// Payload excerpt length in logs.
const PAYLOAD_EXCERPT_LEN: usize = 200;
/// Upper bound on the close handshake during shutdown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end a feed connection.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// The server closed the connection.
    #[error("connection closed by server (code {code:?}): {reason}")]
    ClosedByServer {
        /// Close code, if one was sent.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },

    /// Nothing was received for too long.
    #[error("no frame received for {0:?}")]
    IdleTimeout(Duration),

    /// The stream ended without a close frame.
    #[error("connection closed")]
    ConnectionClosed,

    /// `start()` was called while the delivery task is running.
    #[error("session already running")]
    AlreadyRunning,
}

impl SessionError {
    /// HTTP status of a failed upgrade, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::WebSocket(WsError::Http(response)) => {
                Some(response.status().as_u16())
            }
            _ => None,
        }
    }
}

// =============================================================================
// Session State & Events
// =============================================================================

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum SessionState {
    /// No connection.
    Disconnected = 0,
    /// Connection attempt in progress.
    Connecting = 1,
    /// Connected, subscription pending.
    Subscribing = 2,
    /// Subscription sent, ticks flowing.
    Streaming = 3,
    /// `stop()` in progress.
    Closing = 4,
}

impl SessionState {
    /// Lowercase state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Subscribing => "subscribing",
            Self::Streaming => "streaming",
            Self::Closing => "closing",
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Subscribing,
            3 => Self::Streaming,
            4 => Self::Closing,
            _ => Self::Disconnected,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inbound transport event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Connection established.
    Open,
    /// Text payload.
    Message(String),
    /// Connection closed.
    Close {
        /// Close code, if one was sent.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },
    /// Transport failure.
    Error {
        /// HTTP status of a failed upgrade, if any.
        status: Option<u16>,
        /// Failure description.
        reason: String,
    },
    /// Ping received.
    Ping,
    /// Pong received.
    Pong,
}

// =============================================================================
// Configuration
// =============================================================================

/// Session settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket endpoint.
    pub url: String,
    /// Series subscribed on every connection.
    pub product_ids: Vec<String>,
    /// Delay between Open and the subscribe request.
    pub subscribe_grace: Duration,
    /// Keep-alive ping interval (zero disables pings).
    pub ping_interval: Duration,
    /// Inbound silence treated as a dead connection (zero disables the check).
    pub idle_timeout: Duration,
    /// Reconnection backoff.
    pub reconnect: ReconnectConfig,
}

impl SessionConfig {
    /// Build from the feed and WebSocket settings blocks.
    #[must_use]
    pub fn from_settings(feed: &FeedSettings, websocket: &WebSocketSettings) -> Self {
        Self {
            url: feed.url.clone(),
            product_ids: feed.product_ids.clone(),
            subscribe_grace: feed.subscribe_grace,
            ping_interval: websocket.ping_interval,
            idle_timeout: websocket.idle_timeout,
            reconnect: ReconnectConfig::from_websocket_settings(websocket),
        }
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Point-in-time view of the session, served by the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    /// Lifecycle state.
    pub state: SessionState,
    /// Connection is open.
    pub connected: bool,
    /// Delivery task is alive.
    pub running: bool,
    /// Frames received.
    pub messages_received: u64,
    /// Frames rejected by the decoder.
    pub parse_errors: u64,
    /// Reconnection attempts.
    pub reconnects: u64,
    /// Rows the sink has written.
    pub records_written: u64,
    /// Pipeline counters.
    pub pipeline: StatsSnapshot,
}

// =============================================================================
// WebSocket Transport
// =============================================================================

type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Outbound half of a live WebSocket connection.
struct WsTransport<S = WsWriter> {
    write: S,
    close_timeout: Duration,
}

impl<S> WsTransport<S>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    const fn new(write: S) -> Self {
        Self {
            write,
            close_timeout: CLOSE_TIMEOUT,
        }
    }

    async fn ping(&mut self) -> Result<(), SessionError> {
        self.write.send(Message::Ping(Vec::new().into())).await?;
        Ok(())
    }

    async fn send_frame(&mut self, frame: Message) -> Result<(), SessionError> {
        self.write.send(frame).await?;
        Ok(())
    }

    /// Send a close frame and shut the writer, giving up after `close_timeout`.
    async fn close(&mut self) {
        let write = &mut self.write;
        let handshake = async move {
            if let Err(e) = write.send(Message::Close(None)).await {
                tracing::debug!(error = %e, "Close frame not sent");
            }
            let _ = write.close().await;
        };

        if tokio::time::timeout(self.close_timeout, handshake).await.is_err() {
            tracing::warn!(
                timeout_ms = self.close_timeout.as_millis(),
                "Close handshake timed out, dropping connection"
            );
        }
    }
}

#[async_trait]
impl<S> FeedTransport for WsTransport<S>
where
    S: Sink<Message, Error = WsError> + Unpin + Send,
{
    async fn send_text(&mut self, text: String) -> Result<usize, TransportError> {
        let len = text.len();
        self.write
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| match e {
                WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::Closed,
                other => TransportError::SendFailed(other.to_string()),
            })?;
        Ok(len)
    }
}

// =============================================================================
// Session Manager
// =============================================================================

struct RunHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Feed session driving an [`EnrichmentPipeline`].
pub struct SessionManager {
    config: SessionConfig,
    codec: TickerCodec,
    pipeline: Mutex<EnrichmentPipeline>,
    pipeline_stats: Arc<PipelineStats>,
    sink: Arc<dyn TickSink>,
    state: AtomicU8,
    connected: AtomicBool,
    messages_received: AtomicU64,
    parse_errors: AtomicU64,
    reconnects: AtomicU64,
    started_at: Mutex<Option<Instant>>,
    control: Mutex<Option<RunHandle>>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("url", &self.config.url)
            .field("product_ids", &self.config.product_ids)
            .field("state", &self.state())
            .field("messages_received", &self.messages_received())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Create a session that feeds `pipeline`.
    #[must_use]
    pub fn new(config: SessionConfig, pipeline: EnrichmentPipeline) -> Self {
        let pipeline_stats = pipeline.stats();
        let sink = pipeline.sink();
        Self {
            config,
            codec: TickerCodec::new(),
            pipeline: Mutex::new(pipeline),
            pipeline_stats,
            sink,
            state: AtomicU8::new(SessionState::Disconnected as u8),
            connected: AtomicBool::new(false),
            messages_received: AtomicU64::new(0),
            parse_errors: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            started_at: Mutex::new(None),
            control: Mutex::new(None),
        }
    }

    // -------------------------------------------------------------------------
    // Control
    // -------------------------------------------------------------------------

    /// Spawn the delivery task. Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::AlreadyRunning` if the delivery task is alive.
    pub fn start(self: &Arc<Self>) -> Result<(), SessionError> {
        let mut control = self.control.lock();
        if control.as_ref().is_some_and(|h| !h.task.is_finished()) {
            return Err(SessionError::AlreadyRunning);
        }

        self.set_state(SessionState::Connecting);
        *self.started_at.lock() = Some(Instant::now());

        let cancel = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(self).run(cancel.clone()));
        *control = Some(RunHandle { cancel, task });
        drop(control);

        tracing::info!(
            url = %self.config.url,
            products = ?self.config.product_ids,
            "Feed session started"
        );
        Ok(())
    }

    /// Stop the session and wait for the delivery task to finish.
    ///
    /// No sink write happens after this returns. The sink is flushed and
    /// final statistics are logged.
    pub async fn stop(&self) {
        let handle = self.control.lock().take();

        if let Some(RunHandle { cancel, task }) = handle {
            self.set_state(SessionState::Closing);
            cancel.cancel();
            if let Err(e) = task.await
                && e.is_panic()
            {
                tracing::error!(error = %e, "Delivery task panicked");
            }
        }

        self.mark_disconnected();

        if let Err(e) = self.sink.flush() {
            tracing::error!(error = %e, "Failed to flush sink on stop");
        }

        self.log_final_stats();
    }

    // -------------------------------------------------------------------------
    // Status
    // -------------------------------------------------------------------------

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the feed connection is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Whether the delivery task is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.control
            .lock()
            .as_ref()
            .is_some_and(|h| !h.task.is_finished())
    }

    /// Frames received since construction.
    #[must_use]
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// Frames the decoder rejected.
    #[must_use]
    pub fn parse_errors(&self) -> u64 {
        self.parse_errors.load(Ordering::Relaxed)
    }

    /// Reconnection attempts made.
    #[must_use]
    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// Pipeline counters.
    #[must_use]
    pub fn pipeline_stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.pipeline_stats)
    }

    /// Current `(price_ema, mid_price_ema)` of a series.
    #[must_use]
    pub fn series_emas(&self, series_id: &str) -> Option<(f64, f64)> {
        self.pipeline.lock().series_emas(series_id)
    }

    /// Point-in-time snapshot of every counter.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state(),
            connected: self.is_connected(),
            running: self.is_running(),
            messages_received: self.messages_received(),
            parse_errors: self.parse_errors(),
            reconnects: self.reconnects(),
            records_written: self.sink.records_written(),
            pipeline: self.pipeline_stats.snapshot(),
        }
    }

    /// Log the periodic runtime statistics line.
    pub fn log_runtime_stats(&self) {
        let snapshot = self.snapshot();
        let started_at = *self.started_at.lock();
        let runtime_mins = started_at.map_or(0, |t| t.elapsed().as_secs() / 60);

        tracing::info!(
            runtime_mins,
            state = %snapshot.state,
            messages_received = snapshot.messages_received,
            processed = snapshot.pipeline.total_processed,
            ema_updates = snapshot.pipeline.enrichment_count,
            parse_errors = snapshot.parse_errors,
            sink_errors = snapshot.pipeline.sink_errors,
            "Runtime statistics"
        );
    }

    fn log_final_stats(&self) {
        let snapshot = self.snapshot();
        let efficiency = snapshot.pipeline.ema_efficiency();

        tracing::info!(
            messages_received = snapshot.messages_received,
            parse_errors = snapshot.parse_errors,
            processed = snapshot.pipeline.total_processed,
            ema_updates = snapshot.pipeline.enrichment_count,
            records_written = snapshot.records_written,
            last_sequence = snapshot.pipeline.last_sequence,
            reconnects = snapshot.reconnects,
            ema_efficiency_pct = format_args!("{efficiency:.1}"),
            "Final statistics"
        );
        record_check(
            "Final statistics",
            CheckOutcome::Info,
            &format!(
                "received={} processed={} parse_errors={} records={} last_seq={} ema_efficiency={efficiency:.1}%",
                snapshot.messages_received,
                snapshot.pipeline.total_processed,
                snapshot.parse_errors,
                snapshot.records_written,
                snapshot.pipeline.last_sequence,
            ),
        );
    }

    // -------------------------------------------------------------------------
    // Event Handling
    // -------------------------------------------------------------------------

    /// Apply one transport event.
    ///
    /// `transport` is only written to on `Open`, to send the subscription.
    pub async fn handle_event<T>(&self, event: TransportEvent, transport: &mut T)
    where
        T: FeedTransport + ?Sized,
    {
        match event {
            TransportEvent::Open => self.on_open(transport).await,
            TransportEvent::Message(text) => self.on_message(&text),
            TransportEvent::Close { code, reason } => {
                tracing::warn!(code = ?code, reason = %reason, "Feed connection closed");
                record_check(
                    "Connection close",
                    CheckOutcome::Info,
                    &format!("code={code:?} reason={reason}"),
                );
                self.mark_disconnected();
            }
            TransportEvent::Error { status, reason } => {
                tracing::error!(status = ?status, reason = %reason, "Feed connection error");
                record_check(
                    "Connection error",
                    CheckOutcome::Failed,
                    &format!("status={status:?} reason={reason}"),
                );
                self.mark_disconnected();
            }
            TransportEvent::Ping => tracing::trace!("Ping received"),
            TransportEvent::Pong => tracing::trace!("Pong received"),
        }
    }

    async fn on_open<T>(&self, transport: &mut T)
    where
        T: FeedTransport + ?Sized,
    {
        self.connected.store(true, Ordering::Release);
        self.set_state(SessionState::Subscribing);
        metrics::set_feed_connected(true);
        tracing::info!(url = %self.config.url, "Feed connection opened");
        record_check("Connection open", CheckOutcome::Passed, &self.config.url);

        if !self.config.subscribe_grace.is_zero() {
            tokio::time::sleep(self.config.subscribe_grace).await;
        }

        let request = SubscriptionRequest::ticker(self.config.product_ids.clone());
        let payload = match request.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize subscription");
                return;
            }
        };

        match transport.send_text(payload).await {
            Ok(bytes) => {
                self.set_state(SessionState::Streaming);
                tracing::info!(
                    products = ?self.config.product_ids,
                    bytes,
                    "Subscription sent"
                );
                record_check(
                    "Subscription",
                    CheckOutcome::Passed,
                    &format!("{} product(s), {bytes} bytes", self.config.product_ids.len()),
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to send subscription");
                record_check("Subscription", CheckOutcome::Failed, &e.to_string());
            }
        }
    }

    fn on_message(&self, text: &str) {
        self.note_received(text);

        if is_subscription_ack(text) {
            tracing::info!("Subscription confirmed");
            record_check("Subscription confirmation", CheckOutcome::Passed, "ack received");
            return;
        }

        match self.codec.decode(text) {
            Ok(tick) => self.process_tick(tick),
            Err(e) => self.reject(&e, text),
        }
    }

    /// Binary frames must carry UTF-8 JSON; anything else is malformed.
    fn on_binary(&self, data: &[u8]) {
        match std::str::from_utf8(data) {
            Ok(text) => self.on_message(text),
            Err(e) => {
                let placeholder = format!("<{} byte binary frame>", data.len());
                self.note_received(&placeholder);
                self.reject(
                    &DecodeError::MalformedPayload(format!("binary frame is not UTF-8: {e}")),
                    &placeholder,
                );
            }
        }
    }

    fn note_received(&self, payload: &str) {
        let received = self.messages_received.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::record_message_received();

        if received <= RAW_MESSAGES_LOGGED {
            tracing::info!(
                n = received,
                payload = %excerpt(payload),
                "Raw feed message"
            );
        }
        if received % RECEIVE_PROGRESS_EVERY == 0 {
            tracing::info!(
                received,
                parse_errors = self.parse_errors(),
                "Feed progress"
            );
            record_check(
                "Message reception",
                CheckOutcome::Info,
                &format!("{received} messages received"),
            );
        }
    }

    fn reject(&self, error: &DecodeError, payload: &str) {
        let errors = self.parse_errors.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::record_parse_error(error.kind());

        if errors <= BAD_PAYLOADS_LOGGED {
            tracing::debug!(error = %error, payload = %excerpt(payload), "Rejected feed message");
        }
        if errors % PARSE_ERROR_WARN_EVERY == 0 {
            tracing::warn!(parse_errors = errors, "Parse errors accumulating");
            record_check(
                "Message parsing",
                CheckOutcome::Warning,
                &format!("{errors} parse errors"),
            );
        }
    }

    fn process_tick(&self, tick: TickMessage) {
        let started = Instant::now();
        let result = self.pipeline.lock().process(tick);

        match result {
            Ok(enriched) => {
                metrics::record_tick_processed(
                    &enriched.series_id,
                    enriched.sequence_number,
                    started.elapsed(),
                    self.sink.records_written(),
                );
                if enriched.sequence_number == 1 {
                    record_check(
                        "Tick processing",
                        CheckOutcome::Passed,
                        &format!("first tick persisted for {}", enriched.series_id),
                    );
                }
            }
            Err(e) => {
                metrics::record_sink_error();
                tracing::error!(error = %e, "Failed to persist tick");
            }
        }
    }

    fn set_state(&self, state: SessionState) {
        let previous = SessionState::from_u8(self.state.swap(state as u8, Ordering::AcqRel));
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "Session state changed");
        }
    }

    fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
        self.set_state(SessionState::Disconnected);
        metrics::set_feed_connected(false);
    }

    // -------------------------------------------------------------------------
    // Delivery Task
    // -------------------------------------------------------------------------

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            if cancel.is_cancelled() {
                break;
            }
            self.set_state(SessionState::Connecting);

            match self.connect_and_run(&cancel, &mut policy).await {
                Ok(()) => break,
                Err(e) => {
                    if !matches!(e, SessionError::ClosedByServer { .. }) {
                        self.handle_event(
                            TransportEvent::Error {
                                status: e.status(),
                                reason: e.to_string(),
                            },
                            &mut NoTransport,
                        )
                        .await;
                    }

                    let Some(delay) = policy.next_delay() else {
                        if self.config.reconnect.enabled {
                            tracing::error!(
                                attempts = policy.attempt_count(),
                                "Reconnection attempts exhausted"
                            );
                            record_check(
                                "Reconnection",
                                CheckOutcome::Failed,
                                &format!("gave up after {} attempts", policy.attempt_count()),
                            );
                        } else {
                            tracing::info!("Reconnection disabled, delivery task ending");
                        }
                        break;
                    };

                    let attempt = policy.attempt_count();
                    self.reconnects.fetch_add(1, Ordering::Relaxed);
                    metrics::record_reconnect();
                    tracing::info!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        "Reconnecting to feed"
                    );

                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.mark_disconnected();
        tracing::info!("Delivery task finished");
    }

    /// Connect, subscribe and deliver frames until cancelled or the connection drops.
    async fn connect_and_run(
        &self,
        cancel: &CancellationToken,
        policy: &mut ReconnectPolicy,
    ) -> Result<(), SessionError> {
        tracing::info!(url = %self.config.url, "Connecting to feed");

        let connected = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            result = tokio_tungstenite::connect_async(self.config.url.as_str()) => result,
        };
        let (ws_stream, _response) = connected?;
        policy.reset();

        let (write, mut read) = ws_stream.split();
        let mut transport = WsTransport::new(write);

        tokio::select! {
            () = cancel.cancelled() => {
                transport.close().await;
                return Ok(());
            }
            () = self.handle_event(TransportEvent::Open, &mut transport) => {}
        }

        let ping_enabled = !self.config.ping_interval.is_zero();
        let mut ping = tokio::time::interval_at(
            tokio::time::Instant::now() + self.config.ping_interval,
            self.config.ping_interval.max(Duration::from_millis(1)),
        );
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let idle_enabled = !self.config.idle_timeout.is_zero();
        let idle = tokio::time::sleep(self.config.idle_timeout);
        tokio::pin!(idle);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    transport.close().await;
                    return Ok(());
                }
                _ = ping.tick(), if ping_enabled => {
                    transport.ping().await?;
                }
                () = &mut idle, if idle_enabled => {
                    return Err(SessionError::IdleTimeout(self.config.idle_timeout));
                }
                frame = read.next() => {
                    if idle_enabled {
                        idle.as_mut().reset(tokio::time::Instant::now() + self.config.idle_timeout);
                    }

                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            let event = TransportEvent::Message(text.as_str().to_owned());
                            self.handle_event(event, &mut transport).await;
                        }
                        Some(Ok(Message::Binary(data))) => self.on_binary(&data),
                        Some(Ok(Message::Ping(data))) => {
                            self.handle_event(TransportEvent::Ping, &mut transport).await;
                            transport.send_frame(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            self.handle_event(TransportEvent::Pong, &mut transport).await;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame.map_or((None, String::new()), |f| {
                                (Some(u16::from(f.code)), f.reason.as_str().to_owned())
                            });
                            self.handle_event(
                                TransportEvent::Close { code, reason: reason.clone() },
                                &mut transport,
                            )
                            .await;
                            return Err(SessionError::ClosedByServer { code, reason });
                        }
                        Some(Ok(Message::Frame(_))) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(SessionError::ConnectionClosed),
                    }
                }
            }
        }
    }
}

/// Stand-in transport for events that never write.
struct NoTransport;

#[async_trait]
impl FeedTransport for NoTransport {
    async fn send_text(&mut self, _text: String) -> Result<usize, TransportError> {
        Err(TransportError::Closed)
    }
}

fn excerpt(text: &str) -> &str {
    if text.len() <= PAYLOAD_EXCERPT_LEN {
        return text;
    }
    let mut end = PAYLOAD_EXCERPT_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
