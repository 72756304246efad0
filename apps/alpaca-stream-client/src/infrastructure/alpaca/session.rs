//! Stream Session Client
//!
//! Owns one WebSocket connection to the stock data stream and drives it
//! through the handshake, subscription commands, the receive loop, and the
//! orderly close.
//!
//! # Lifecycle
//!
//! ```text
//! connect()      Idle -> Connecting -> Connected
//! authenticate() Connected -> Authenticating -> Authenticated
//! listen()       Authenticated -> Listening -> Faulted
//! disconnect()   any non-idle -> Closed
//! ```
//!
//! `subscribe`/`unsubscribe` are accepted in `Authenticated` and `Listening`.
//!
//! # Concurrency
//!
//! The receive loop owns the read half. Each batch is decoded on its own task
//! so a full output queue never stalls the next read; a semaphore caps how
//! many decode tasks may be in flight. The write half sits behind an async
//! mutex shared by command sends and the close frame.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Semaphore, watch};
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::Instrument;
use uuid::Uuid;

use super::auth::Credentials;
use super::codec::FrameDecoder;
use super::messages::{
    AUTHENTICATED_ACK, CONNECTED_ACK, SubscriptionAction, SubscriptionCommand, encode_symbols,
};
use crate::application::ports::SessionControl;
use crate::domain::session::{NO_STATUS_RECEIVED, SessionState, TransportFault};
use crate::domain::streaming::Record;
use crate::infrastructure::config::{ClientConfig, DisconnectSettings, QueueSettings};
use crate::infrastructure::metrics::{self, SendOperation};
use crate::infrastructure::queues::{self, RecordSenders, SessionOutputs};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

// =============================================================================
// Error Type
// =============================================================================

/// Errors returned by the handshake operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport could not be opened, or failed before the connected
    /// acknowledgment arrived.
    #[error("failed to open stream transport: {0}")]
    Connect(String),

    /// Connected acknowledgment did not match.
    #[error("unexpected handshake payload: {payload}")]
    Handshake {
        /// Frame received instead of the acknowledgment
        payload: String,
    },

    /// Server rejected the credentials.
    #[error("credentials rejected: {reason}")]
    AuthRejected {
        /// Server error code, when the reply was an error batch
        code: Option<i32>,
        /// Server message, or the raw reply
        reason: String,
    },

    /// Credentials could not be sent or the reply could not be read.
    #[error("authentication transport failure: {0}")]
    AuthTransport(String),

    /// Operation not allowed in the current state.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        /// Operation attempted
        operation: &'static str,
        /// State at the time of the call
        state: SessionState,
    },
}

impl ClientError {
    /// Check if the caller must supply different credentials before retrying.
    #[must_use]
    pub const fn is_bad_credentials(&self) -> bool {
        matches!(self, Self::AuthRejected { .. })
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Stream endpoint.
    pub url: String,
    /// Output queue capacities.
    pub queues: QueueSettings,
    /// Cap on in-flight decode tasks.
    pub max_concurrent_decodes: usize,
    /// Orderly shutdown timings.
    pub disconnect: DisconnectSettings,
}

impl SessionConfig {
    /// Create a configuration for `url` with default capacities and timings.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        let defaults = ClientConfig::default();
        Self {
            url: url.into(),
            queues: defaults.queues,
            max_concurrent_decodes: defaults.max_concurrent_decodes,
            disconnect: defaults.disconnect,
        }
    }
}

impl From<&ClientConfig> for SessionConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            url: config.stream_url(),
            queues: config.queues,
            max_concurrent_decodes: config.max_concurrent_decodes,
            disconnect: config.disconnect,
        }
    }
}

// =============================================================================
// Session
// =============================================================================

/// One logical stream session.
pub struct Session {
    id: Uuid,
    config: SessionConfig,
    decoder: FrameDecoder,
    state: parking_lot::RwLock<SessionState>,
    writer: Mutex<Option<WsSink>>,
    reader: Mutex<Option<WsSource>>,
    senders: RecordSenders,
    closure: watch::Sender<Option<TransportFault>>,
    decode_permits: Arc<Semaphore>,
    decode_limit: u32,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("url", &self.config.url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session and the consumer side of its output queues.
    ///
    /// # Panics
    ///
    /// Panics if a queue capacity is zero.
    #[must_use]
    pub fn new(config: SessionConfig) -> (Arc<Self>, SessionOutputs) {
        let (senders, outputs) = queues::channels(config.queues);
        let (closure, _) = watch::channel(None);
        let decode_limit = u32::try_from(config.max_concurrent_decodes.max(1)).unwrap_or(u32::MAX);

        let session = Self {
            id: Uuid::new_v4(),
            config,
            decoder: FrameDecoder::new(),
            state: parking_lot::RwLock::new(SessionState::Idle),
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            senders,
            closure,
            decode_permits: Arc::new(Semaphore::new(decode_limit as usize)),
            decode_limit,
        };

        (Arc::new(session), outputs)
    }

    /// Unique identifier for this session.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Open the transport and verify the connected acknowledgment.
    ///
    /// On failure the transport is released and the state returns to `Idle`.
    ///
    /// # Errors
    ///
    /// - [`ClientError::InvalidState`] unless `Idle`
    /// - [`ClientError::Connect`] if the endpoint is unreachable or the
    ///   transport fails before a data frame arrives
    /// - [`ClientError::Handshake`] if the first frame is anything but the
    ///   exact connected acknowledgment
    #[tracing::instrument(name = "session", skip_all, fields(session_id = %self.id, phase = "connect"))]
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.begin("connect", SessionState::can_connect, SessionState::Connecting)?;

        tracing::info!(
            url = %self.config.url,
            "Connecting to stock stream"
        );

        match self.open_transport().await {
            Ok((sink, source)) => {
                *self.writer.lock().await = Some(sink);
                *self.reader.lock().await = Some(source);
                if !self.advance(SessionState::Connected) {
                    self.release_transport().await;
                    return Err(ClientError::InvalidState {
                        operation: "connect",
                        state: SessionState::Closed,
                    });
                }
                tracing::info!("Stream connected");
                Ok(())
            }
            Err(e) => {
                self.advance(SessionState::Idle);
                tracing::error!(error = %e, "Connect failed");
                Err(e)
            }
        }
    }

    async fn open_transport(&self) -> Result<(WsSink, WsSource), ClientError> {
        let (ws, _response) = tokio_tungstenite::connect_async(self.config.url.as_str())
            .await
            .map_err(|e| ClientError::Connect(e.to_string()))?;

        let (sink, mut source) = ws.split();

        let frame = next_data_frame(&mut source)
            .await
            .map_err(|fault| ClientError::Connect(fault.to_string()))?;

        if frame != CONNECTED_ACK.as_bytes() {
            return Err(ClientError::Handshake {
                payload: String::from_utf8_lossy(&frame).into_owned(),
            });
        }

        Ok((sink, source))
    }

    /// Send credentials and verify the authenticated acknowledgment.
    ///
    /// On failure the state returns to `Connected`.
    ///
    /// # Errors
    ///
    /// - [`ClientError::InvalidState`] unless `Connected`
    /// - [`ClientError::AuthRejected`] if the reply is anything but the exact
    ///   authenticated acknowledgment
    /// - [`ClientError::AuthTransport`] if the send or the read fails
    #[tracing::instrument(name = "session", skip_all, fields(session_id = %self.id, phase = "authenticate"))]
    pub async fn authenticate(&self, credentials: &Credentials) -> Result<(), ClientError> {
        self.begin(
            "authenticate",
            SessionState::can_authenticate,
            SessionState::Authenticating,
        )?;

        match self.exchange_credentials(credentials).await {
            Ok(()) => {
                if !self.advance(SessionState::Authenticated) {
                    return Err(ClientError::InvalidState {
                        operation: "authenticate",
                        state: SessionState::Closed,
                    });
                }
                tracing::info!(
                    key = credentials.key(),
                    "Stream authenticated"
                );
                Ok(())
            }
            Err(e) => {
                self.advance(SessionState::Connected);
                tracing::error!(
                    bad_credentials = e.is_bad_credentials(),
                    error = %e,
                    "Authentication failed"
                );
                Err(e)
            }
        }
    }

    async fn exchange_credentials(&self, credentials: &Credentials) -> Result<(), ClientError> {
        let json = serde_json::to_string(&credentials.auth_request())
            .map_err(|e| ClientError::AuthTransport(format!("failed to serialize auth: {e}")))?;

        {
            let mut writer = self.writer.lock().await;
            let sink = writer
                .as_mut()
                .ok_or_else(|| ClientError::AuthTransport("transport not open".to_string()))?;
            sink.send(Message::Text(json.into())).await.map_err(|e| {
                metrics::record_send_failure(SendOperation::Auth);
                ClientError::AuthTransport(format!("failed to send auth: {e}"))
            })?;
        }

        let frame = {
            let mut reader = self.reader.lock().await;
            let source = reader
                .as_mut()
                .ok_or_else(|| ClientError::AuthTransport("transport not open".to_string()))?;
            next_data_frame(source)
                .await
                .map_err(|fault| ClientError::AuthTransport(fault.to_string()))?
        };

        if frame == AUTHENTICATED_ACK.as_bytes() {
            Ok(())
        } else {
            Err(self.rejection(&frame))
        }
    }

    fn rejection(&self, frame: &[u8]) -> ClientError {
        let server_error = self.decoder.decode(frame).ok().and_then(|batch| {
            batch.records.into_iter().find_map(|record| match record {
                Record::SessionError(err) => Some(err),
                _ => None,
            })
        });

        match server_error {
            Some(err) => {
                tracing::warn!(
                    code = err.code,
                    auth_failure = err.is_auth_error(),
                    limit_exceeded = err.is_limit_error(),
                    "Server rejected authentication"
                );
                ClientError::AuthRejected {
                    code: Some(err.code),
                    reason: err.msg,
                }
            }
            None => ClientError::AuthRejected {
                code: None,
                reason: String::from_utf8_lossy(frame).into_owned(),
            },
        }
    }

    /// Subscribe to trades and quotes for the given symbols.
    ///
    /// Send failures are logged, not returned.
    pub async fn subscribe(&self, trades: &[String], quotes: &[String]) {
        self.scribe(SubscriptionAction::Subscribe, trades, quotes)
            .await;
    }

    /// Unsubscribe from trades and quotes for the given symbols.
    ///
    /// Send failures are logged, not returned.
    pub async fn unsubscribe(&self, trades: &[String], quotes: &[String]) {
        self.scribe(SubscriptionAction::Unsubscribe, trades, quotes)
            .await;
    }

    #[tracing::instrument(name = "session", skip_all, fields(session_id = %self.id, phase = "scribe"))]
    async fn scribe(&self, action: SubscriptionAction, trades: &[String], quotes: &[String]) {
        let state = self.state();
        if !state.can_send_commands() {
            tracing::warn!(
                action = action.as_str(),
                state = %state,
                "Skipping command: session not authenticated"
            );
            return;
        }

        let trades_json = encode_symbols(trades)
            .inspect_err(|e| {
                tracing::warn!(error = %e, "Failed to encode trade symbols");
            })
            .ok();
        let quotes_json = encode_symbols(quotes)
            .inspect_err(|e| {
                tracing::warn!(error = %e, "Failed to encode quote symbols");
            })
            .ok();

        let Some(command) = SubscriptionCommand::from_encoded(action, trades_json, quotes_json)
        else {
            tracing::error!(
                action = action.as_str(),
                "Neither symbol list could be encoded; nothing sent"
            );
            return;
        };

        let json = match command.to_json() {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize command");
                return;
            }
        };

        let mut writer = self.writer.lock().await;
        let Some(sink) = writer.as_mut() else {
            tracing::warn!("No transport; command dropped");
            return;
        };

        match sink.send(Message::Text(json.into())).await {
            Ok(()) => tracing::debug!(
                action = action.as_str(),
                trades = ?trades,
                quotes = ?quotes,
                "Sent subscription command"
            ),
            Err(e) => {
                metrics::record_send_failure(SendOperation::Command);
                tracing::error!(
                    action = action.as_str(),
                    error = %e,
                    "Failed to send subscription command"
                );
            }
        }
    }

    /// Run the receive loop until the transport fails.
    ///
    /// Start this on its own task. Each batch is decoded on a separate task;
    /// the first read failure is published to the fault queue and the loop
    /// ends in `Faulted`.
    #[tracing::instrument(name = "session", skip_all, fields(session_id = %self.id, phase = "listen"))]
    pub async fn listen(self: Arc<Self>) {
        let mut source = {
            let mut reader = self.reader.lock().await;
            let mut state = self.state.write();
            if !state.can_listen() {
                tracing::warn!(
                    state = %*state,
                    "Skipping listen: session not authenticated"
                );
                return;
            }
            let Some(source) = reader.take() else {
                tracing::warn!("Transport already released");
                return;
            };
            *state = SessionState::Listening;
            source
        };

        tracing::info!("Receive loop started");

        let fault = loop {
            let data = match source.next().await {
                Some(Ok(msg @ (Message::Text(_) | Message::Binary(_)))) => msg.into_data(),
                Some(Ok(Message::Close(frame))) => break close_fault(frame.as_ref()),
                Some(Ok(_)) => continue,
                Some(Err(e)) => break TransportFault::Read(e.to_string()),
                None => break TransportFault::EndOfStream,
            };

            metrics::record_frame_received(data.len());

            let Ok(permit) = Arc::clone(&self.decode_permits).acquire_owned().await else {
                break TransportFault::Read("decode pool closed".to_string());
            };

            let session = Arc::clone(&self);
            metrics::decode_task_started();
            tokio::spawn(
                async move {
                    session.dispatch_batch(&data).await;
                    metrics::decode_task_finished();
                    drop(permit);
                }
                .instrument(tracing::info_span!("decode")),
            );
        };

        self.publish_closure(&fault);
        self.await_in_flight_decodes().await;

        if let Err(e) = self.senders.report_fault(fault).await {
            tracing::debug!(error = %e, "Fault not queued: no consumer");
        }
    }

    async fn dispatch_batch(&self, batch: &[u8]) {
        let Ok(decoded) = self.decoder.decode(batch) else {
            metrics::record_malformed_batch();
            return;
        };

        for rejected in &decoded.rejected {
            metrics::record_sub_message_rejected(rejected.reason());
        }

        for record in decoded.records {
            let kind = record.kind();
            match self.senders.deliver(record).await {
                Ok(()) => metrics::record_delivered(kind),
                Err(e) => tracing::warn!(
                    event_type = kind.as_str(),
                    error = %e,
                    "Record dropped: queue closed"
                ),
            }
        }
    }

    fn publish_closure(&self, fault: &TransportFault) {
        metrics::record_transport_fault();
        tracing::warn!(fault = %fault, "Receive loop stopped");

        self.closure.send_replace(Some(fault.clone()));

        let mut state = self.state.write();
        if !state.is_terminal() {
            *state = SessionState::Faulted;
        }
    }

    /// Wait until every spawned decode task has delivered its records, so
    /// the fault is queued behind them.
    async fn await_in_flight_decodes(&self) {
        if let Ok(all) = self.decode_permits.acquire_many(self.decode_limit).await {
            drop(all);
        }
    }

    /// Close the session.
    ///
    /// Sends a normal-closure frame (retrying failed sends), then waits for
    /// the remote's closure acknowledgment up to the configured timeout. Ends
    /// in `Closed` whether or not the acknowledgment arrived.
    #[tracing::instrument(name = "session", skip_all, fields(session_id = %self.id, phase = "disconnect"))]
    pub async fn disconnect(&self) {
        let state = self.state();
        if !state.can_disconnect() {
            tracing::warn!("Skipping disconnect: never connected");
            return;
        }
        if state == SessionState::Closed {
            tracing::debug!("Already closed");
            return;
        }

        tracing::info!(state = %state, "Disconnecting");

        let mut closure = self.closure.subscribe();
        let idle_reader = self.reader.lock().await.take();

        self.send_close().await;
        self.await_close_ack(&mut closure, idle_reader).await;

        self.advance(SessionState::Closed);
        self.writer.lock().await.take();

        tracing::info!("Session closed");
    }

    async fn send_close(&self) {
        let mut writer = self.writer.lock().await;
        let Some(sink) = writer.as_mut() else {
            tracing::debug!("No transport to close");
            return;
        };

        match send_close_frame(sink, self.config.disconnect).await {
            CloseSend::Sent { attempt } => tracing::debug!(attempt, "Close frame sent"),
            CloseSend::ConnectionGone => tracing::debug!("Transport already closed"),
            CloseSend::GaveUp => tracing::warn!("Giving up on close frame"),
        }
    }

    async fn await_close_ack(
        &self,
        closure: &mut watch::Receiver<Option<TransportFault>>,
        idle_reader: Option<WsSource>,
    ) {
        let timeout = self.config.disconnect.close_ack_timeout;

        let observed = tokio::time::timeout(timeout, async {
            if let Some(mut source) = idle_reader {
                // No receive loop is running, so read the reply here.
                let fault = loop {
                    if let Err(fault) = next_data_frame(&mut source).await {
                        break fault;
                    }
                };
                self.closure.send_replace(Some(fault.clone()));
                return Some(fault);
            }

            closure
                .wait_for(Option::is_some)
                .await
                .ok()
                .and_then(|fault| (*fault).clone())
        })
        .await;

        match observed {
            Ok(Some(fault)) if fault.is_normal_closure() => {
                tracing::info!("Remote acknowledged closure");
            }
            Ok(Some(fault)) => {
                tracing::debug!(
                    fault = %fault,
                    "Transport ended without a normal closure"
                );
            }
            Ok(None) => {
                tracing::debug!("Closure signal dropped");
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = timeout.as_secs_f64(),
                    "No closure acknowledgment before timeout"
                );
            }
        }
    }

    fn begin(
        &self,
        operation: &'static str,
        allowed: fn(SessionState) -> bool,
        next: SessionState,
    ) -> Result<(), ClientError> {
        let mut state = self.state.write();
        if !allowed(*state) {
            return Err(ClientError::InvalidState {
                operation,
                state: *state,
            });
        }
        *state = next;
        Ok(())
    }

    /// Move to `next` unless the session is already `Closed`.
    ///
    /// Returns `false` when the transition was refused.
    fn advance(&self, next: SessionState) -> bool {
        let mut state = self.state.write();
        if *state == SessionState::Closed && next != SessionState::Closed {
            tracing::debug!(to = %next, "Session already closed; transition refused");
            return false;
        }
        tracing::trace!(from = %*state, to = %next, "Session state change");
        *state = next;
        true
    }

    async fn release_transport(&self) {
        self.writer.lock().await.take();
        self.reader.lock().await.take();
    }
}

#[async_trait]
impl SessionControl for Session {
    async fn disconnect(&self) {
        Self::disconnect(self).await;
    }
}

// =============================================================================
// Transport Helpers
// =============================================================================

/// Outcome of sending the closure frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseSend {
    Sent { attempt: u32 },
    ConnectionGone,
    GaveUp,
}

/// Send a normal-closure frame, retrying failed sends.
///
/// Stops early once the connection is known to be gone.
async fn send_close_frame<S>(sink: &mut S, settings: DisconnectSettings) -> CloseSend
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let DisconnectSettings {
        close_attempts,
        close_retry_delay,
        ..
    } = settings;

    for attempt in 1..=close_attempts {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        };

        match sink.send(Message::Close(Some(frame))).await {
            Ok(()) => return CloseSend::Sent { attempt },
            Err(e) if is_connection_gone(&e) => return CloseSend::ConnectionGone,
            Err(e) => {
                metrics::record_send_failure(SendOperation::Close);
                tracing::warn!(
                    attempt,
                    max_attempts = close_attempts,
                    error = %e,
                    "Failed to send close frame"
                );
                if attempt < close_attempts {
                    tokio::time::sleep(close_retry_delay).await;
                }
            }
        }
    }

    CloseSend::GaveUp
}

/// Read until the next text or binary frame.
async fn next_data_frame(source: &mut WsSource) -> Result<Vec<u8>, TransportFault> {
    loop {
        match source.next().await {
            Some(Ok(Message::Text(text))) => return Ok(text.as_bytes().to_vec()),
            Some(Ok(Message::Binary(data))) => return Ok(data.to_vec()),
            Some(Ok(Message::Close(frame))) => return Err(close_fault(frame.as_ref())),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(TransportFault::Read(e.to_string())),
            None => return Err(TransportFault::EndOfStream),
        }
    }
}

fn close_fault(frame: Option<&CloseFrame>) -> TransportFault {
    frame.map_or(
        TransportFault::Closed {
            code: NO_STATUS_RECEIVED,
            reason: String::new(),
        },
        |frame| TransportFault::Closed {
            code: u16::from(frame.code),
            reason: (*frame.reason).to_owned(),
        },
    )
}

const fn is_connection_gone(error: &tungstenite::Error) -> bool {
    matches!(
        error,
        tungstenite::Error::ConnectionClosed
            | tungstenite::Error::AlreadyClosed
            | tungstenite::Error::Protocol(ProtocolError::SendAfterClosing)
    )
}
