//! Phoenix Channels over WebSocket
//!
//! [`RealtimeClient`] implementation speaking the Phoenix channel protocol
//! (`vsn=1.0.0`, JSON object frames). Each pooled channel owns one socket.
//!
//! # Channel Lifecycle
//!
//! 1. **Connect**: open `{endpoint}?vsn=1.0.0&apikey=...`
//! 2. **Join**: send `phx_join` on `realtime:{id}` and wait for a `phx_reply`
//!    with `status: "ok"` (bounded by the join timeout)
//! 3. **Drive**: a background task sends `heartbeat` on topic `phoenix` every
//!    heartbeat interval, answers pings, and tracks channel state from
//!    `phx_close`, `phx_error` and socket closure
//! 4. **Leave**: [`RealtimeClient::remove`] sends `phx_leave`, closes the
//!    socket and stops the driver
//!
//! A heartbeat that is still unanswered when the next one is due marks the
//! channel errored.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::{ChannelError, ChannelState, RealtimeClient};
use crate::config::RealtimeConfig;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Topic used for socket-level heartbeats
const PHOENIX_TOPIC: &str = "phoenix";

/// How long `remove` waits for the driver to finish its goodbye
const LEAVE_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Wire Format
// ============================================================================

/// One Phoenix protocol frame
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhoenixMessage {
    /// Channel topic (`realtime:{id}` or `phoenix`)
    pub topic: String,
    /// Event name (`phx_join`, `phx_reply`, `heartbeat`, ...)
    pub event: String,
    /// Event payload
    #[serde(default)]
    pub payload: Value,
    /// Message reference used to match replies
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
    /// Reference of the join that opened the channel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

impl PhoenixMessage {
    fn join(topic: &str, reference: &str) -> Self {
        Self {
            topic: topic.to_string(),
            event: "phx_join".to_string(),
            payload: json!({
                "config": {
                    "broadcast": { "ack": false, "self": false },
                    "presence": { "key": "" },
                    "postgres_changes": []
                }
            }),
            reference: Some(reference.to_string()),
            join_ref: Some(reference.to_string()),
        }
    }

    fn leave(topic: &str, reference: &str, join_ref: &str) -> Self {
        Self {
            topic: topic.to_string(),
            event: "phx_leave".to_string(),
            payload: json!({}),
            reference: Some(reference.to_string()),
            join_ref: Some(join_ref.to_string()),
        }
    }

    fn heartbeat(reference: &str) -> Self {
        Self {
            topic: PHOENIX_TOPIC.to_string(),
            event: "heartbeat".to_string(),
            payload: json!({}),
            reference: Some(reference.to_string()),
            join_ref: None,
        }
    }

    /// Whether this is a reply to the message with `reference`
    #[must_use]
    pub fn is_reply_to(&self, topic: &str, reference: &str) -> bool {
        self.event == "phx_reply" && self.topic == topic && self.reference.as_deref() == Some(reference)
    }

    /// `payload.status` of a reply
    #[must_use]
    pub fn reply_status(&self) -> Option<&str> {
        self.payload.get("status").and_then(Value::as_str)
    }

    /// Human-readable reason attached to a rejected reply
    #[must_use]
    pub fn reply_reason(&self) -> Option<String> {
        let response = self.payload.get("response")?;
        response
            .get("reason")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                if response.is_null() {
                    None
                } else {
                    Some(response.to_string())
                }
            })
    }
}

/// Topic for a logical connection id
#[must_use]
pub fn topic_for(id: &str) -> String {
    format!("realtime:{id}")
}

/// Build the socket URL with protocol version and optional API key
#[must_use]
pub fn socket_url(endpoint: &str, api_key: Option<&str>) -> String {
    let separator = if endpoint.contains('?') { '&' } else { '?' };
    match api_key {
        Some(key) => format!("{endpoint}{separator}apikey={key}&vsn=1.0.0"),
        None => format!("{endpoint}{separator}vsn=1.0.0"),
    }
}

// ============================================================================
// Channel Handle
// ============================================================================

#[derive(Debug)]
struct Shared {
    id: String,
    topic: String,
    join_ref: String,
    state: Mutex<ChannelState>,
    next_ref: AtomicU64,
}

impl Shared {
    fn state(&self) -> ChannelState {
        *self.state.lock()
    }

    fn set_state(&self, state: ChannelState) {
        let mut current = self.state.lock();
        let previous = *current;
        if previous != state {
            tracing::debug!(
                connection_id = %self.id,
                from = %previous,
                to = %state,
                "Channel state changed"
            );
            *current = state;
        }
    }

    fn next_ref(&self) -> String {
        self.next_ref.fetch_add(1, Ordering::Relaxed).to_string()
    }
}

#[derive(Debug)]
struct Control {
    leave_tx: Option<oneshot::Sender<()>>,
    driver: Option<JoinHandle<()>>,
}

/// Handle to a joined Phoenix channel
///
/// Clones share the socket. The socket is closed when
/// [`RealtimeClient::remove`] runs or every clone is dropped.
#[derive(Clone, Debug)]
pub struct PhoenixChannel {
    shared: Arc<Shared>,
    control: Arc<Mutex<Control>>,
}

impl PhoenixChannel {
    /// Connection id the channel was created for
    #[must_use]
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// Channel topic
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.shared.topic
    }

    /// Current tracked state
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.shared.state()
    }
}

impl PartialEq for PhoenixChannel {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for PhoenixChannel {}

// ============================================================================
// Client
// ============================================================================

/// Realtime client for Phoenix-protocol endpoints
#[derive(Clone, Debug)]
pub struct PhoenixClient {
    config: RealtimeConfig,
    api_key: Option<String>,
}

impl PhoenixClient {
    /// Create a client, reading the API key from the configured variable
    #[must_use]
    pub fn new(config: RealtimeConfig) -> Self {
        let api_key = config.api_key();
        if api_key.is_none() {
            tracing::warn!(
                var = %config.api_key_env,
                "No realtime API key set, connecting without one"
            );
        }
        Self { config, api_key }
    }

    /// Replace the API key
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    async fn connect_and_join(&self, id: &str) -> Result<PhoenixChannel, ChannelError> {
        let url = socket_url(&self.config.endpoint, self.api_key.as_deref());
        let (ws, response) = connect_async(url.as_str())
            .await
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;
        tracing::debug!(
            connection_id = %id,
            status = %response.status(),
            "Realtime socket connected"
        );

        let (mut sink, mut source) = ws.split();
        let topic = topic_for(id);
        let join_ref = "1".to_string();

        send_frame(&mut sink, &PhoenixMessage::join(&topic, &join_ref)).await?;
        await_join_reply(&mut source, &topic, &join_ref).await?;

        let shared = Arc::new(Shared {
            id: id.to_string(),
            topic,
            join_ref,
            state: Mutex::new(ChannelState::Joined),
            next_ref: AtomicU64::new(2),
        });
        let (leave_tx, leave_rx) = oneshot::channel();
        let driver = tokio::spawn(drive(
            sink,
            source,
            leave_rx,
            Arc::clone(&shared),
            self.config.heartbeat_interval,
        ));

        Ok(PhoenixChannel {
            shared,
            control: Arc::new(Mutex::new(Control {
                leave_tx: Some(leave_tx),
                driver: Some(driver),
            })),
        })
    }
}

#[async_trait]
impl RealtimeClient for PhoenixClient {
    type Channel = PhoenixChannel;

    async fn create(&self, id: &str) -> Result<PhoenixChannel, ChannelError> {
        let timeout = self.config.join_timeout;
        match tokio::time::timeout(timeout, self.connect_and_join(id)).await {
            Ok(result) => result,
            Err(_) => Err(ChannelError::Timeout(timeout.as_millis() as u64)),
        }
    }

    async fn inspect_state(&self, channel: &PhoenixChannel) -> Result<ChannelState, ChannelError> {
        Ok(channel.state())
    }

    async fn remove(&self, channel: &PhoenixChannel) -> Result<(), ChannelError> {
        let (leave_tx, driver) = {
            let mut control = channel.control.lock();
            (control.leave_tx.take(), control.driver.take())
        };

        if !channel.state().is_terminal() {
            channel.shared.set_state(ChannelState::Leaving);
        }
        if let Some(tx) = leave_tx {
            let _ = tx.send(());
        }

        if let Some(mut driver) = driver {
            if tokio::time::timeout(LEAVE_TIMEOUT, &mut driver).await.is_err() {
                driver.abort();
                channel.shared.set_state(ChannelState::Closed);
                return Err(ChannelError::Timeout(LEAVE_TIMEOUT.as_millis() as u64));
            }
        }

        channel.shared.set_state(ChannelState::Closed);
        Ok(())
    }
}

// ============================================================================
// Socket I/O
// ============================================================================

async fn send_frame(sink: &mut WsSink, frame: &PhoenixMessage) -> Result<(), ChannelError> {
    let text = serde_json::to_string(frame).map_err(|e| ChannelError::Protocol(e.to_string()))?;
    sink.send(Message::Text(text))
        .await
        .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))
}

async fn await_join_reply(
    source: &mut WsSource,
    topic: &str,
    join_ref: &str,
) -> Result<(), ChannelError> {
    while let Some(incoming) = source.next().await {
        match incoming {
            Ok(Message::Text(text)) => {
                let Ok(frame) = serde_json::from_str::<PhoenixMessage>(&text) else {
                    tracing::debug!(raw = %text, "Ignoring unparseable frame during join");
                    continue;
                };
                if !frame.is_reply_to(topic, join_ref) {
                    continue;
                }
                return match frame.reply_status() {
                    Some("ok") => Ok(()),
                    status => Err(ChannelError::JoinRejected {
                        topic: topic.to_string(),
                        reason: frame
                            .reply_reason()
                            .or_else(|| status.map(str::to_string))
                            .unwrap_or_else(|| "unknown".to_string()),
                    }),
                };
            }
            Ok(Message::Close(_)) => return Err(ChannelError::Closed),
            Ok(_) => {}
            Err(e) => return Err(ChannelError::ConnectionFailed(e.to_string())),
        }
    }
    Err(ChannelError::Closed)
}

async fn drive(
    mut sink: WsSink,
    mut source: WsSource,
    mut leave_rx: oneshot::Receiver<()>,
    shared: Arc<Shared>,
    heartbeat_interval: Duration,
) {
    let mut heartbeat =
        tokio::time::interval_at(Instant::now() + heartbeat_interval, heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut pending_heartbeat: Option<String> = None;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if pending_heartbeat.is_some() {
                    tracing::warn!(connection_id = %shared.id, "Heartbeat not acknowledged, closing channel");
                    shared.set_state(ChannelState::Errored);
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
                let reference = shared.next_ref();
                if let Err(e) = send_frame(&mut sink, &PhoenixMessage::heartbeat(&reference)).await {
                    tracing::warn!(connection_id = %shared.id, error = %e, "Failed to send heartbeat");
                    shared.set_state(ChannelState::Errored);
                    break;
                }
                tracing::trace!(connection_id = %shared.id, reference = %reference, "Heartbeat sent");
                pending_heartbeat = Some(reference);
            }
            _ = &mut leave_rx => {
                let leave = PhoenixMessage::leave(&shared.topic, &shared.next_ref(), &shared.join_ref);
                if let Err(e) = send_frame(&mut sink, &leave).await {
                    tracing::debug!(connection_id = %shared.id, error = %e, "Failed to send leave");
                }
                let _ = sink.send(Message::Close(None)).await;
                shared.set_state(ChannelState::Closed);
                break;
            }
            incoming = source.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let Ok(frame) = serde_json::from_str::<PhoenixMessage>(&text) else {
                            tracing::debug!(connection_id = %shared.id, raw = %text, "Ignoring unparseable frame");
                            continue;
                        };
                        if pending_heartbeat
                            .as_deref()
                            .is_some_and(|r| frame.is_reply_to(PHOENIX_TOPIC, r))
                        {
                            pending_heartbeat = None;
                            continue;
                        }
                        if frame.topic != shared.topic {
                            continue;
                        }
                        match frame.event.as_str() {
                            "phx_close" => {
                                tracing::info!(connection_id = %shared.id, "Channel closed by server");
                                shared.set_state(ChannelState::Closed);
                                break;
                            }
                            "phx_error" => {
                                tracing::warn!(connection_id = %shared.id, payload = %frame.payload, "Channel error from server");
                                shared.set_state(ChannelState::Errored);
                                let _ = sink.send(Message::Close(None)).await;
                                break;
                            }
                            event => {
                                tracing::trace!(connection_id = %shared.id, event = %event, "Channel event");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(connection_id = %shared.id, frame = ?frame, "Realtime socket closed by server");
                        shared.set_state(ChannelState::Closed);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(connection_id = %shared.id, error = %e, "Realtime socket error");
                        shared.set_state(ChannelState::Errored);
                        break;
                    }
                    None => {
                        shared.set_state(ChannelState::Closed);
                        break;
                    }
                }
            }
        }
    }

    tracing::debug!(connection_id = %shared.id, "Channel driver stopped");
}
