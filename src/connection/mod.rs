//! Client side of the research pipeline WebSocket.
//!
//! [`ConnectionManager`] owns at most one live channel to
//! `{server}/ws/{client_id}`. A spawned reader task decodes every text frame
//! and forwards it as a [`ConnectionEvent`] stamped with the generation the
//! channel is bound to, so frames that were already queued when a run was
//! abandoned can be recognised as stale downstream. Malformed frames are
//! logged and dropped in the reader; they never reach the tracker.

mod backoff;

pub use backoff::{BackoffPolicy, ExponentialBackoff, MIN_RECONNECT_DELAY};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::errors::TrackerError;
use crate::protocol::{ClientMessage, PipelineEvent, decode_frame};
use crate::tracker::Generation;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const EVENT_BUFFER: usize = 256;

/// Identifier the server uses to route frames to this client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    /// A fresh random id, prefixed with `user-`.
    pub fn generate() -> Self {
        ClientId(format!("user-{}", Uuid::new_v4().simple()))
    }

    pub fn new(id: impl Into<String>) -> Self {
        ClientId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where and how to connect.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Base server url, e.g. `ws://127.0.0.1:8000`.
    pub server_url: Url,
    pub connect_timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl ConnectionConfig {
    pub fn new(server_url: Url) -> Self {
        Self {
            server_url,
            connect_timeout: Duration::from_secs(10),
            backoff: BackoffPolicy::default(),
        }
    }

    /// Parse a server url, accepting only `ws` and `wss` schemes.
    pub fn parse_url(raw: &str) -> Result<Url, TrackerError> {
        let url = Url::parse(raw).map_err(|e| TrackerError::InvalidUrl {
            url: raw.to_string(),
            message: e.to_string(),
        })?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(TrackerError::InvalidUrl {
                url: raw.to_string(),
                message: format!("unsupported scheme '{}', expected ws or wss", other),
            }),
        }
    }

    /// The per-client endpoint, `{server}/ws/{client_id}`.
    pub fn endpoint(&self, client_id: &ClientId) -> Url {
        let mut url = self.server_url.clone();
        let base = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{}/ws/{}", base, client_id));
        url
    }
}

/// What the reader task reports back.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// A decoded frame, tagged with the generation it belongs to.
    Frame {
        channel: u64,
        generation: Generation,
        event: PipelineEvent,
    },
    /// The channel ended. `reason` is set when it ended with an error.
    Closed {
        channel: u64,
        reason: Option<String>,
    },
}

struct Channel {
    id: u64,
    sink: SplitSink<WsStream, Message>,
    bound: Arc<AtomicU64>,
    reader: JoinHandle<()>,
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Owns the WebSocket channel to the research server.
pub struct ConnectionManager {
    config: ConnectionConfig,
    client_id: ClientId,
    events_tx: mpsc::Sender<ConnectionEvent>,
    channel: Option<Channel>,
    next_channel_id: u64,
    binding: Generation,
    malformed: Arc<AtomicU64>,
    backoff: ExponentialBackoff,
    /// When the next reconnect attempt is due; set while a reconnect is in progress.
    retry_at: Option<Instant>,
}

impl ConnectionManager {
    /// Create a manager and the receiver its reader tasks report to.
    pub fn new(
        config: ConnectionConfig,
        client_id: ClientId,
    ) -> (Self, mpsc::Receiver<ConnectionEvent>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let backoff = ExponentialBackoff::new(config.backoff);
        let manager = Self {
            backoff,
            retry_at: None,
            config,
            client_id,
            events_tx,
            channel: None,
            next_channel_id: 0,
            binding: Generation::default(),
            malformed: Arc::new(AtomicU64::new(0)),
        };
        (manager, events_rx)
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn endpoint(&self) -> Url {
        self.config.endpoint(&self.client_id)
    }

    /// Whether a channel is open and its reader is still running.
    pub fn is_connected(&self) -> bool {
        self.channel
            .as_ref()
            .is_some_and(|channel| !channel.reader.is_finished())
    }

    /// Frames dropped because they could not be decoded.
    pub fn malformed_count(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }

    /// Open a channel if none is open.
    pub async fn connect(&mut self) -> Result<(), TrackerError> {
        if self.is_connected() {
            return Ok(());
        }
        self.channel = None;

        let endpoint = self.endpoint();
        info!(url = %endpoint, "Connecting to research server");

        let stream = match timeout(self.config.connect_timeout, connect_async(endpoint.as_str())).await {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(e)) => return Err(TrackerError::Transport(e.to_string())),
            Err(_) => {
                return Err(TrackerError::Transport(format!(
                    "connection timeout after {:?}",
                    self.config.connect_timeout
                )));
            }
        };

        let (sink, stream) = stream.split();
        self.next_channel_id += 1;
        let id = self.next_channel_id;
        let bound = Arc::new(AtomicU64::new(self.binding.0));
        let reader = tokio::spawn(read_loop(
            id,
            stream,
            Arc::clone(&bound),
            self.events_tx.clone(),
            Arc::clone(&self.malformed),
        ));

        self.channel = Some(Channel {
            id,
            sink,
            bound,
            reader,
        });
        info!(channel = id, "Connected to research server");
        Ok(())
    }

    /// Bind the open channel, and any channel opened later, to `generation`.
    pub fn bind(&mut self, generation: Generation) {
        self.binding = generation;
        if let Some(channel) = &self.channel {
            channel.bound.store(generation.0, Ordering::SeqCst);
        }
    }

    /// Send a message on the open channel.
    pub async fn send(&mut self, message: &ClientMessage) -> Result<(), TrackerError> {
        let json = message.to_json()?;
        let Some(channel) = self.channel.as_mut() else {
            return Err(TrackerError::NotConnected);
        };
        if channel.reader.is_finished() {
            self.channel = None;
            return Err(TrackerError::NotConnected);
        }
        if let Err(e) = channel.sink.send(Message::Text(json.into())).await {
            warn!(channel = channel.id, error = %e, "Send failed; dropping channel");
            self.channel = None;
            return Err(TrackerError::Transport(e.to_string()));
        }
        debug!(channel = channel.id, "Sent client message");
        Ok(())
    }

    /// Drop the current channel without reporting its closure. A reconnect in
    /// progress is dropped with it.
    pub async fn abandon(&mut self) {
        self.retry_at = None;
        if let Some(mut channel) = self.channel.take() {
            channel.reader.abort();
            let _ = channel.sink.send(Message::Close(None)).await;
            info!(channel = channel.id, "Abandoned channel");
        }
    }

    /// Record that the reader of `channel` has stopped.
    ///
    /// Returns `true` when it was the current channel, `false` for a channel
    /// that was already replaced or abandoned.
    pub fn handle_closed(&mut self, channel: u64) -> bool {
        match &self.channel {
            Some(current) if current.id == channel => {
                self.channel = None;
                true
            }
            _ => false,
        }
    }

    /// Whether a reconnect was started and has not finished yet.
    pub fn is_reconnecting(&self) -> bool {
        self.retry_at.is_some()
    }

    /// Reconnect with bounded exponential backoff.
    ///
    /// Returns the number of attempts it took, or `ConnectionUnrecoverable`
    /// once the policy is exhausted.
    ///
    /// Cancel safe: the schedule lives in the manager, so calling again after
    /// the future was dropped resumes the same reconnect instead of starting
    /// over. An attempt interrupted mid-connect is repeated.
    pub async fn reconnect(&mut self) -> Result<u32, TrackerError> {
        let mut retry_at = match self.retry_at {
            Some(at) => at,
            None => {
                self.abandon().await;
                self.backoff.reset();
                self.schedule_retry()?
            }
        };
        loop {
            let attempt = self.backoff.attempt();
            info!(attempt, "Reconnecting");
            tokio::time::sleep_until(retry_at).await;
            match self.connect().await {
                Ok(()) => {
                    self.retry_at = None;
                    return Ok(attempt);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Reconnect attempt failed");
                    retry_at = self.schedule_retry()?;
                }
            }
        }
    }

    fn schedule_retry(&mut self) -> Result<Instant, TrackerError> {
        match self.backoff.next_delay() {
            Some(delay) => {
                debug!(
                    attempt = self.backoff.attempt(),
                    delay_ms = delay.as_millis() as u64,
                    "Reconnect scheduled"
                );
                let at = Instant::now() + delay;
                self.retry_at = Some(at);
                Ok(at)
            }
            None => {
                self.retry_at = None;
                Err(TrackerError::ConnectionUnrecoverable {
                    attempts: self.backoff.attempt(),
                })
            }
        }
    }

    /// Close the channel, if any.
    pub async fn disconnect(&mut self) {
        self.retry_at = None;
        if let Some(mut channel) = self.channel.take() {
            let _ = channel.sink.send(Message::Close(None)).await;
            let _ = channel.sink.close().await;
            info!(channel = channel.id, "Disconnected");
        }
    }
}

async fn read_loop(
    channel: u64,
    mut stream: SplitStream<WsStream>,
    bound: Arc<AtomicU64>,
    events: mpsc::Sender<ConnectionEvent>,
    malformed: Arc<AtomicU64>,
) {
    let reason = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => match decode_frame(text.as_str()) {
                Ok(frame) => {
                    let generation = Generation(
                        frame
                            .generation
                            .unwrap_or_else(|| bound.load(Ordering::SeqCst)),
                    );
                    debug!(channel, %generation, kind = frame.event.kind(), "Frame received");
                    let event = ConnectionEvent::Frame {
                        channel,
                        generation,
                        event: frame.event,
                    };
                    if events.send(event).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    malformed.fetch_add(1, Ordering::Relaxed);
                    warn!(channel, error = %e, "Dropping malformed frame");
                }
            },
            Some(Ok(Message::Binary(_))) => {
                malformed.fetch_add(1, Ordering::Relaxed);
                warn!(channel, "Dropping binary frame");
            }
            Some(Ok(Message::Close(frame))) => {
                debug!(channel, ?frame, "Server closed channel");
                break None;
            }
            // Pings are answered by tungstenite itself.
            Some(Ok(_)) => {}
            Some(Err(e)) => break Some(e.to_string()),
            None => break None,
        }
    };
    let _ = events.send(ConnectionEvent::Closed { channel, reason }).await;
}
