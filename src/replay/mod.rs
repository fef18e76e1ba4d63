//! Scripted stand-in for the research pipeline.
//!
//! [`ReplayServer`] serves `/ws/{client_id}` and answers every
//! `{"type": "research"}` request by replaying a [`Transcript`]. Progress is
//! kept per client id, so a client that reconnects after a drop picks the
//! transcript up where it left off, like a pipeline that keeps running while
//! the browser reconnects.

mod script;

pub use script::{ReplayStep, TOPIC_PLACEHOLDER, Transcript};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::protocol::ClientMessage;

/// Interval between keepalive pings.
const PING_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// Address to bind; port 0 picks a free port.
    pub bind: SocketAddr,
    /// Delay for steps that do not carry their own.
    pub default_delay: Duration,
    /// Drop each client's socket once, right after this many frames.
    pub disconnect_after: Option<usize>,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            default_delay: Duration::from_millis(250),
            disconnect_after: None,
        }
    }
}

#[derive(Debug)]
struct ClientProgress {
    frames: Vec<(Duration, String)>,
    next: usize,
    dropped: bool,
    /// Socket currently allowed to replay for this client.
    owner: u64,
}

struct ReplayState {
    transcript: Transcript,
    options: ReplayOptions,
    clients: Mutex<HashMap<String, ClientProgress>>,
    next_socket: AtomicU64,
}

impl ReplayState {
    fn new(transcript: Transcript, options: ReplayOptions) -> Self {
        Self {
            transcript,
            options,
            clients: Mutex::new(HashMap::new()),
            next_socket: AtomicU64::new(0),
        }
    }

    fn clients(&self) -> std::sync::MutexGuard<'_, HashMap<String, ClientProgress>> {
        self.clients.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a new socket for `client_id`. It takes over any transcript
    /// in progress, so an older socket of the same client goes quiet.
    fn attach(&self, client_id: &str) -> u64 {
        let socket = self.next_socket.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(progress) = self.clients().get_mut(client_id) {
            progress.owner = socket;
        }
        socket
    }

    /// Restart the transcript for `client_id` with a new topic.
    fn begin(&self, client_id: &str, socket: u64, topic: &str) {
        let frames = self.transcript.render(topic, self.options.default_delay);
        let mut clients = self.clients();
        let dropped = clients.get(client_id).is_some_and(|c| c.dropped);
        clients.insert(
            client_id.to_string(),
            ClientProgress {
                frames,
                next: 0,
                dropped,
                owner: socket,
            },
        );
    }

    fn pending(&self, client_id: &str, socket: u64) -> Option<(Duration, String)> {
        let clients = self.clients();
        let progress = clients.get(client_id).filter(|p| p.owner == socket)?;
        progress.frames.get(progress.next).cloned()
    }

    /// Mark the pending frame as sent. Returns `true` when the socket should
    /// be dropped now.
    fn advance(&self, client_id: &str, socket: u64) -> bool {
        let mut clients = self.clients();
        let Some(progress) = clients.get_mut(client_id).filter(|p| p.owner == socket) else {
            return false;
        };
        progress.next += 1;
        if !progress.dropped && self.options.disconnect_after == Some(progress.next) {
            progress.dropped = true;
            return true;
        }
        false
    }
}

/// WebSocket server replaying a transcript to each client.
pub struct ReplayServer {
    state: Arc<ReplayState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    addr: Option<SocketAddr>,
}

impl ReplayServer {
    pub fn new(transcript: Transcript, options: ReplayOptions) -> Self {
        Self {
            state: Arc::new(ReplayState::new(transcript, options)),
            shutdown_tx: None,
            addr: None,
        }
    }

    /// Start serving. Returns the `ws://` base url clients should use.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind.
    pub async fn start(&mut self) -> Result<String> {
        let listener = TcpListener::bind(self.state.options.bind)
            .await
            .with_context(|| format!("Failed to bind replay server on {}", self.state.options.bind))?;

        let addr = listener
            .local_addr()
            .context("Failed to get server address")?;
        self.addr = Some(addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let app = build_router(self.state.clone());
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
            {
                warn!(error = %e, "Replay server error");
            }
        });

        info!(%addr, frames = self.state.transcript.len(), "Replay server listening");
        Ok(format!("ws://{}", addr))
    }

    /// Stop the server gracefully.
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.addr = None;
    }

    pub fn addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    pub fn url(&self) -> Option<String> {
        self.addr.map(|addr| format!("ws://{}", addr))
    }
}

impl Drop for ReplayServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_router(state: Arc<ReplayState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws/{client_id}", get(ws_handler))
        .with_state(state)
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(client_id): Path<String>,
    State(state): State<Arc<ReplayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, client_id, state))
}

async fn handle_socket(socket: WebSocket, client_id: String, state: Arc<ReplayState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    ping_interval.tick().await;

    let socket_id = state.attach(&client_id);
    info!(client = %client_id, socket = socket_id, "Client connected");

    loop {
        let pending = state.pending(&client_id, socket_id);
        let delay = pending.as_ref().map(|(d, _)| *d).unwrap_or_default();

        tokio::select! {
            _ = ping_interval.tick() => {
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(text.as_str()) {
                            Ok(ClientMessage::Research { topic }) => {
                                info!(client = %client_id, %topic, "Research requested");
                                state.begin(&client_id, socket_id, &topic);
                            }
                            Err(e) => warn!(client = %client_id, error = %e, "Ignoring client message"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }

            _ = tokio::time::sleep(delay), if pending.is_some() => {
                let Some((_, frame)) = pending else {
                    continue;
                };
                if sender.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
                if state.advance(&client_id, socket_id) {
                    info!(client = %client_id, "Dropping connection as scripted");
                    return;
                }
                debug!(client = %client_id, "Frame replayed");
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
    info!(client = %client_id, "Client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn state(disconnect_after: Option<usize>) -> ReplayState {
        let transcript = Transcript::parse(
            r#"{"type":"generate_query","data":{"query":"{topic}","rationale":"r"}}
{"type":"finalize","data":{"summary":"done"}}"#,
        )
        .unwrap();
        ReplayState::new(
            transcript,
            ReplayOptions {
                disconnect_after,
                ..ReplayOptions::default()
            },
        )
    }

    #[test]
    fn test_pending_walks_transcript() {
        let state = state(None);
        let socket = state.attach("c1");
        assert!(state.pending("c1", socket).is_none());
        state.begin("c1", socket, "rust");
        let (_, first) = state.pending("c1", socket).unwrap();
        assert!(first.contains("\"query\":\"rust\""));
        assert!(!state.advance("c1", socket));
        assert!(state.pending("c1", socket).unwrap().1.contains("finalize"));
        assert!(!state.advance("c1", socket));
        assert!(state.pending("c1", socket).is_none());
    }

    #[test]
    fn test_disconnect_happens_once_per_client() {
        let state = state(Some(1));
        let socket = state.attach("c1");
        state.begin("c1", socket, "rust");
        assert!(state.advance("c1", socket));
        state.begin("c1", socket, "again");
        assert!(!state.advance("c1", socket));
    }

    #[test]
    fn test_new_socket_resumes_and_silences_old_one() {
        let state = state(Some(1));
        let old = state.attach("c1");
        state.begin("c1", old, "rust");
        assert!(state.advance("c1", old));

        let new = state.attach("c1");
        assert!(state.pending("c1", old).is_none());
        assert!(!state.advance("c1", old));
        assert!(state.pending("c1", new).unwrap().1.contains("finalize"));
    }

    #[test]
    fn test_clients_are_independent() {
        let state = state(None);
        let a = state.attach("a");
        let b = state.attach("b");
        state.begin("a", a, "one");
        state.begin("b", b, "two");
        state.advance("a", a);
        assert!(state.pending("a", a).unwrap().1.contains("finalize"));
        assert!(state.pending("b", b).unwrap().1.contains("two"));
    }

    #[tokio::test]
    async fn test_health_route() {
        let app = build_router(Arc::new(state(None)));
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_ws_route_requires_upgrade() {
        let app = build_router(Arc::new(state(None)));
        let request = Request::builder()
            .uri("/ws/user-1")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert!(!response.status().is_success());
    }

    #[tokio::test]
    async fn test_server_start_stop() {
        let mut server = ReplayServer::new(Transcript::builtin().unwrap(), ReplayOptions::default());
        match server.start().await {
            Ok(url) => {
                assert!(url.starts_with("ws://127.0.0.1:"));
                assert_eq!(server.url(), Some(url));
                server.stop();
                assert!(server.addr().is_none());
            }
            Err(e) => {
                let err_chain = format!("{:?}", e);
                if err_chain.contains("Operation not permitted")
                    || err_chain.contains("Permission denied")
                    || err_chain.contains("os error 1")
                    || err_chain.contains("bind")
                {
                    eprintln!("Skipping test_server_start_stop (sandbox): {:?}", e);
                    return;
                }
                panic!("Unexpected error: {:?}", e);
            }
        }
    }
}
