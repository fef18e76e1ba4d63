//! A research session: one tracker, one connection, one event loop.
//!
//! [`ResearchSession`] is the only place where transport events meet the
//! progress state machine. Callers drive it by awaiting
//! [`ResearchSession::next_update`] and pulling projections from
//! [`ResearchSession::snapshot`] whenever an update reports a change.

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::connection::{ClientId, ConnectionConfig, ConnectionEvent, ConnectionManager};
use crate::errors::TrackerError;
use crate::protocol::ClientMessage;
use crate::tracker::{Applied, Generation, ProgressTracker, Run};

/// What a single turn of the session loop did.
#[derive(Debug)]
pub enum SessionUpdate {
    /// A frame was fed to the tracker.
    Applied(Applied),
    /// A channel that had already been replaced finished.
    ChannelRetired,
    /// The server closed the channel while no run was in progress.
    Disconnected,
    /// The channel dropped mid-run and was reestablished.
    Reconnected { attempts: u32 },
    /// The channel dropped mid-run and could not be reestablished; the run
    /// has been marked failed.
    Failed(TrackerError),
}

impl SessionUpdate {
    /// Whether the run may look different than before this update.
    pub fn changed(&self) -> bool {
        match self {
            SessionUpdate::Applied(applied) => applied.changed(),
            SessionUpdate::Failed(_) => true,
            _ => false,
        }
    }
}

pub struct ResearchSession {
    tracker: ProgressTracker,
    connection: ConnectionManager,
    events: mpsc::Receiver<ConnectionEvent>,
    /// Run whose channel dropped and is being reconnected.
    recovering: Option<Generation>,
}

impl ResearchSession {
    pub fn new(config: ConnectionConfig) -> Self {
        Self::with_client_id(config, ClientId::generate())
    }

    pub fn with_client_id(config: ConnectionConfig, client_id: ClientId) -> Self {
        let (connection, events) = ConnectionManager::new(config, client_id);
        Self {
            tracker: ProgressTracker::new(),
            connection,
            events,
            recovering: None,
        }
    }

    pub fn client_id(&self) -> &ClientId {
        self.connection.client_id()
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    pub fn snapshot(&self) -> Run {
        self.tracker.snapshot()
    }

    /// Latest reasoning text for the current run.
    pub fn peek_reasoning(&self) -> &str {
        self.tracker.peek()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn malformed_count(&self) -> u64 {
        self.connection.malformed_count()
    }

    /// Open the channel ahead of the first submission.
    pub async fn connect(&mut self) -> Result<(), TrackerError> {
        self.connection.connect().await
    }

    /// Start a run for `topic` and send it to the pipeline.
    ///
    /// Every run gets a fresh channel: the channel of the previous run, still
    /// in progress or not, is abandoned so its late frames stay stale. A
    /// channel opened by [`connect`](Self::connect) before the first run is
    /// reused. If the request cannot be delivered the new run is marked
    /// failed and the error is returned.
    pub async fn submit(&mut self, topic: &str) -> Result<Generation, TrackerError> {
        let previous = self.tracker.generation();
        let generation = self.tracker.start_run(topic)?;
        self.recovering = None;
        if previous != Generation::default() {
            self.connection.abandon().await;
        }
        self.connection.bind(generation);

        let message = ClientMessage::research(self.tracker.run().topic.clone());
        if let Err(e) = self.deliver(&message).await {
            warn!(%generation, error = %e, "Research request could not be delivered");
            self.tracker.fail(generation, &e.to_string());
            return Err(e);
        }
        info!(%generation, topic = %self.tracker.run().topic, "Research request sent");
        Ok(generation)
    }

    async fn deliver(&mut self, message: &ClientMessage) -> Result<(), TrackerError> {
        if !self.connection.is_connected() {
            if let Err(e) = self.connection.connect().await {
                warn!(error = %e, "Connect failed, retrying with backoff");
                self.connection.reconnect().await?;
            }
        }
        match self.connection.send(message).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(error = %e, "Send failed, reconnecting once");
                self.connection.reconnect().await?;
                self.connection.send(message).await
            }
        }
    }

    /// Wait for the next transport event and apply it.
    ///
    /// Cancel safe. When the future is dropped during a reconnect, the next
    /// call picks the reconnect up where it stopped.
    pub async fn next_update(&mut self) -> Option<SessionUpdate> {
        if let Some(generation) = self.recovering {
            return Some(self.recover(generation).await);
        }

        let event = self.events.recv().await?;
        let update = match event {
            ConnectionEvent::Frame {
                generation, event, ..
            } => SessionUpdate::Applied(self.tracker.apply(generation, event)),
            ConnectionEvent::Closed { channel, reason } => {
                if !self.connection.handle_closed(channel) {
                    return Some(SessionUpdate::ChannelRetired);
                }
                if !self.tracker.is_running() {
                    info!(channel, "Channel closed with no run in progress");
                    return Some(SessionUpdate::Disconnected);
                }

                let lost = TrackerError::ConnectionLost;
                warn!(channel, reason = reason.as_deref().unwrap_or("closed"), "{}", lost);
                let generation = self.tracker.generation();
                self.recovering = Some(generation);
                self.recover(generation).await
            }
        };
        Some(update)
    }

    async fn recover(&mut self, generation: Generation) -> SessionUpdate {
        let outcome = self.connection.reconnect().await;
        self.recovering = None;
        match outcome {
            Ok(attempts) => SessionUpdate::Reconnected { attempts },
            Err(e) => {
                self.tracker.fail(generation, &e.to_string());
                SessionUpdate::Failed(e)
            }
        }
    }

    /// Whether a dropped channel is still being reestablished.
    pub fn is_recovering(&self) -> bool {
        self.recovering.is_some()
    }

    pub async fn shutdown(&mut self) {
        self.recovering = None;
        self.connection.disconnect().await;
    }
}
