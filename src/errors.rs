//! Typed error hierarchy for the research tracker.
//!
//! `TrackerError` covers the whole client: user input, transport and frame
//! decoding. The progress state machine itself never returns it for decoded
//! events; it is total over its input domain.

use thiserror::Error;

/// Errors surfaced by the session, connection manager and frame decoder.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Research topic is empty")]
    EmptyTopic,

    #[error("Not connected to the research server")]
    NotConnected,

    #[error("Malformed message: {reason}")]
    MalformedMessage { reason: String },

    #[error("Connection to the research server was lost")]
    ConnectionLost,

    #[error("Unable to connect to the research server after {attempts} attempts")]
    ConnectionUnrecoverable { attempts: u32 },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid server url '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TrackerError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        TrackerError::MalformedMessage {
            reason: reason.into(),
        }
    }
}
