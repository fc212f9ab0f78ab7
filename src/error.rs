//! Error type shared by the session and its collaborators.

use thiserror::Error;

use crate::peer::state::{SessionCommand, SessionState};

/// Errors surfaced by the viewer session and its collaborators
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Failed to fetch ICE servers: {0}")]
    IceServers(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("WebRTC error: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("Media error: {0}")]
    Media(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cannot {command:?} while {state:?}")]
    InvalidTransition {
        state: SessionState,
        command: SessionCommand,
    },

    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    #[error("Session was stopped before start completed")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, ClientError>;
