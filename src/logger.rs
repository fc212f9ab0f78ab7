//! Tracing setup and the session event bus.

use tokio::sync::broadcast;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::peer::ice::CandidateDiagnostic;
use crate::peer::state::{Controls, SessionState};
use crate::peer::types::{ConnectionState, LocalCandidate};

/// Install the global subscriber. `RUST_LOG` wins over `level`.
pub fn init_tracing(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

/// Dump a local candidate as it is found (trickle ICE)
pub fn dump_candidate(label: &str, cand: &LocalCandidate) {
    debug!(
        "Trickle {label}: type={} candidate={} sdp_mid={:?} sdp_mline_index={:?}",
        cand.kind, cand.init.candidate, cand.init.sdp_mid, cand.init.sdp_mline_index
    );
}

/// What the host application can observe about a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged {
        state: SessionState,
        controls: Controls,
    },
    /// User-visible failure
    Alert(String),
    IceServersReceived(usize),
    CandidateDiagnostic(CandidateDiagnostic),
    /// A candidate could not be delivered; the session keeps going
    SignalingFailed {
        peer_id: String,
        reason: String,
    },
    TrackAttached {
        track_id: String,
        stream_id: String,
    },
    GatheringComplete,
    ConnectionStateChanged(ConnectionState),
    SinkFailed(String),
}

const EVENT_CAPACITY: usize = 64;

/// Broadcast channel for session events
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// No subscribers is not an error
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }

    pub fn emit_state(&self, state: SessionState) {
        info!("Session state: {}", state);
        self.emit(SessionEvent::StateChanged {
            state,
            controls: state.controls(),
        });
    }

    pub fn emit_alert(&self, message: impl Into<String>) {
        let message = message.into();
        error!("{}", message);
        self.emit(SessionEvent::Alert(message));
    }
}
