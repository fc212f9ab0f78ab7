//! Receive-only WebRTC viewer with HTTP offer/answer signaling.

pub mod cli;
pub mod config;
pub mod error;
pub mod logger;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod utils;

pub use cli::run;
pub use config::{CandidateDelivery, Endpoints, OfferProfile, SessionConfig};
pub use error::{ClientError, Result};
pub use logger::{EventBus, SessionEvent};
pub use session::SignalingSession;
pub use signaling::{HttpSignaling, SignalingTransport};
