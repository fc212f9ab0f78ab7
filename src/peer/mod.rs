//! Peer connection, ICE handling, session state and media sinks.

pub mod connection;
pub mod ice;
pub mod media;
pub mod state;
pub mod types;

pub use connection::{PeerConnection, PeerConnector, PeerEvent, PeerEvents, WebRtcConnector};
pub use media::{PacketCounterSink, RecordingSink, RtpSource, SinkReport, VideoSink};
pub use state::{Controls, SessionCommand, SessionState};
pub use types::{
    CandidateInit, CandidateKind, IceServer, InboundTrack, LocalCandidate, MediaKind,
    OfferRequest, SessionDescription, SignalingMessage,
};
