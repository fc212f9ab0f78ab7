//! Peer connection seams and the webrtc-rs backend.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_gathering_state::RTCIceGatheringState;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::track::track_remote::TrackRemote;

use crate::error::Result;
use crate::peer::ice::parse_candidate_line;
use crate::peer::media::RtpSource;
use crate::peer::types::{
    CandidateInit, ConnectionState, GatheringState, IceServer, InboundTrack, LocalCandidate,
    MediaKind, SessionDescription,
};

/// Everything the peer connection reports on its own schedule
#[derive(Debug)]
pub enum PeerEvent {
    Track(InboundTrack),
    /// `None` marks the end of gathering
    IceCandidate(Option<LocalCandidate>),
    GatheringStateChanged(GatheringState),
    ConnectionStateChanged(ConnectionState),
}

pub type PeerEvents = mpsc::UnboundedReceiver<PeerEvent>;

/// The peer connection capability the session drives
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn add_recvonly_transceiver(&self, kind: MediaKind) -> Result<()>;

    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    async fn local_description(&self) -> Option<SessionDescription>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    fn ice_gathering_state(&self) -> GatheringState;

    /// Ask every transceiver to stop. `None` when the backend can't enumerate them.
    async fn stop_transceivers(&self) -> Option<usize> {
        None
    }

    async fn close(&self) -> Result<()>;
}

/// Builds peer connections for a given ICE server list
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(
        &self,
        ice_servers: &[IceServer],
    ) -> Result<(Arc<dyn PeerConnection>, PeerEvents)>;
}

/// webrtc-rs backed connector
#[derive(Debug, Default, Clone)]
pub struct WebRtcConnector;

impl WebRtcConnector {
    pub fn new() -> Self {
        Self
    }
}

fn rtc_config(ice_servers: &[IceServer]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: ice_servers.iter().map(Into::into).collect(),
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn connect(
        &self,
        ice_servers: &[IceServer],
    ) -> Result<(Arc<dyn PeerConnection>, PeerEvents)> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(api.new_peer_connection(rtc_config(ice_servers)).await?);
        info!("Peer connection created with {} ICE servers", ice_servers.len());

        let (tx, rx) = mpsc::unbounded_channel();
        install_handlers(&pc, tx);

        Ok((Arc::new(WebRtcPeer { pc }), rx))
    }
}

fn install_handlers(pc: &Arc<RTCPeerConnection>, tx: mpsc::UnboundedSender<PeerEvent>) {
    let events = tx.clone();
    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        let event = match cand {
            Some(c) => local_candidate(&c).map(|local| PeerEvent::IceCandidate(Some(local))),
            None => Some(PeerEvent::IceCandidate(None)),
        };
        if let Some(event) = event {
            let _ = events.send(event);
        }
        Box::pin(async {})
    }));

    let events = tx.clone();
    pc.on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
        debug!("ICE gathering state changed to: {:?}", state);
        let mapped = match state {
            RTCIceGathererState::New => Some(GatheringState::New),
            RTCIceGathererState::Gathering => Some(GatheringState::Gathering),
            RTCIceGathererState::Complete => Some(GatheringState::Complete),
            _ => None,
        };
        if let Some(state) = mapped {
            let _ = events.send(PeerEvent::GatheringStateChanged(state));
        }
        Box::pin(async {})
    }));

    let events = tx.clone();
    pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
        let mapped = match st {
            RTCPeerConnectionState::New => Some(ConnectionState::New),
            RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
            RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
            RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
            RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
            RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
            _ => None,
        };
        if let Some(state) = mapped {
            let _ = events.send(PeerEvent::ConnectionStateChanged(state));
        }
        Box::pin(async {})
    }));

    // the handler must return quickly, reading happens in the sink task
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            let kind = match track.kind() {
                RTPCodecType::Audio => Some(MediaKind::Audio),
                RTPCodecType::Video => Some(MediaKind::Video),
                other => {
                    warn!("Ignoring track of unknown kind {:?}", other);
                    None
                }
            };
            if let Some(kind) = kind {
                let inbound = InboundTrack {
                    kind,
                    track_id: track.id(),
                    stream_id: track.stream_id(),
                    source: Arc::new(RemoteTrackSource { track }),
                };
                let _ = tx.send(PeerEvent::Track(inbound));
            }
            Box::pin(async {})
        },
    ));
}

fn local_candidate(c: &RTCIceCandidate) -> Option<LocalCandidate> {
    let init = match c.to_json() {
        Ok(init) => init,
        Err(e) => {
            warn!("Failed to serialize ICE candidate: {}", e);
            return None;
        }
    };
    let (kind, address) = parse_candidate_line(&init.candidate);
    Some(LocalCandidate {
        kind,
        address,
        init: CandidateInit {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        },
    })
}

struct RemoteTrackSource {
    track: Arc<TrackRemote>,
}

#[async_trait]
impl RtpSource for RemoteTrackSource {
    fn mime_type(&self) -> String {
        self.track.codec().capability.mime_type
    }

    async fn read_rtp(&self) -> Option<Packet> {
        match self.track.read_rtp().await {
            Ok((packet, _)) => Some(packet),
            Err(e) => {
                debug!("Track {} ended: {}", self.track.id(), e);
                None
            }
        }
    }
}

/// Peer connection wrapper over webrtc-rs
pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    async fn add_recvonly_transceiver(&self, kind: MediaKind) -> Result<()> {
        let codec_type = match kind {
            MediaKind::Audio => RTPCodecType::Audio,
            MediaKind::Video => RTPCodecType::Video,
        };
        let init = RTCRtpTransceiverInit {
            direction: RTCRtpTransceiverDirection::Recvonly,
            send_encodings: vec![],
        };
        self.pc
            .add_transceiver_from_kind(codec_type, Some(init))
            .await?;
        debug!("Added recvonly {} transceiver", kind);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.pc.create_offer(None).await?;
        SessionDescription::try_from(offer)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        let desc = RTCSessionDescription::try_from(desc)?;
        self.pc.set_local_description(desc).await?;
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let desc = self.pc.local_description().await?;
        SessionDescription::try_from(desc).ok()
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        let desc = RTCSessionDescription::try_from(desc)?;
        self.pc.set_remote_description(desc).await?;
        Ok(())
    }

    fn ice_gathering_state(&self) -> GatheringState {
        match self.pc.ice_gathering_state() {
            RTCIceGatheringState::Complete => GatheringState::Complete,
            RTCIceGatheringState::Gathering => GatheringState::Gathering,
            _ => GatheringState::New,
        }
    }

    async fn stop_transceivers(&self) -> Option<usize> {
        let mut stopped = 0;
        for transceiver in self.pc.get_transceivers().await {
            match transceiver.stop().await {
                Ok(()) => stopped += 1,
                Err(e) => warn!("Failed to stop transceiver: {}", e),
            }
        }
        Some(stopped)
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await?;
        info!("Peer connection closed");
        Ok(())
    }
}
