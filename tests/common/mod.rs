//! Fake peer connection, connector, transport and sink for session tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, Notify};
use webrtc::rtp::packet::Packet;

use rtcview_lib::error::{ClientError, Result};
use rtcview_lib::logger::SessionEvent;
use rtcview_lib::peer::connection::{PeerConnection, PeerConnector, PeerEvent, PeerEvents};
use rtcview_lib::peer::media::{RtpSource, SinkReport, VideoSink};
use rtcview_lib::peer::types::{
    CandidateInit, CandidateKind, GatheringState, IceServer, InboundTrack, LocalCandidate,
    MediaKind, OfferRequest, SessionDescription, SignalingMessage,
};
use rtcview_lib::signaling::SignalingTransport;

pub const OFFER_SDP: &str = "v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\ns=-\r\n";
pub const ANSWER_SDP: &str = "v=0...";

// =============================================================================
// Peer connection
// =============================================================================

pub struct FakePeer {
    pub transceivers: Mutex<Vec<MediaKind>>,
    pub local: Mutex<Option<SessionDescription>>,
    pub remote: Mutex<Option<SessionDescription>>,
    pub gathering: Mutex<GatheringState>,
    pub closed: AtomicBool,
    pub stopped_transceivers: AtomicUsize,
    pub supports_transceiver_stop: bool,
    pub reject_remote: bool,
}

impl FakePeer {
    pub fn new(gathering: GatheringState) -> Self {
        Self {
            transceivers: Mutex::new(Vec::new()),
            local: Mutex::new(None),
            remote: Mutex::new(None),
            gathering: Mutex::new(gathering),
            closed: AtomicBool::new(false),
            stopped_transceivers: AtomicUsize::new(0),
            supports_transceiver_stop: true,
            reject_remote: false,
        }
    }

    pub fn set_gathering(&self, state: GatheringState) {
        *self.gathering.lock() = state;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn add_recvonly_transceiver(&self, kind: MediaKind) -> Result<()> {
        self.transceivers.lock().push(kind);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        Ok(SessionDescription::offer(OFFER_SDP))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        *self.local.lock() = Some(desc);
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let mut desc = self.local.lock().clone()?;
        if *self.gathering.lock() == GatheringState::Complete {
            desc.sdp.push_str("a=end-of-candidates\r\n");
        }
        Some(desc)
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        if self.reject_remote {
            return Err(ClientError::Negotiation("remote description mismatch".into()));
        }
        *self.remote.lock() = Some(desc);
        Ok(())
    }

    fn ice_gathering_state(&self) -> GatheringState {
        *self.gathering.lock()
    }

    async fn stop_transceivers(&self) -> Option<usize> {
        if !self.supports_transceiver_stop {
            return None;
        }
        let n = self.transceivers.lock().len();
        self.stopped_transceivers.fetch_add(n, Ordering::SeqCst);
        Some(n)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeConnector {
    pub peer: Arc<FakePeer>,
    pub servers_seen: Mutex<Vec<Vec<IceServer>>>,
    sender: Mutex<Option<mpsc::UnboundedSender<PeerEvent>>>,
    connected: Notify,
}

impl FakeConnector {
    pub fn new(peer: Arc<FakePeer>) -> Self {
        Self {
            peer,
            servers_seen: Mutex::new(Vec::new()),
            sender: Mutex::new(None),
            connected: Notify::new(),
        }
    }

    /// Event injector for the connection built by the session
    pub async fn events(&self) -> mpsc::UnboundedSender<PeerEvent> {
        loop {
            let notified = self.connected.notified();
            if let Some(tx) = self.sender.lock().clone() {
                return tx;
            }
            notified.await;
        }
    }

    pub fn connect_count(&self) -> usize {
        self.servers_seen.lock().len()
    }
}

#[async_trait]
impl PeerConnector for FakeConnector {
    async fn connect(
        &self,
        ice_servers: &[IceServer],
    ) -> Result<(Arc<dyn PeerConnection>, PeerEvents)> {
        self.servers_seen.lock().push(ice_servers.to_vec());
        let (tx, rx) = mpsc::unbounded_channel();
        *self.sender.lock() = Some(tx);
        self.connected.notify_waiters();
        Ok((self.peer.clone() as Arc<dyn PeerConnection>, rx))
    }
}

// =============================================================================
// Signaling transport
// =============================================================================

pub struct FakeTransport {
    /// `None` makes the ICE server fetch fail
    pub ice_servers: Option<Vec<IceServer>>,
    pub answer: SessionDescription,
    pub candidate_status: u16,
    pub fail_candidates: bool,
    /// When set, the fetch/offer call waits for a notification
    pub hold_fetch: Option<Arc<Notify>>,
    pub hold_offer: Option<Arc<Notify>>,
    pub offers: Mutex<Vec<OfferRequest>>,
    pub candidates: Mutex<Vec<SignalingMessage>>,
    candidate_posted: Notify,
}

impl FakeTransport {
    pub fn new(ice_servers: Option<Vec<IceServer>>) -> Self {
        Self {
            ice_servers,
            answer: SessionDescription::answer(ANSWER_SDP),
            candidate_status: 200,
            fail_candidates: false,
            hold_fetch: None,
            hold_offer: None,
            offers: Mutex::new(Vec::new()),
            candidates: Mutex::new(Vec::new()),
            candidate_posted: Notify::new(),
        }
    }

    pub async fn wait_for_candidates(&self, n: usize) -> Vec<SignalingMessage> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let notified = self.candidate_posted.notified();
                {
                    let posted = self.candidates.lock();
                    if posted.len() >= n {
                        return posted.clone();
                    }
                }
                notified.await;
            }
        })
        .await
        .expect("candidates were not posted in time")
    }
}

#[async_trait]
impl SignalingTransport for FakeTransport {
    async fn fetch_ice_servers(&self) -> Result<Vec<IceServer>> {
        if let Some(hold) = &self.hold_fetch {
            hold.notified().await;
        }
        self.ice_servers
            .clone()
            .ok_or_else(|| ClientError::IceServers("connection refused".into()))
    }

    async fn post_offer(&self, offer: &OfferRequest) -> Result<SessionDescription> {
        self.offers.lock().push(offer.clone());
        if let Some(hold) = &self.hold_offer {
            hold.notified().await;
        }
        Ok(self.answer.clone())
    }

    async fn post_ice_candidate(&self, message: &SignalingMessage) -> Result<u16> {
        self.candidates.lock().push(message.clone());
        self.candidate_posted.notify_waiters();
        if self.fail_candidates {
            return Err(ClientError::Negotiation("ice signaling unreachable".into()));
        }
        Ok(self.candidate_status)
    }
}

// =============================================================================
// Media
// =============================================================================

pub struct FakeRtpSource {
    mime_type: String,
    packets: Mutex<VecDeque<Packet>>,
}

impl FakeRtpSource {
    pub fn new(mime_type: &str, payload_sizes: &[usize]) -> Self {
        let packets = payload_sizes
            .iter()
            .enumerate()
            .map(|(i, size)| {
                let mut packet = Packet {
                    payload: Bytes::from(vec![0u8; *size]),
                    ..Default::default()
                };
                packet.header.sequence_number = i as u16;
                packet
            })
            .collect();
        Self {
            mime_type: mime_type.to_string(),
            packets: Mutex::new(packets),
        }
    }
}

#[async_trait]
impl RtpSource for FakeRtpSource {
    fn mime_type(&self) -> String {
        self.mime_type.clone()
    }

    async fn read_rtp(&self) -> Option<Packet> {
        self.packets.lock().pop_front()
    }
}

pub fn track(kind: MediaKind, track_id: &str) -> InboundTrack {
    let mime = match kind {
        MediaKind::Video => "video/VP8",
        MediaKind::Audio => "audio/opus",
    };
    InboundTrack {
        kind,
        track_id: track_id.to_string(),
        stream_id: "stream0".to_string(),
        source: Arc::new(FakeRtpSource::new(mime, &[100, 200])),
    }
}

#[derive(Default)]
pub struct CollectingSink {
    pub attached: Mutex<Vec<String>>,
}

#[async_trait]
impl VideoSink for CollectingSink {
    async fn attach(&self, track: InboundTrack) -> Result<SinkReport> {
        self.attached.lock().push(track.track_id.clone());
        Ok(SinkReport::default())
    }
}

// =============================================================================
// Helpers
// =============================================================================

pub fn candidate(kind: CandidateKind, address: &str) -> LocalCandidate {
    LocalCandidate {
        kind,
        address: address.to_string(),
        init: CandidateInit {
            candidate: format!(
                "candidate:1 1 udp 2130706431 {} 50000 typ {}",
                address, kind
            ),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        },
    }
}

pub fn default_stun() -> IceServer {
    IceServer::stun("stun:stun.l.google.com:19302")
}

/// Drain everything currently queued on an event receiver
pub fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub async fn wait_until(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time")
}
