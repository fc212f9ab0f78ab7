//! One receive-only viewing session: ICE server lookup, offer/answer over
//! HTTP, candidate trickling and teardown.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::{validate_ice_servers, CandidateDelivery, OfferProfile, SessionConfig};
use crate::error::{ClientError, Result};
use crate::logger::{dump_candidate, EventBus, SessionEvent};
use crate::peer::connection::{PeerConnection, PeerConnector, PeerEvent, PeerEvents};
use crate::peer::ice::{
    analyze_candidates, diagnose_candidate, log_diagnostic, merge_ice_servers, GatheringLatch,
    GatheringSignal,
};
use crate::peer::media::VideoSink;
use crate::peer::state::{Controls, SessionCommand, SessionState};
use crate::peer::types::{
    GatheringState, IceServer, InboundTrack, LocalCandidate, MediaKind, OfferRequest,
    SignalingMessage,
};
use crate::signaling::SignalingTransport;
use crate::utils::random_peer_id;

struct Inner {
    state: SessionState,
    peer_id: Option<String>,
    ice_servers: Vec<IceServer>,
    connection: Option<Arc<dyn PeerConnection>>,
    pump: Option<JoinHandle<()>>,
}

/// Drives one peer connection from offer to teardown
pub struct SignalingSession {
    config: SessionConfig,
    transport: Arc<dyn SignalingTransport>,
    connector: Arc<dyn PeerConnector>,
    sink: Arc<dyn VideoSink>,
    events: EventBus,
    /// Bumped by every start and stop; a start only acts while its epoch is current.
    epoch: watch::Sender<u64>,
    inner: Mutex<Inner>,
}

impl SignalingSession {
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn SignalingTransport>,
        connector: Arc<dyn PeerConnector>,
        sink: Arc<dyn VideoSink>,
    ) -> Self {
        let (epoch, _) = watch::channel(0);
        Self {
            config,
            transport,
            connector,
            sink,
            events: EventBus::new(),
            epoch,
            inner: Mutex::new(Inner {
                state: SessionState::Idle,
                peer_id: None,
                ice_servers: Vec::new(),
                connection: None,
                pump: None,
            }),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn controls(&self) -> Controls {
        self.state().controls()
    }

    pub fn peer_id(&self) -> Option<String> {
        self.inner.lock().peer_id.clone()
    }

    /// Servers the current connection was built with
    pub fn ice_servers(&self) -> Vec<IceServer> {
        self.inner.lock().ice_servers.clone()
    }

    pub fn has_connection(&self) -> bool {
        self.inner.lock().connection.is_some()
    }

    fn apply(&self, inner: &mut Inner, command: SessionCommand) -> Result<SessionState> {
        let next = inner.state.transition(command)?;
        inner.state = next;
        self.events.emit_state(next);
        Ok(next)
    }

    fn is_current(&self, epoch: u64) -> bool {
        *self.epoch.borrow() == epoch
    }

    async fn stopped(&self, epoch: u64) {
        let mut rx = self.epoch.subscribe();
        // the sender lives in `self`, so this only returns once the epoch moves on
        let _ = rx.wait_for(|current| *current != epoch).await;
    }

    /// Build the connection and negotiate it. Rejects a start while another
    /// one is in progress or a connection is up.
    pub async fn start(&self) -> Result<()> {
        let epoch = {
            let mut inner = self.inner.lock();
            self.apply(&mut inner, SessionCommand::Start)?;
            self.epoch.send_modify(|e| *e += 1);
            *self.epoch.borrow()
        };

        tokio::select! {
            result = self.run_start(epoch) => result,
            _ = self.stopped(epoch) => {
                info!("Session stopped before negotiation finished");
                Err(ClientError::Cancelled)
            }
        }
    }

    async fn run_start(&self, epoch: u64) -> Result<()> {
        let fetched = if self.config.fetch_ice_servers {
            match self.transport.fetch_ice_servers().await {
                Ok(servers) => {
                    self.events
                        .emit(SessionEvent::IceServersReceived(servers.len()));
                    servers
                }
                Err(e) => {
                    self.abort_start(epoch, &e);
                    return Err(e);
                }
            }
        } else {
            Vec::new()
        };

        let ice_servers = merge_ice_servers(&self.config.base_ice_servers(), fetched);
        if let Err(e) = validate_ice_servers(&ice_servers) {
            self.abort_start(epoch, &e);
            return Err(e);
        }
        let peer_id = random_peer_id();

        let (pc, peer_events) = match self.connector.connect(&ice_servers).await {
            Ok(created) => created,
            Err(e) => {
                self.abort_start(epoch, &e);
                return Err(e);
            }
        };

        let latch = Arc::new(GatheringLatch::new());
        let candidates = Arc::new(Mutex::new(Vec::new()));
        let accepted = {
            let mut inner = self.inner.lock();
            if self.is_current(epoch) && inner.state == SessionState::Starting {
                let pump = EventPump {
                    peer_id: peer_id.clone(),
                    delivery: self.config.candidate_delivery,
                    transport: self.transport.clone(),
                    sink: self.sink.clone(),
                    events: self.events.clone(),
                    latch: latch.clone(),
                    candidates: candidates.clone(),
                    video_attached: false,
                };
                inner.pump = Some(tokio::spawn(pump.run(peer_events)));
                inner.peer_id = Some(peer_id.clone());
                inner.ice_servers = ice_servers;
                inner.connection = Some(pc.clone());
                self.apply(&mut inner, SessionCommand::Negotiate)?;
                true
            } else {
                false
            }
        };
        if !accepted {
            debug!("Session stopped while starting, releasing new connection");
            let _ = pc.close().await;
            return Err(ClientError::Cancelled);
        }
        info!("Peer {} created", peer_id);

        let negotiated = async {
            pc.add_recvonly_transceiver(MediaKind::Video).await?;
            self.negotiate(pc.as_ref(), &peer_id, &latch).await?;
            if self.config.candidate_delivery == CandidateDelivery::Bundled {
                analyze_candidates(&candidates.lock());
            }
            Ok::<_, ClientError>(())
        }
        .await;

        match negotiated {
            Ok(()) => {
                let mut inner = self.inner.lock();
                if !self.is_current(epoch) {
                    return Err(ClientError::Cancelled);
                }
                self.apply(&mut inner, SessionCommand::Complete)?;
                Ok(())
            }
            Err(e) => {
                if !self.is_current(epoch) {
                    return Err(ClientError::Cancelled);
                }
                // connection stays up; the caller has to stop
                self.events.emit_alert(e.to_string());
                Err(e)
            }
        }
    }

    fn abort_start(&self, epoch: u64, error: &ClientError) {
        if !self.is_current(epoch) {
            return;
        }
        self.events.emit_alert(error.to_string());
        let mut inner = self.inner.lock();
        let _ = self.apply(&mut inner, SessionCommand::Abort);
    }

    /// Offer/answer exchange, then wait for ICE gathering. With bundled
    /// delivery gathering is awaited first so the offer carries every candidate.
    async fn negotiate(
        &self,
        pc: &dyn PeerConnection,
        peer_id: &str,
        latch: &GatheringLatch,
    ) -> Result<()> {
        if self.config.offer_profile == OfferProfile::AudioVideo {
            pc.add_recvonly_transceiver(MediaKind::Audio).await?;
        }

        let offer = pc.create_offer().await?;
        debug!("Offer created:\n{}", offer.sdp);
        pc.set_local_description(offer.clone()).await?;

        if self.config.candidate_delivery == CandidateDelivery::Bundled {
            self.wait_for_gathering(pc, latch).await;
        }

        let local = pc.local_description().await.unwrap_or(offer);
        let request = OfferRequest {
            peerid: peer_id.to_string(),
            sdp: local.sdp,
            sdp_type: local.sdp_type,
        };
        let answer = self.transport.post_offer(&request).await?;
        debug!("Answer received:\n{}", answer.sdp);
        pc.set_remote_description(answer).await?;

        if self.config.candidate_delivery == CandidateDelivery::Trickle {
            self.wait_for_gathering(pc, latch).await;
        }
        Ok(())
    }

    async fn wait_for_gathering(&self, pc: &dyn PeerConnection, latch: &GatheringLatch) {
        if !latch.is_complete() && pc.ice_gathering_state() == GatheringState::Complete {
            latch.resolve(GatheringSignal::Polled);
        }
        latch.wait().await;
        self.events.emit(SessionEvent::GatheringComplete);
    }

    /// Tear down whatever exists. Never fails; a stop while idle does nothing.
    pub async fn stop(&self) {
        let (connection, pump) = {
            let mut inner = self.inner.lock();
            if let Err(e) = self.apply(&mut inner, SessionCommand::Stop) {
                debug!("Ignoring stop: {}", e);
                return;
            }
            self.epoch.send_modify(|e| *e += 1);
            inner.peer_id = None;
            (inner.connection.take(), inner.pump.take())
        };

        if let Some(pc) = connection {
            match pc.stop_transceivers().await {
                Some(n) => debug!("Stopped {} transceivers", n),
                None => debug!("Transceiver enumeration unsupported, skipping"),
            }

            // let the transceiver stop reach the server before closing
            let grace = self.config.stop_grace;
            tokio::spawn(async move {
                sleep(grace).await;
                if let Err(e) = pc.close().await {
                    warn!("Failed to close peer connection: {}", e);
                }
                if let Some(pump) = pump {
                    pump.abort();
                }
            });
        } else if let Some(pump) = pump {
            pump.abort();
        }

        let mut inner = self.inner.lock();
        let _ = self.apply(&mut inner, SessionCommand::Release);
    }
}

/// Consumes peer events for one connection
struct EventPump {
    peer_id: String,
    delivery: CandidateDelivery,
    transport: Arc<dyn SignalingTransport>,
    sink: Arc<dyn VideoSink>,
    events: EventBus,
    latch: Arc<GatheringLatch>,
    candidates: Arc<Mutex<Vec<LocalCandidate>>>,
    video_attached: bool,
}

impl EventPump {
    async fn run(mut self, mut rx: PeerEvents) {
        while let Some(event) = rx.recv().await {
            self.handle(event);
        }
        debug!("Peer {} event stream ended", self.peer_id);
    }

    fn handle(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::IceCandidate(Some(candidate)) => self.on_ice_candidate(candidate),
            PeerEvent::IceCandidate(None) => {
                debug!("Received null candidate, gathering finished");
                self.latch.resolve(GatheringSignal::NullCandidate);
            }
            PeerEvent::GatheringStateChanged(state) => {
                debug!("iceGatheringState changed to: {:?}", state);
                if state == GatheringState::Complete {
                    self.latch.resolve(GatheringSignal::StateChange);
                }
            }
            PeerEvent::ConnectionStateChanged(state) => {
                info!("Peer {} connection state: {}", self.peer_id, state);
                self.events.emit(SessionEvent::ConnectionStateChanged(state));
            }
            PeerEvent::Track(track) => self.on_track(track),
        }
    }

    fn on_ice_candidate(&mut self, candidate: LocalCandidate) {
        dump_candidate("LOCAL", &candidate);
        if let Some(diagnostic) = diagnose_candidate(&candidate) {
            log_diagnostic(&diagnostic);
            self.events.emit(SessionEvent::CandidateDiagnostic(diagnostic));
        }
        self.candidates.lock().push(candidate.clone());

        if self.delivery != CandidateDelivery::Trickle {
            return;
        }

        let message = SignalingMessage::NewIceCandidate {
            peerid: self.peer_id.clone(),
            candidate: candidate.init,
        };
        let transport = self.transport.clone();
        let events = self.events.clone();
        let peer_id = self.peer_id.clone();
        tokio::spawn(async move {
            let reason = match transport.post_ice_candidate(&message).await {
                Ok(status) if (200..300).contains(&status) => return,
                Ok(status) => format!("ice signaling responded with status {}", status),
                Err(e) => e.to_string(),
            };
            warn!("ice signaling error: {}", reason);
            events.emit(SessionEvent::SignalingFailed { peer_id, reason });
        });
    }

    fn on_track(&mut self, track: InboundTrack) {
        if track.kind != MediaKind::Video || self.video_attached {
            debug!(
                "Ignoring {} track {} (stream {})",
                track.kind, track.track_id, track.stream_id
            );
            return;
        }
        self.video_attached = true;
        info!(
            "Attaching video track {} (stream {}) to sink",
            track.track_id, track.stream_id
        );
        self.events.emit(SessionEvent::TrackAttached {
            track_id: track.track_id.clone(),
            stream_id: track.stream_id.clone(),
        });

        let sink = self.sink.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.attach(track).await {
                warn!("Video sink failed: {}", e);
                events.emit(SessionEvent::SinkFailed(e.to_string()));
            }
        });
    }
}
