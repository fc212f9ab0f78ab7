//! ICE server lists, candidate diagnostics and gathering completion.

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::peer::types::{CandidateKind, IceServer, LocalCandidate};

/// Defaults first, then whatever the server handed out. No dedup, no reordering.
pub fn merge_ice_servers(defaults: &[IceServer], fetched: Vec<IceServer>) -> Vec<IceServer> {
    let mut merged = Vec::with_capacity(defaults.len() + fetched.len());
    merged.extend_from_slice(defaults);
    merged.extend(fetched);
    merged
}

/// Pull the candidate type and connection address out of an SDP candidate line
/// (`candidate:<foundation> <component> <proto> <prio> <addr> <port> typ <type> ...`).
pub fn parse_candidate_line(line: &str) -> (CandidateKind, String) {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let address = fields.get(4).map(|s| s.to_string()).unwrap_or_default();
    let kind = fields
        .iter()
        .position(|f| *f == "typ")
        .and_then(|i| fields.get(i + 1))
        .map(|t| match *t {
            "host" => CandidateKind::Host,
            "srflx" => CandidateKind::Srflx,
            "prflx" => CandidateKind::Prflx,
            "relay" => CandidateKind::Relay,
            _ => CandidateKind::Unknown,
        })
        .unwrap_or(CandidateKind::Unknown);
    (kind, address)
}

/// What a gathered candidate tells us about STUN/TURN reachability
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateDiagnostic {
    StunReachable(String),
    TurnReachable(String),
}

pub fn diagnose_candidate(candidate: &LocalCandidate) -> Option<CandidateDiagnostic> {
    match candidate.kind {
        CandidateKind::Srflx => Some(CandidateDiagnostic::StunReachable(
            candidate.address.clone(),
        )),
        CandidateKind::Relay => Some(CandidateDiagnostic::TurnReachable(
            candidate.address.clone(),
        )),
        _ => None,
    }
}

/// Log the diagnostic for a candidate, if it carries one
pub fn log_diagnostic(diagnostic: &CandidateDiagnostic) {
    match diagnostic {
        CandidateDiagnostic::StunReachable(address) => {
            info!("The STUN server is reachable at {}", address)
        }
        CandidateDiagnostic::TurnReachable(address) => {
            info!("The TURN server is reachable at {}", address)
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateSummary {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

pub fn analyze_candidates(candidates: &[LocalCandidate]) -> CandidateSummary {
    let mut summary = CandidateSummary::default();
    for candidate in candidates {
        match candidate.kind {
            CandidateKind::Host => summary.host += 1,
            CandidateKind::Srflx => summary.srflx += 1,
            CandidateKind::Relay => summary.relay += 1,
            _ => {}
        }
    }

    info!(
        "Candidate analysis: {} host, {} srflx, {} relay",
        summary.host, summary.srflx, summary.relay
    );
    if summary.relay == 0 {
        warn!("No TURN relay candidates found! Connection through NAT may fail.");
    }
    summary
}

/// Which signal completed ICE gathering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatheringSignal {
    NullCandidate,
    StateChange,
    Polled,
}

/// Resolve-once latch for ICE gathering completion.
///
/// The null candidate, the gathering-state event and a direct state check all
/// race to resolve it; only the first one counts and every waiter wakes.
#[derive(Debug)]
pub struct GatheringLatch {
    tx: watch::Sender<bool>,
}

impl Default for GatheringLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl GatheringLatch {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Returns true only for the call that completed the latch.
    pub fn resolve(&self, signal: GatheringSignal) -> bool {
        let completed = self.tx.send_if_modified(|done| {
            if *done {
                false
            } else {
                *done = true;
                true
            }
        });
        if completed {
            info!("Ice gathering complete ({:?})", signal);
        } else {
            debug!("Ice gathering already complete, ignoring {:?}", signal);
        }
        completed
    }

    pub fn is_complete(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // the sender lives in `self`, so the channel cannot close under us
        let _ = rx.wait_for(|done| *done).await;
    }
}
