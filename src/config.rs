//! Session configuration.
//! Defaults reproduce the stock viewer page: trickle ICE, audio+video offer,
//! ICE servers fetched from the web server, 500 ms grace before closing.

use std::time::Duration;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ClientError, Result};
use crate::peer::types::IceServer;
use crate::utils::add_ice_url_scheme;

/// Public STUN server every session starts with
pub static DEFAULT_ICE_SERVERS: Lazy<Vec<IceServer>> =
    Lazy::new(|| vec![IceServer::stun("stun:stun.l.google.com:19302")]);

pub const DEFAULT_STOP_GRACE: Duration = Duration::from_millis(500);

/// How local ICE candidates reach the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum CandidateDelivery {
    /// POST every candidate to the ICE signaling endpoint as it is found
    Trickle,
    /// Wait for gathering to finish and send all candidates inside the offer SDP
    Bundled,
}

/// Offer shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum OfferProfile {
    /// Receive both audio and video
    AudioVideo,
    /// Only the transceivers the session added explicitly (video)
    BrowserDefaults,
}

/// Server endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    pub base: Url,
    pub ice_servers: String,
    pub offer: String,
    pub ice_signaling: String,
}

impl Endpoints {
    pub fn new(base: Url) -> Self {
        Self {
            base,
            ice_servers: "/iceServers".into(),
            offer: "/offer".into(),
            ice_signaling: "/iceSignaling".into(),
        }
    }

    pub fn ice_servers_url(&self) -> Result<Url> {
        Ok(self.base.join(&self.ice_servers)?)
    }

    pub fn offer_url(&self) -> Result<Url> {
        Ok(self.base.join(&self.offer)?)
    }

    pub fn ice_signaling_url(&self) -> Result<Url> {
        Ok(self.base.join(&self.ice_signaling)?)
    }
}

/// TURN server given out-of-band (TURN_SERVER_URL / _USERNAME / _PASSWORD)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnSettings {
    pub url: String,
    pub username: String,
    pub password: String,
}

impl TurnSettings {
    /// Only returns settings when all three parts are present
    pub fn from_parts(
        url: Option<String>,
        username: Option<String>,
        password: Option<String>,
    ) -> Option<Self> {
        match (url, username, password) {
            (Some(url), Some(username), Some(password))
                if !url.is_empty() && !username.is_empty() && !password.is_empty() =>
            {
                Some(Self {
                    url,
                    username,
                    password,
                })
            }
            _ => None,
        }
    }

    pub fn to_ice_server(&self) -> IceServer {
        IceServer::turn(
            add_ice_url_scheme(&self.url, true),
            self.username.clone(),
            self.password.clone(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub default_ice_servers: Vec<IceServer>,
    pub turn: Option<TurnSettings>,
    /// Fetch additional servers from the ICE servers endpoint on start
    pub fetch_ice_servers: bool,
    pub candidate_delivery: CandidateDelivery,
    pub offer_profile: OfferProfile,
    #[serde(with = "duration_ms")]
    pub stop_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_ice_servers: DEFAULT_ICE_SERVERS.clone(),
            turn: None,
            fetch_ice_servers: true,
            candidate_delivery: CandidateDelivery::Trickle,
            offer_profile: OfferProfile::AudioVideo,
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }
}

impl SessionConfig {
    /// Static servers the fetched list is appended to
    pub fn base_ice_servers(&self) -> Vec<IceServer> {
        let mut servers = self.default_ice_servers.clone();
        if let Some(turn) = &self.turn {
            servers.push(turn.to_ice_server());
        }
        servers
    }

    pub fn validate(&self) -> Result<()> {
        validate_ice_servers(&self.base_ice_servers())
    }
}

/// Every server needs a URL; TURN servers need credentials
pub fn validate_ice_servers(servers: &[IceServer]) -> Result<()> {
    for server in servers {
        if server.urls.is_empty() || server.urls.iter().any(|u| u.trim().is_empty()) {
            return Err(ClientError::Config("ICE server URL cannot be empty".into()));
        }
        if server.is_turn() && (server.username.is_none() || server.credential.is_none()) {
            return Err(ClientError::Config(format!(
                "TURN server {} requires username and credential",
                server.urls.join(",")
            )));
        }
    }
    Ok(())
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
