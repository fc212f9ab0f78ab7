//! HTTP signaling against the viewer web server.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::Endpoints;
use crate::error::{ClientError, Result};
use crate::peer::types::{IceServer, OfferRequest, SessionDescription, SignalingMessage};

/// HTTP collaborator of the session: ICE server list, offer/answer, trickled candidates
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    async fn fetch_ice_servers(&self) -> Result<Vec<IceServer>>;

    async fn post_offer(&self, offer: &OfferRequest) -> Result<SessionDescription>;

    /// Returns the HTTP status of the signaling response
    async fn post_ice_candidate(&self, message: &SignalingMessage) -> Result<u16>;
}

/// `reqwest` implementation talking to the viewer's web server
#[derive(Debug, Clone)]
pub struct HttpSignaling {
    client: reqwest::Client,
    endpoints: Endpoints,
}

impl HttpSignaling {
    pub fn new(endpoints: Endpoints) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoints,
        }
    }

    /// No timeout is applied unless one is given here
    pub fn with_timeout(endpoints: Endpoints, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoints })
    }
}

#[async_trait]
impl SignalingTransport for HttpSignaling {
    async fn fetch_ice_servers(&self) -> Result<Vec<IceServer>> {
        let url = self.endpoints.ice_servers_url()?;
        let fetch = async {
            let response = self.client.get(url).send().await?.error_for_status()?;
            // a server with nothing to add may answer `null`
            let servers: Option<Vec<IceServer>> = response.json().await?;
            Ok::<_, reqwest::Error>(servers.unwrap_or_default())
        };
        let servers = fetch
            .await
            .map_err(|e| ClientError::IceServers(e.to_string()))?;
        info!(
            "Received following ice servers from webserver: {}",
            serde_json::to_string(&servers)?
        );
        Ok(servers)
    }

    async fn post_offer(&self, offer: &OfferRequest) -> Result<SessionDescription> {
        let url = self.endpoints.offer_url()?;
        debug!("Posting offer for peer {}", offer.peerid);
        let answer: SessionDescription = self
            .client
            .post(url)
            .json(offer)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!("Answer received: {:?}", answer.sdp_type);
        Ok(answer)
    }

    async fn post_ice_candidate(&self, message: &SignalingMessage) -> Result<u16> {
        let url = self.endpoints.ice_signaling_url()?;
        debug!("Sending new-ice-candidate: {}", serde_json::to_string(message)?);
        let response = self.client.post(url).json(message).send().await?;
        let status = response.status().as_u16();
        debug!("ice signaling response status code is: {}", status);
        Ok(status)
    }
}
