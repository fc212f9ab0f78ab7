//! Small helpers for peer ids and ICE URLs.

use rand::Rng;

/// Random token identifying one peer connection on the server side
pub fn random_peer_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

/// Prefix an ICE server URL with `turn:` or `stun:` when it has no scheme
pub fn add_ice_url_scheme(url: &str, turn: bool) -> String {
    if url.starts_with("turn:") || url.starts_with("turns:") || url.starts_with("stun:") {
        url.to_string()
    } else {
        let scheme = if turn { "turn:" } else { "stun:" };
        format!("{}{}", scheme, url)
    }
}
