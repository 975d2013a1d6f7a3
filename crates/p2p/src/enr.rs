//! Conversions from ENRs to libp2p identities and addresses.

use std::net::IpAddr;

use discv5::{
    Enr,
    enr::{CombinedPublicKey, EnrPublicKey},
};
use libp2p::{Multiaddr, multiaddr::Protocol};
use libp2p_identity::PeerId;
use sonda_peers::DiscoveredPeer;

/// An ENR whose public key cannot be mapped to a libp2p identity.
#[derive(Debug, thiserror::Error)]
pub enum EnrConversionError {
    /// The key bytes did not decode as a libp2p public key.
    #[error("invalid public key in ENR: {0}")]
    InvalidKey(String),
}

/// Derives the libp2p [`PeerId`] for the identity signing an ENR.
pub fn enr_to_peer_id(enr: &Enr) -> Result<PeerId, EnrConversionError> {
    let public_key = enr.public_key();
    let encoded = public_key.encode();
    let key = match public_key {
        CombinedPublicKey::Secp256k1(_) => {
            libp2p_identity::secp256k1::PublicKey::try_from_bytes(&encoded)
                .map(libp2p_identity::PublicKey::from)
                .map_err(|e| EnrConversionError::InvalidKey(e.to_string()))?
        }
        CombinedPublicKey::Ed25519(_) => {
            libp2p_identity::ed25519::PublicKey::try_from_bytes(&encoded)
                .map(libp2p_identity::PublicKey::from)
                .map_err(|e| EnrConversionError::InvalidKey(e.to_string()))?
        }
    };
    Ok(key.to_peer_id())
}

/// Builds dialable TCP multiaddresses from an ENR's address fields.
pub fn enr_to_multiaddrs(enr: &Enr) -> Vec<Multiaddr> {
    let mut addrs = Vec::new();
    if let (Some(ip), Some(tcp)) = (enr.ip4(), enr.tcp4()) {
        let mut addr = Multiaddr::empty();
        addr.push(Protocol::Ip4(ip));
        addr.push(Protocol::Tcp(tcp));
        addrs.push(addr);
    }
    if let (Some(ip), Some(tcp)) = (enr.ip6(), enr.tcp6()) {
        let mut addr = Multiaddr::empty();
        addr.push(Protocol::Ip6(ip));
        addr.push(Protocol::Tcp(tcp));
        addrs.push(addr);
    }
    addrs
}

/// Turns an ENR into a [`DiscoveredPeer`] sketch.
///
/// Returns `None` for ENRs without a dialable TCP endpoint or with an
/// unusable key; discovery yields plenty of records that only advertise
/// UDP, and the crawler cannot do anything with those.
pub fn sketch_from_enr(enr: &Enr) -> Option<DiscoveredPeer> {
    let addresses = enr_to_multiaddrs(enr);
    if addresses.is_empty() {
        return None;
    }
    let peer = match enr_to_peer_id(enr) {
        Ok(peer) => peer,
        Err(err) => {
            debug!(target: "p2p::enr", %err, "skipping ENR with unusable key");
            return None;
        }
    };
    let ip = enr.ip4().map(IpAddr::V4).or_else(|| enr.ip6().map(IpAddr::V6));
    Some(DiscoveredPeer { peer, addresses, enr: Some(enr.to_base64()), ip })
}
