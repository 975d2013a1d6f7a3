//! Boundary types exchanged between the transports and the crawler core.
//!
//! The discovery and host drivers produce these; the ingest actors and the
//! peering strategy consume them. Keeping them here keeps the core crates
//! free of any dependency on a concrete transport.

use std::{net::IpAddr, time::Duration, time::SystemTime};

use libp2p::Multiaddr;
use libp2p_identity::PeerId;
use serde::{Deserialize, Serialize};

use crate::{
    BeaconMetadata, BeaconStatus, ClientInfo,
    serde_util::{multiaddr_vec, peer_id},
};

/// The networks the crawler knows how to classify clients for.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum NetworkKind {
    /// The Ethereum consensus layer.
    #[default]
    Eth2,
    /// The IPFS network.
    Ipfs,
    /// The Filecoin network.
    Filecoin,
}

/// The direction of an observed connection.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Direction {
    /// The remote dialed us.
    Inbound,
    /// We dialed the remote.
    Outbound,
    /// The direction could not be determined.
    #[default]
    Unknown,
}

/// A freshly discovered peer sketch, as emitted by the discovery transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredPeer {
    /// The discovered peer identity.
    #[serde(with = "peer_id")]
    pub peer: PeerId,
    /// Dialable addresses derived from the peer's routing record.
    #[serde(with = "multiaddr_vec")]
    pub addresses: Vec<Multiaddr>,
    /// The signed routing record itself, base64 encoded, when available.
    pub enr: Option<String>,
    /// A publicly routable IP extracted from the address set, when found.
    pub ip: Option<IpAddr>,
}

/// Facts learned from one identify exchange with a peer.
#[derive(Debug, Clone, Default)]
pub struct IdentifyFacts {
    /// The raw user-agent string advertised by the peer.
    pub user_agent: Option<String>,
    /// The client name/version/os derived from the user agent.
    pub client: Option<ClientInfo>,
    /// Protocols the peer speaks.
    pub protocols: Vec<String>,
    /// The protocol version string advertised by the peer.
    pub protocol_version: Option<String>,
    /// Round-trip time measured alongside the exchange, if any.
    pub latency: Option<Duration>,
    /// Whether the exchange completed successfully.
    pub succeeded: bool,
    /// Beacon chain status, for eth2 peers.
    pub beacon_status: Option<BeaconStatus>,
    /// Beacon chain metadata, for eth2 peers.
    pub beacon_metadata: Option<BeaconMetadata>,
}

/// A notification emitted by the host transport.
#[derive(Debug, Clone)]
pub enum HostEvent {
    /// A connection to a peer was established.
    Connected {
        /// The remote peer.
        peer: PeerId,
        /// Who initiated the connection.
        direction: Direction,
        /// When the connection was observed.
        at: SystemTime,
    },
    /// The last connection to a peer was closed.
    Disconnected {
        /// The remote peer.
        peer: PeerId,
        /// When the disconnection was observed.
        at: SystemTime,
    },
    /// An identify exchange with a peer completed.
    Identified {
        /// The remote peer.
        peer: PeerId,
        /// What the exchange revealed.
        facts: Box<IdentifyFacts>,
        /// When the exchange completed.
        at: SystemTime,
    },
    /// An identify exchange with a peer failed.
    IdentifyFailed {
        /// The remote peer.
        peer: PeerId,
        /// When the failure was observed.
        at: SystemTime,
    },
    /// An application message was received over a gossip topic.
    Message {
        /// The peer the message was received from.
        peer: PeerId,
        /// The gossip topic the message arrived on.
        topic: String,
        /// When the message was received.
        at: SystemTime,
    },
    /// A new round-trip time measurement for a connected peer.
    Latency {
        /// The remote peer.
        peer: PeerId,
        /// The measured round-trip time.
        rtt: Duration,
    },
}

impl HostEvent {
    /// The peer this event concerns.
    pub const fn peer(&self) -> &PeerId {
        match self {
            Self::Connected { peer, .. }
            | Self::Disconnected { peer, .. }
            | Self::Identified { peer, .. }
            | Self::IdentifyFailed { peer, .. }
            | Self::Message { peer, .. }
            | Self::Latency { peer, .. } => peer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_network_kind_parses_case_insensitively() {
        assert_eq!(NetworkKind::from_str("eth2").ok(), Some(NetworkKind::Eth2));
        assert_eq!(NetworkKind::from_str("IPFS").ok(), Some(NetworkKind::Ipfs));
        assert_eq!(NetworkKind::from_str("Filecoin").ok(), Some(NetworkKind::Filecoin));
        assert!(NetworkKind::from_str("solana").is_err());
    }

    #[test]
    fn test_discovered_peer_round_trips_through_json() {
        let sketch = DiscoveredPeer {
            peer: PeerId::random(),
            addresses: vec!["/ip4/1.2.3.4/tcp/9000".parse().unwrap()],
            enr: Some("enr:-abc".to_string()),
            ip: Some("1.2.3.4".parse().unwrap()),
        };
        let json = serde_json::to_string(&sketch).unwrap();
        let back: DiscoveredPeer = serde_json::from_str(&json).unwrap();
        assert_eq!(back.peer, sketch.peer);
        assert_eq!(back.addresses, sketch.addresses);
        assert_eq!(back.ip, sketch.ip);
    }
}
