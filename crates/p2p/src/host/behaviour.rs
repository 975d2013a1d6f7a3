//! The network behaviour stack of the crawler host.

use libp2p::{gossipsub, identify, ping, swarm::NetworkBehaviour};

/// The behaviours the crawler runs on every connection: gossipsub to
/// observe topic traffic, identify to learn who the peer is, and ping to
/// keep a current round-trip time.
#[derive(NetworkBehaviour)]
pub struct CrawlerBehaviour {
    /// Gossip mesh participation, receive-only from the crawler's side.
    pub gossipsub: gossipsub::Behaviour,
    /// The identify exchange.
    pub identify: identify::Behaviour,
    /// Periodic liveness/latency probing.
    pub ping: ping::Behaviour,
}
