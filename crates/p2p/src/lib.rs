//! # sonda-p2p
//!
//! The transport edge of the sonda crawler: a discv5 discovery driver
//! that streams freshly discovered peer sketches, and a libp2p swarm
//! driver (gossipsub + identify + ping) that dials peers, observes
//! connection lifecycle and gossip traffic, and reports everything as
//! [`HostEvent`]s.
//!
//! Both drivers follow the same shape: a builder producing a driver that
//! owns the underlying service, plus channels carrying data out. The
//! [`P2pHandle`] command handle implements the peering strategy's
//! [`Dialer`](sonda_peering::Dialer) boundary through message passing, so
//! nothing outside the driver ever touches the swarm directly.
//!
//! [`HostEvent`]: sonda_peers::HostEvent

#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

#[macro_use]
extern crate tracing;

/// Peer discovery over discv5.
mod discovery;
pub use discovery::{DiscoveryBuilder, DiscoveryBuilderError, DiscoveryDriver, DiscoveryError};

/// The libp2p swarm host.
mod host;
pub use host::{
    CrawlerBehaviour, HostBuilder, HostBuilderError, HostDriver, HostError, P2pHandle,
};

/// ENR conversions shared by discovery and the dial path.
mod enr;
pub use enr::{EnrConversionError, enr_to_multiaddrs, enr_to_peer_id, sketch_from_enr};
