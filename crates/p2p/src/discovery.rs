//! The discv5 discovery driver.
//!
//! Owns a [`Discv5`] service, seeds it with bootnode ENRs, then queries
//! for random node ids on an interval. Every usable result is pushed into
//! a bounded sketch channel; when the consumer falls behind, the newest
//! sketches are dropped rather than blocking the discovery service.

use std::{
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use discv5::{
    ConfigBuilder, Discv5, Enr, ListenConfig,
    enr::{CombinedKey, NodeId},
};
use libp2p_identity::Keypair;
use sonda_peers::DiscoveredPeer;
use tokio::sync::mpsc::{self, Receiver, Sender, error::TrySendError};
use tokio_util::sync::CancellationToken;

use crate::sketch_from_enr;

/// How many sketches to buffer between the driver and the ingest.
const SKETCH_CHANNEL_SIZE: usize = 256;

/// Default spacing between random find-node queries.
const DEFAULT_FIND_INTERVAL: Duration = Duration::from_secs(10);

/// An error building the discovery driver.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryBuilderError {
    /// No keypair was provided.
    #[error("missing keypair")]
    MissingKeypair,
    /// No listen address was provided.
    #[error("listen address not set")]
    ListenAddrNotSet,
    /// The keypair is not a secp256k1 key, which discv5 requires here.
    #[error("keypair is not secp256k1")]
    UnsupportedKeyType,
    /// The local ENR could not be built.
    #[error("failed to build local ENR: {0}")]
    Enr(String),
    /// The discv5 service could not be constructed.
    #[error("failed to construct discv5: {0}")]
    Discv5(String),
}

/// An error that aborts the running discovery driver.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// The discv5 service failed to start.
    #[error("failed to start discovery service: {0}")]
    Start(String),
}

/// A builder for the [`DiscoveryDriver`].
#[derive(Debug, Default)]
pub struct DiscoveryBuilder {
    keypair: Option<Keypair>,
    listen: Option<SocketAddr>,
    bootnodes: Vec<Enr>,
    interval: Option<Duration>,
    cancellation: Option<CancellationToken>,
}

impl DiscoveryBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the node's keypair. Must be secp256k1.
    pub fn with_keypair(mut self, keypair: Keypair) -> Self {
        self.keypair = Some(keypair);
        self
    }

    /// Sets the UDP socket the discovery service listens on.
    pub fn with_listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen = Some(addr);
        self
    }

    /// Seeds the routing table with bootnode ENRs.
    pub fn with_bootnodes(mut self, bootnodes: Vec<Enr>) -> Self {
        self.bootnodes = bootnodes;
        self
    }

    /// Sets the spacing between random find-node queries.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Sets the shutdown signal the driver observes.
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = Some(cancellation);
        self
    }

    /// Builds the driver and the receiving half of the sketch stream.
    pub fn build(self) -> Result<(DiscoveryDriver, Receiver<DiscoveredPeer>), DiscoveryBuilderError> {
        let keypair = self.keypair.ok_or(DiscoveryBuilderError::MissingKeypair)?;
        let listen = self.listen.ok_or(DiscoveryBuilderError::ListenAddrNotSet)?;

        let secp = keypair
            .try_into_secp256k1()
            .map_err(|_| DiscoveryBuilderError::UnsupportedKeyType)?;
        let mut secret = secp.secret().to_bytes();
        let enr_key = CombinedKey::secp256k1_from_bytes(&mut secret)
            .map_err(|e| DiscoveryBuilderError::Enr(format!("{e:?}")))?;

        let mut builder = Enr::builder();
        match listen.ip() {
            IpAddr::V4(ip) => {
                if !ip.is_unspecified() {
                    builder.ip4(ip);
                }
                builder.udp4(listen.port());
            }
            IpAddr::V6(ip) => {
                if !ip.is_unspecified() {
                    builder.ip6(ip);
                }
                builder.udp6(listen.port());
            }
        }
        let enr = builder.build(&enr_key).map_err(|e| DiscoveryBuilderError::Enr(format!("{e:?}")))?;

        let listen_config = match listen {
            SocketAddr::V4(v4) => ListenConfig::Ipv4 { ip: *v4.ip(), port: v4.port() },
            SocketAddr::V6(v6) => ListenConfig::Ipv6 { ip: *v6.ip(), port: v6.port() },
        };
        let config = ConfigBuilder::new(listen_config).build();
        let discv5 = Discv5::new(enr, enr_key, config)
            .map_err(|e| DiscoveryBuilderError::Discv5(e.to_string()))?;

        let (sketch_tx, sketch_rx) = mpsc::channel(SKETCH_CHANNEL_SIZE);
        let driver = DiscoveryDriver {
            discv5,
            bootnodes: self.bootnodes,
            interval: self.interval.unwrap_or(DEFAULT_FIND_INTERVAL),
            sketches: sketch_tx,
            cancellation: self.cancellation.unwrap_or_default(),
        };
        Ok((driver, sketch_rx))
    }
}

/// The discovery driver: runs the discv5 service and streams peer
/// sketches until cancellation.
pub struct DiscoveryDriver {
    discv5: Discv5,
    bootnodes: Vec<Enr>,
    interval: Duration,
    sketches: Sender<DiscoveredPeer>,
    cancellation: CancellationToken,
}

impl std::fmt::Debug for DiscoveryDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryDriver")
            .field("bootnodes", &self.bootnodes.len())
            .field("interval", &self.interval)
            .finish()
    }
}

impl DiscoveryDriver {
    /// Returns a new [`DiscoveryBuilder`].
    pub fn builder() -> DiscoveryBuilder {
        DiscoveryBuilder::new()
    }

    /// Runs the discovery loop until cancellation.
    pub async fn start(mut self) -> Result<(), DiscoveryError> {
        self.discv5.start().await.map_err(|e| DiscoveryError::Start(e.to_string()))?;

        for bootnode in self.bootnodes.drain(..) {
            if let Err(err) = self.discv5.add_enr(bootnode) {
                warn!(target: "p2p::discovery", %err, "failed to add bootnode ENR");
            }
        }
        info!(target: "p2p::discovery", interval = ?self.interval, "started peer discovery");

        loop {
            tokio::select! {
                _ = self.cancellation.cancelled() => {
                    info!(target: "p2p::discovery", "discovery stopped");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.interval) => {}
            }

            match self.discv5.find_node(NodeId::random()).await {
                Ok(nodes) => {
                    debug!(target: "p2p::discovery", found = nodes.len(), "find-node query finished");
                    for enr in &nodes {
                        let Some(sketch) = sketch_from_enr(enr) else { continue };
                        match self.sketches.try_send(sketch) {
                            Ok(()) => {}
                            Err(TrySendError::Full(dropped)) => {
                                // Ingest is behind; newest-wins is fine here,
                                // discovery will resurface the peer.
                                debug!(target: "p2p::discovery", peer = %dropped.peer, "sketch channel full, dropping");
                            }
                            Err(TrySendError::Closed(_)) => return Ok(()),
                        }
                    }
                }
                Err(err) => {
                    warn!(target: "p2p::discovery", %err, "discovery query failed");
                }
            }
        }
    }
}
