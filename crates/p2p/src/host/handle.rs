//! Message-passing handle to the running host driver.

use async_trait::async_trait;
use libp2p::Multiaddr;
use libp2p_identity::PeerId;
use sonda_peering::{DialFailure, Dialer};
use tokio::sync::{mpsc, oneshot};

/// A request from a [`P2pHandle`] to the host driver.
#[derive(Debug)]
pub(crate) enum HostCommand {
    /// Dial `peer` at `addrs`, replying with the outcome.
    Dial {
        /// The peer to dial.
        peer: PeerId,
        /// Candidate addresses.
        addrs: Vec<Multiaddr>,
        /// Resolved once the connection is established or failed.
        reply: oneshot::Sender<Result<(), DialFailure>>,
    },
}

/// A cloneable handle to the host driver.
///
/// Provides lock-free access to the swarm by relaying requests over a
/// channel; the driver owns the swarm exclusively.
#[derive(Debug, Clone)]
pub struct P2pHandle {
    local_peer_id: PeerId,
    commands: mpsc::Sender<HostCommand>,
}

impl P2pHandle {
    pub(crate) const fn new(local_peer_id: PeerId, commands: mpsc::Sender<HostCommand>) -> Self {
        Self { local_peer_id, commands }
    }
}

#[async_trait]
impl Dialer for P2pHandle {
    fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    async fn dial(&self, peer: PeerId, addrs: Vec<Multiaddr>) -> Result<(), DialFailure> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(HostCommand::Dial { peer, addrs, reply: reply_tx })
            .await
            .map_err(|_| DialFailure::new("host command channel closed"))?;
        reply_rx.await.map_err(|_| DialFailure::new("host dropped dial request"))?
    }
}
