//! The boundary the strategy dials through.

use async_trait::async_trait;
use libp2p::Multiaddr;
use libp2p_identity::PeerId;

/// A failed dial, carrying the raw transport error text.
///
/// The text is kept verbatim so the error classifier can fold it into a
/// category; the strategy never interprets it directly.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct DialFailure {
    /// The raw, classifiable error text.
    pub message: String,
}

impl DialFailure {
    /// Wraps a raw error message.
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// The host transport as the strategy sees it.
///
/// Implemented by the libp2p swarm handle in production and by scripted
/// mocks in tests. Implementations are cheap to clone: one clone travels
/// into every spawned dial task.
#[async_trait]
pub trait Dialer: Clone + Send + Sync + 'static {
    /// The local host identity, used to skip self-dials.
    fn local_peer_id(&self) -> PeerId;

    /// Attempts a connection to `peer` at `addrs`.
    ///
    /// Resolves once the connection is established or the transport gives
    /// up; the strategy applies its own timeout on top.
    async fn dial(&self, peer: PeerId, addrs: Vec<Multiaddr>) -> Result<(), DialFailure>;
}
