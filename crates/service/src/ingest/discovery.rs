//! Discovery ingest: merges freshly discovered peer sketches into the
//! store, with best-effort geolocation on the way in.

use std::sync::Arc;

use sonda_peers::{DiscoveredPeer, PeerRecord};
use sonda_store::{PeerBackend, PeerStore};
use tokio::sync::mpsc::Receiver;
use tokio_util::sync::CancellationToken;

use crate::{IngestError, IpLocator, Metrics};

/// Consumes the discovery sketch stream and writes enriched records into
/// the store. The stream side is bounded and drop-newest, so this actor
/// can never exert backpressure on the discovery transport.
pub struct DiscoveryIngest<B> {
    store: Arc<PeerStore<B>>,
    locator: Arc<dyn IpLocator>,
    sketches: Receiver<DiscoveredPeer>,
    cancellation: CancellationToken,
}

impl<B> std::fmt::Debug for DiscoveryIngest<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryIngest").finish()
    }
}

impl<B: PeerBackend> DiscoveryIngest<B> {
    /// Creates the ingest actor over the given sketch stream.
    pub fn new(
        store: Arc<PeerStore<B>>,
        locator: Arc<dyn IpLocator>,
        sketches: Receiver<DiscoveredPeer>,
        cancellation: CancellationToken,
    ) -> Self {
        Self { store, locator, sketches, cancellation }
    }

    /// Runs the ingest loop until cancellation or stream end.
    pub async fn start(mut self) -> Result<(), IngestError> {
        info!(target: "ingest::discovery", "starting discovery ingest");
        let cancellation = self.cancellation.clone();
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => break,
                sketch = self.sketches.recv() => match sketch {
                    Some(sketch) => self.ingest(sketch).await?,
                    None => break,
                },
            }
        }
        info!(target: "ingest::discovery", "discovery ingest stopped");
        Ok(())
    }

    /// Builds an enriched record from one sketch and merges it in.
    async fn ingest(&self, sketch: DiscoveredPeer) -> Result<(), IngestError> {
        debug!(target: "ingest::discovery", peer = %sketch.peer, addrs = sketch.addresses.len(), "discovered peer");

        let mut record = PeerRecord::new(sketch.peer);
        record.addresses = sketch.addresses;
        record.enr = sketch.enr;

        let public_ip = sketch.ip.or_else(|| record.public_ip());
        if let Some(ip) = public_ip {
            record.ip = Some(ip);
            match self.locator.locate(ip).await {
                Ok(location) => {
                    record.country = location.country;
                    record.country_code = location.country_code;
                    record.city = location.city;
                }
                Err(err) => {
                    debug!(target: "ingest::discovery", peer = %record.peer_id, %ip, %err, "geolocation failed");
                }
            }
        }

        self.store.store_or_update(record)?;
        sonda_macros::inc!(counter, Metrics::DISCOVERED_PEERS);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GeoError, IpLocation, NoopLocator};
    use async_trait::async_trait;
    use libp2p_identity::PeerId;
    use sonda_store::MemoryBackend;
    use std::net::IpAddr;
    use tokio::sync::mpsc;

    struct FixedLocator(IpLocation);

    #[async_trait]
    impl IpLocator for FixedLocator {
        async fn locate(&self, _ip: IpAddr) -> Result<IpLocation, GeoError> {
            Ok(self.0.clone())
        }
    }

    fn sketch(peer: PeerId) -> DiscoveredPeer {
        DiscoveredPeer {
            peer,
            addresses: vec!["/ip4/8.8.8.8/tcp/9000".parse().unwrap()],
            enr: Some("enr:-abc".to_string()),
            ip: None,
        }
    }

    #[tokio::test]
    async fn test_sketch_creates_enriched_record() {
        let store = Arc::new(PeerStore::new(MemoryBackend::new()));
        let locator = Arc::new(FixedLocator(IpLocation {
            country: "Germany".to_string(),
            country_code: "DE".to_string(),
            city: "Berlin".to_string(),
        }));
        let (tx, rx) = mpsc::channel(8);
        let cancellation = CancellationToken::new();
        let ingest =
            DiscoveryIngest::new(store.clone(), locator, rx, cancellation.clone());

        let peer = PeerId::random();
        tx.send(sketch(peer)).await.unwrap();
        drop(tx);
        ingest.start().await.unwrap();

        let record = store.get(&peer).unwrap().unwrap();
        assert_eq!(record.addresses.len(), 1);
        assert_eq!(record.ip, Some("8.8.8.8".parse().unwrap()));
        assert_eq!(record.country_code, "DE");
        assert!(!record.deprecated);
        assert_eq!(record.attempt_count, 0);
    }

    #[tokio::test]
    async fn test_geolocation_failure_never_blocks_ingest() {
        let store = Arc::new(PeerStore::new(MemoryBackend::new()));
        let (tx, rx) = mpsc::channel(8);
        let cancellation = CancellationToken::new();
        let ingest = DiscoveryIngest::new(
            store.clone(),
            Arc::new(NoopLocator),
            rx,
            cancellation.clone(),
        );

        let peer = PeerId::random();
        tx.send(sketch(peer)).await.unwrap();
        drop(tx);
        ingest.start().await.unwrap();

        let record = store.get(&peer).unwrap().unwrap();
        assert_eq!(record.ip, Some("8.8.8.8".parse().unwrap()));
        assert!(record.country.is_empty());
    }

    #[tokio::test]
    async fn test_rediscovery_refreshes_addresses_without_losing_facts() {
        let store = Arc::new(PeerStore::new(MemoryBackend::new()));
        let peer = PeerId::random();
        let mut existing = PeerRecord::new(peer);
        existing.user_agent = "Lighthouse/v1.5.1".to_string();
        store.store_or_update(existing).unwrap();

        let (tx, rx) = mpsc::channel(8);
        let cancellation = CancellationToken::new();
        let ingest = DiscoveryIngest::new(
            store.clone(),
            Arc::new(NoopLocator),
            rx,
            cancellation.clone(),
        );
        tx.send(sketch(peer)).await.unwrap();
        drop(tx);
        ingest.start().await.unwrap();

        let record = store.get(&peer).unwrap().unwrap();
        assert_eq!(record.user_agent, "Lighthouse/v1.5.1");
        assert_eq!(record.addresses.len(), 1);
    }
}
