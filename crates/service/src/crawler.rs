//! The crawler orchestrator: one cancellation signal, four actors.

use std::sync::Arc;

use sonda_peering::{Dialer, PeeringActor, StrategyConfig, StrategySignal};
use sonda_peers::{DiscoveredPeer, HostEvent, NetworkKind};
use sonda_store::{PeerBackend, PeerStore};
use tokio::{
    sync::mpsc::{self, Receiver},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;

use crate::{AggregatorConfig, DiscoveryIngest, HostIngest, IpLocator, MetricsAggregator};

/// Capacity of the strategy's identify-signal channel.
const SIGNAL_CHANNEL_SIZE: usize = 256;

/// An error that brings the whole crawl down.
#[derive(Debug, thiserror::Error)]
pub enum CrawlerError {
    /// An actor returned an error.
    #[error("actor failed: {0}")]
    Actor(String),
    /// An actor panicked or was aborted.
    #[error("actor join failed: {0}")]
    Join(String),
}

/// Configuration shared by the crawler's actors.
#[derive(Debug, Default, Clone, Copy)]
pub struct CrawlerConfig {
    /// Which network's client tables to classify against.
    pub network: NetworkKind,
    /// Strategy loop tuning.
    pub strategy: StrategyConfig,
    /// Aggregation cadence.
    pub aggregator: AggregatorConfig,
}

/// Wires the peering strategy, the two ingest actors and the metrics
/// aggregator onto one store and one cancellation signal, then runs them
/// to completion.
pub struct Crawler<B, D> {
    store: Arc<PeerStore<B>>,
    dialer: D,
    locator: Arc<dyn IpLocator>,
    config: CrawlerConfig,
    sketches: Receiver<DiscoveredPeer>,
    host_events: Receiver<HostEvent>,
    cancellation: CancellationToken,
}

impl<B, D> std::fmt::Debug for Crawler<B, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crawler").field("config", &self.config).finish()
    }
}

impl<B: PeerBackend, D: Dialer> Crawler<B, D> {
    /// Assembles a crawler over the given transports and store.
    pub fn new(
        store: Arc<PeerStore<B>>,
        dialer: D,
        locator: Arc<dyn IpLocator>,
        config: CrawlerConfig,
        sketches: Receiver<DiscoveredPeer>,
        host_events: Receiver<HostEvent>,
        cancellation: CancellationToken,
    ) -> Self {
        Self { store, dialer, locator, config, sketches, host_events, cancellation }
    }

    /// Runs every actor until shutdown. The first actor failure cancels
    /// the rest; clean exits (cancellation, closed streams) do not.
    pub async fn start(self) -> Result<(), CrawlerError> {
        let Self { store, dialer, locator, config, sketches, host_events, cancellation } = self;
        let (signal_tx, signal_rx) = mpsc::channel::<StrategySignal>(SIGNAL_CHANNEL_SIZE);

        let mut actors: JoinSet<Result<(), String>> = JoinSet::new();

        let strategy =
            PeeringActor::new(store.clone(), dialer, config.strategy, cancellation.clone());
        actors.spawn(async move {
            strategy.start(signal_rx).await.map_err(|e| format!("peering strategy: {e}"))
        });

        let discovery_ingest =
            DiscoveryIngest::new(store.clone(), locator, sketches, cancellation.clone());
        actors.spawn(async move {
            discovery_ingest.start().await.map_err(|e| format!("discovery ingest: {e}"))
        });

        let host_ingest = HostIngest::new(
            store.clone(),
            config.network,
            host_events,
            signal_tx,
            cancellation.clone(),
        );
        actors
            .spawn(async move { host_ingest.start().await.map_err(|e| format!("host ingest: {e}")) });

        let aggregator = MetricsAggregator::new(store, config.aggregator, cancellation.clone());
        actors
            .spawn(async move { aggregator.start().await.map_err(|e| format!("aggregator: {e}")) });

        let mut failure = None;
        while let Some(joined) = actors.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(target: "crawler", %err, "actor failed, shutting down");
                    cancellation.cancel();
                    failure.get_or_insert(CrawlerError::Actor(err));
                }
                Err(err) => {
                    error!(target: "crawler", %err, "actor join failed, shutting down");
                    cancellation.cancel();
                    failure.get_or_insert(CrawlerError::Join(err.to_string()));
                }
            }
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NoopLocator;
    use async_trait::async_trait;
    use libp2p::Multiaddr;
    use libp2p_identity::PeerId;
    use sonda_peering::DialFailure;
    use sonda_store::MemoryBackend;
    use std::time::Duration;

    #[derive(Clone)]
    struct RefusingDialer {
        local: PeerId,
    }

    #[async_trait]
    impl Dialer for RefusingDialer {
        fn local_peer_id(&self) -> PeerId {
            self.local
        }

        async fn dial(&self, _peer: PeerId, _addrs: Vec<Multiaddr>) -> Result<(), DialFailure> {
            Err(DialFailure::new("connection refused"))
        }
    }

    #[tokio::test]
    async fn test_crawler_processes_sketch_and_shuts_down() {
        let store = Arc::new(PeerStore::new(MemoryBackend::new()));
        let (sketch_tx, sketch_rx) = mpsc::channel(16);
        let (_event_tx, event_rx) = mpsc::channel(16);
        let cancellation = CancellationToken::new();

        let crawler = Crawler::new(
            store.clone(),
            RefusingDialer { local: PeerId::random() },
            Arc::new(NoopLocator),
            CrawlerConfig::default(),
            sketch_rx,
            event_rx,
            cancellation.clone(),
        );
        let handle = tokio::spawn(crawler.start());

        let peer = PeerId::random();
        sketch_tx
            .send(DiscoveredPeer {
                peer,
                addresses: vec!["/ip4/8.8.8.8/tcp/9000".parse().unwrap()],
                enr: None,
                ip: None,
            })
            .await
            .unwrap();

        // Wait for the sketch to land in the store.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if store.get(&peer).unwrap().is_some() {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "sketch never ingested");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        cancellation.cancel();
        handle.await.unwrap().unwrap();
    }
}
