//! Host ingest: identify results, connection lifecycle, gossip traffic
//! and latency measurements, folded into the store and relayed to the
//! peering strategy where they affect backoff.

use std::sync::Arc;

use sonda_peering::StrategySignal;
use sonda_peers::{HostEvent, IdentifyFacts, NetworkKind, parse_user_agent};
use sonda_store::{PeerBackend, PeerStore, StoreError};
use tokio::sync::mpsc::{Receiver, Sender};
use tokio_util::sync::CancellationToken;

use crate::{IngestError, Metrics};

/// Consumes the host event stream.
#[derive(Debug)]
pub struct HostIngest<B> {
    store: Arc<PeerStore<B>>,
    network: NetworkKind,
    events: Receiver<HostEvent>,
    signals: Sender<StrategySignal>,
    cancellation: CancellationToken,
}

impl<B: PeerBackend> HostIngest<B> {
    /// Creates the ingest actor over the given host event stream.
    pub fn new(
        store: Arc<PeerStore<B>>,
        network: NetworkKind,
        events: Receiver<HostEvent>,
        signals: Sender<StrategySignal>,
        cancellation: CancellationToken,
    ) -> Self {
        Self { store, network, events, signals, cancellation }
    }

    /// Runs the ingest loop until cancellation or stream end.
    pub async fn start(mut self) -> Result<(), IngestError> {
        info!(target: "ingest::host", network = %self.network, "starting host ingest");
        let cancellation = self.cancellation.clone();
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => break,
                event = self.events.recv() => match event {
                    Some(event) => self.handle_event(event).await?,
                    None => break,
                },
            }
        }
        info!(target: "ingest::host", "host ingest stopped");
        Ok(())
    }

    async fn handle_event(&self, event: HostEvent) -> Result<(), IngestError> {
        match event {
            HostEvent::Connected { peer, direction, at } => {
                debug!(target: "ingest::host", %peer, %direction, "peer connected");
                self.tolerate_unknown(self.store.record_connection(&peer, direction, at))?;
            }
            HostEvent::Disconnected { peer, at } => {
                debug!(target: "ingest::host", %peer, "peer disconnected");
                self.tolerate_unknown(self.store.record_disconnection(&peer, at))?;
            }
            HostEvent::Identified { peer, facts, at } => {
                let mut facts: IdentifyFacts = *facts;
                facts.succeeded = true;
                if let Some(user_agent) = facts.user_agent.as_deref() {
                    facts.client = Some(parse_user_agent(self.network, user_agent));
                }
                debug!(
                    target: "ingest::host",
                    %peer,
                    client = facts.client.as_ref().map(|c| c.name.as_str()).unwrap_or_default(),
                    "peer identified"
                );
                self.store.record_identification(&peer, facts, at)?;
                let _ = self
                    .signals
                    .send(StrategySignal::Identify { peer, succeeded: true, at })
                    .await;
            }
            HostEvent::IdentifyFailed { peer, at } => {
                debug!(target: "ingest::host", %peer, "identify failed");
                let facts = IdentifyFacts { succeeded: false, ..Default::default() };
                self.store.record_identification(&peer, facts, at)?;
                let _ = self
                    .signals
                    .send(StrategySignal::Identify { peer, succeeded: false, at })
                    .await;
            }
            HostEvent::Message { peer, topic, at } => {
                self.store.record_message(&peer, &topic, at)?;
                sonda_macros::inc!(counter, Metrics::GOSSIP_MESSAGES, "topic", topic);
            }
            HostEvent::Latency { peer, rtt } => {
                self.tolerate_unknown(self.store.record_latency(&peer, rtt))?;
            }
        }
        Ok(())
    }

    /// Connection-path events for peers the store has never seen are
    /// warned about and skipped; anything else propagates.
    fn tolerate_unknown(&self, result: Result<(), StoreError>) -> Result<(), IngestError> {
        match result {
            Ok(()) => Ok(()),
            Err(StoreError::UnknownPeer(peer)) => {
                warn!(target: "ingest::host", %peer, "dropping event for unknown peer");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libp2p_identity::PeerId;
    use sonda_peers::{Direction, PeerRecord};
    use sonda_store::MemoryBackend;
    use std::time::{Duration, SystemTime};
    use tokio::sync::mpsc;

    struct Fixture {
        store: Arc<PeerStore<MemoryBackend>>,
        events: mpsc::Sender<HostEvent>,
        signals: mpsc::Receiver<StrategySignal>,
        ingest: HostIngest<MemoryBackend>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(PeerStore::new(MemoryBackend::new()));
        let (event_tx, event_rx) = mpsc::channel(16);
        let (signal_tx, signal_rx) = mpsc::channel(16);
        let ingest = HostIngest::new(
            store.clone(),
            NetworkKind::Eth2,
            event_rx,
            signal_tx,
            CancellationToken::new(),
        );
        Fixture { store, events: event_tx, signals: signal_rx, ingest }
    }

    #[tokio::test]
    async fn test_identify_parses_user_agent_and_signals_strategy() {
        let mut fx = fixture();
        let peer = PeerId::random();
        let at = SystemTime::now();

        let facts = IdentifyFacts {
            user_agent: Some("Lighthouse/v1.5.1-b0ac346/x86_64-linux".to_string()),
            succeeded: true,
            ..Default::default()
        };
        fx.events
            .send(HostEvent::Identified { peer, facts: Box::new(facts), at })
            .await
            .unwrap();
        drop(fx.events);
        fx.ingest.start().await.unwrap();

        let record = fx.store.get(&peer).unwrap().unwrap();
        assert!(record.metadata_succeeded);
        assert_eq!(record.client_name, "lighthouse");
        assert_eq!(record.client_version, "v1.5.1");

        match fx.signals.recv().await {
            Some(StrategySignal::Identify { peer: signalled, succeeded, .. }) => {
                assert_eq!(signalled, peer);
                assert!(succeeded);
            }
            None => panic!("expected an identify signal"),
        }
    }

    #[tokio::test]
    async fn test_identify_failure_records_requested_only() {
        let mut fx = fixture();
        let peer = PeerId::random();
        fx.events
            .send(HostEvent::IdentifyFailed { peer, at: SystemTime::now() })
            .await
            .unwrap();
        drop(fx.events);
        fx.ingest.start().await.unwrap();

        let record = fx.store.get(&peer).unwrap().unwrap();
        assert!(record.metadata_requested);
        assert!(!record.metadata_succeeded);

        match fx.signals.recv().await {
            Some(StrategySignal::Identify { succeeded, .. }) => assert!(!succeeded),
            None => panic!("expected an identify signal"),
        }
    }

    #[tokio::test]
    async fn test_connection_events_for_unknown_peer_are_skipped() {
        let fx = fixture();
        let peer = PeerId::random();
        fx.events
            .send(HostEvent::Connected {
                peer,
                direction: Direction::Inbound,
                at: SystemTime::now(),
            })
            .await
            .unwrap();
        drop(fx.events);
        fx.ingest.start().await.unwrap();

        // The unknown peer is skipped, not created.
        assert!(fx.store.get(&peer).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_connection_cycle_and_messages_recorded() {
        let fx = fixture();
        let peer = PeerId::random();
        fx.store.store_or_update(PeerRecord::new(peer)).unwrap();

        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1000);
        fx.events
            .send(HostEvent::Connected { peer, direction: Direction::Outbound, at: t0 })
            .await
            .unwrap();
        fx.events
            .send(HostEvent::Message { peer, topic: "beacon_block".to_string(), at: t0 })
            .await
            .unwrap();
        fx.events
            .send(HostEvent::Latency { peer, rtt: Duration::from_millis(120) })
            .await
            .unwrap();
        fx.events
            .send(HostEvent::Disconnected { peer, at: t0 + Duration::from_secs(60) })
            .await
            .unwrap();
        drop(fx.events);
        fx.ingest.start().await.unwrap();

        let record = fx.store.get(&peer).unwrap().unwrap();
        assert_eq!(record.connections.len(), 1);
        assert_eq!(record.disconnections.len(), 1);
        assert_eq!(record.connected_time(), Duration::from_secs(60));
        assert_eq!(record.message_metrics["beacon_block"].count, 1);
        assert_eq!(record.latency, Some(Duration::from_millis(120)));
        assert!(!record.is_connected());
    }
}
