//! The host driver: owns the swarm and translates its events.

use std::{collections::HashMap, time::SystemTime};

use futures::StreamExt;
use libp2p::{
    Multiaddr, Swarm, gossipsub, identify, ping,
    swarm::{
        SwarmEvent,
        dial_opts::{DialOpts, PeerCondition},
    },
};
use libp2p_identity::PeerId;
use sonda_peering::DialFailure;
use sonda_peers::{Direction, HostEvent, IdentifyFacts};
use tokio::sync::{
    mpsc::{Receiver, Sender, error::TrySendError},
    oneshot,
};
use tokio_util::sync::CancellationToken;

use crate::host::{CrawlerBehaviour, CrawlerBehaviourEvent, HostBuilder, HostCommand};

/// An error that aborts the host driver.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// The swarm could not listen on the configured address.
    #[error("failed to listen on gossip address: {0}")]
    Listen(String),
    /// A gossip topic subscription failed.
    #[error("failed to subscribe to topic {topic}: {reason}")]
    Subscribe {
        /// The offending topic.
        topic: String,
        /// Why the subscription failed.
        reason: String,
    },
}

/// Drives the libp2p swarm: executes dial commands, forwards connection,
/// identify, ping and gossip observations as [`HostEvent`]s.
pub struct HostDriver {
    pub(super) swarm: Swarm<CrawlerBehaviour>,
    pub(super) listen_addr: Multiaddr,
    pub(super) topics: Vec<String>,
    pub(super) commands: Receiver<HostCommand>,
    pub(super) events: Sender<HostEvent>,
    pub(super) pending_dials: HashMap<PeerId, oneshot::Sender<Result<(), DialFailure>>>,
    pub(super) cancellation: CancellationToken,
}

impl std::fmt::Debug for HostDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostDriver")
            .field("listen_addr", &self.listen_addr)
            .field("topics", &self.topics)
            .field("pending_dials", &self.pending_dials.len())
            .finish()
    }
}

impl HostDriver {
    /// Returns a new [`HostBuilder`].
    pub fn builder() -> HostBuilder {
        HostBuilder::new()
    }

    /// The local peer identity.
    pub fn local_peer_id(&self) -> PeerId {
        *self.swarm.local_peer_id()
    }

    /// Runs the swarm loop until cancellation.
    pub async fn start(mut self) -> Result<(), HostError> {
        self.swarm
            .listen_on(self.listen_addr.clone())
            .map_err(|e| HostError::Listen(e.to_string()))?;
        for topic in &self.topics {
            self.swarm
                .behaviour_mut()
                .gossipsub
                .subscribe(&gossipsub::IdentTopic::new(topic.clone()))
                .map_err(|e| HostError::Subscribe {
                    topic: topic.clone(),
                    reason: format!("{e:?}"),
                })?;
        }
        info!(
            target: "p2p::host",
            peer_id = %self.swarm.local_peer_id(),
            addr = %self.listen_addr,
            topics = self.topics.len(),
            "host listening"
        );

        let cancellation = self.cancellation.clone();
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    info!(target: "p2p::host", "host stopped");
                    return Ok(());
                }
                Some(command) = self.commands.recv() => self.handle_command(command),
                event = self.swarm.select_next_some() => self.handle_swarm_event(event),
            }
        }
    }

    fn handle_command(&mut self, command: HostCommand) {
        match command {
            HostCommand::Dial { peer, addrs, reply } => {
                if peer == *self.swarm.local_peer_id() {
                    let _ = reply.send(Err(DialFailure::new("dial to self attempted")));
                    return;
                }
                if self.pending_dials.contains_key(&peer) {
                    let _ = reply.send(Err(DialFailure::new("dial backoff")));
                    return;
                }
                let opts = DialOpts::peer_id(peer)
                    .condition(PeerCondition::DisconnectedAndNotDialing)
                    .addresses(addrs)
                    .build();
                match self.swarm.dial(opts) {
                    Ok(()) => {
                        self.pending_dials.insert(peer, reply);
                    }
                    Err(err) => {
                        let _ = reply.send(Err(DialFailure::new(err.to_string())));
                    }
                }
            }
        }
    }

    fn handle_swarm_event(&mut self, event: SwarmEvent<CrawlerBehaviourEvent>) {
        match event {
            SwarmEvent::ConnectionEstablished { peer_id, endpoint, num_established, .. } => {
                if let Some(reply) = self.pending_dials.remove(&peer_id) {
                    let _ = reply.send(Ok(()));
                }
                if num_established.get() == 1 {
                    let direction =
                        if endpoint.is_dialer() { Direction::Outbound } else { Direction::Inbound };
                    self.emit(HostEvent::Connected {
                        peer: peer_id,
                        direction,
                        at: SystemTime::now(),
                    });
                }
            }
            SwarmEvent::ConnectionClosed { peer_id, num_established, .. } => {
                if num_established == 0 {
                    self.emit(HostEvent::Disconnected { peer: peer_id, at: SystemTime::now() });
                }
            }
            SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                if let Some(reply) = peer_id.and_then(|id| self.pending_dials.remove(&id)) {
                    let _ = reply.send(Err(DialFailure::new(error.to_string())));
                }
            }
            SwarmEvent::Behaviour(CrawlerBehaviourEvent::Identify(event)) => {
                self.handle_identify_event(event);
            }
            SwarmEvent::Behaviour(CrawlerBehaviourEvent::Ping(ping::Event {
                peer, result, ..
            })) => {
                if let Ok(rtt) = result {
                    self.emit(HostEvent::Latency { peer, rtt });
                }
            }
            SwarmEvent::Behaviour(CrawlerBehaviourEvent::Gossipsub(gossipsub::Event::Message {
                propagation_source,
                message,
                ..
            })) => {
                self.emit(HostEvent::Message {
                    peer: propagation_source,
                    topic: message.topic.as_str().to_string(),
                    at: SystemTime::now(),
                });
            }
            event => {
                trace!(target: "p2p::host", ?event, "unhandled swarm event");
            }
        }
    }

    fn handle_identify_event(&mut self, event: identify::Event) {
        match event {
            identify::Event::Received { peer_id, info, .. } => {
                let facts = IdentifyFacts {
                    user_agent: Some(info.agent_version),
                    client: None,
                    protocols: info.protocols.iter().map(|p| p.as_ref().to_string()).collect(),
                    protocol_version: Some(info.protocol_version),
                    latency: None,
                    succeeded: true,
                    beacon_status: None,
                    beacon_metadata: None,
                };
                self.emit(HostEvent::Identified {
                    peer: peer_id,
                    facts: Box::new(facts),
                    at: SystemTime::now(),
                });
            }
            identify::Event::Error { peer_id, error, .. } => {
                debug!(target: "p2p::host", peer = %peer_id, %error, "identify failed");
                self.emit(HostEvent::IdentifyFailed { peer: peer_id, at: SystemTime::now() });
            }
            identify::Event::Sent { .. } | identify::Event::Pushed { .. } => {}
        }
    }

    /// Forwards an event without ever blocking the swarm loop; a full
    /// channel drops the event.
    fn emit(&mut self, event: HostEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                debug!(target: "p2p::host", peer = %event.peer(), "event channel full, dropping");
            }
            Err(TrySendError::Closed(_)) => {
                self.cancellation.cancel();
            }
        }
    }
}
