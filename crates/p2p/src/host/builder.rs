//! A builder for the [`HostDriver`].

use std::{collections::HashMap, time::Duration};

use libp2p::{
    Multiaddr, SwarmBuilder, gossipsub, identify, identity::Keypair, noise::Config as NoiseConfig,
    ping, tcp::Config as TcpConfig, yamux::Config as YamuxConfig,
};
use sonda_peers::HostEvent;
use tokio::sync::mpsc::{self, Receiver};
use tokio_util::sync::CancellationToken;

use crate::host::{CrawlerBehaviour, HostDriver, P2pHandle};

/// How many host events to buffer between the driver and the ingest.
const EVENT_CHANNEL_SIZE: usize = 1024;

/// How many pending commands the driver accepts.
const COMMAND_CHANNEL_SIZE: usize = 256;

/// An error type for the [`HostBuilder`].
#[derive(Debug, thiserror::Error)]
pub enum HostBuilderError {
    /// Missing the listen multiaddress.
    #[error("listen address not set")]
    ListenAddrNotSet,
    /// A TCP transport error.
    #[error("TCP error")]
    TcpError,
    /// An error when setting the behaviour on the swarm builder.
    #[error("error setting behaviour on swarm builder")]
    WithBehaviourError,
    /// An error building the gossipsub configuration or behaviour.
    #[error("error building gossipsub behaviour: {0}")]
    Gossipsub(String),
}

/// A builder for the [`HostDriver`].
#[derive(Debug, Default)]
pub struct HostBuilder {
    keypair: Option<Keypair>,
    listen_addr: Option<Multiaddr>,
    topics: Vec<String>,
    agent_version: Option<String>,
    timeout: Option<Duration>,
    cancellation: Option<CancellationToken>,
}

impl HostBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the [`Keypair`] for the node.
    pub fn with_keypair(mut self, keypair: Keypair) -> Self {
        self.keypair = Some(keypair);
        self
    }

    /// Sets the [`Multiaddr`] the host listens on.
    pub fn with_address(mut self, addr: Multiaddr) -> Self {
        self.listen_addr = Some(addr);
        self
    }

    /// Sets the gossip topics to subscribe to.
    pub fn with_topics(mut self, topics: Vec<String>) -> Self {
        self.topics = topics;
        self
    }

    /// Sets the agent version string advertised over identify.
    pub fn with_agent_version(mut self, agent: impl Into<String>) -> Self {
        self.agent_version = Some(agent.into());
        self
    }

    /// Sets the swarm's idle connection timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the shutdown signal the driver observes.
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = Some(cancellation);
        self
    }

    /// Builds the [`HostDriver`], its command handle, and the host event
    /// stream.
    pub fn build(self) -> Result<(HostDriver, P2pHandle, Receiver<HostEvent>), HostBuilderError> {
        let timeout = self.timeout.unwrap_or(Duration::from_secs(60));
        let keypair = self.keypair.unwrap_or_else(Keypair::generate_secp256k1);
        let addr = self.listen_addr.ok_or(HostBuilderError::ListenAddrNotSet)?;
        let agent = self.agent_version.unwrap_or_else(|| "sonda".to_string());

        let gossipsub_config = gossipsub::ConfigBuilder::default()
            .validation_mode(gossipsub::ValidationMode::Permissive)
            .build()
            .map_err(|e| HostBuilderError::Gossipsub(e.to_string()))?;
        let gossipsub = gossipsub::Behaviour::new(
            gossipsub::MessageAuthenticity::Signed(keypair.clone()),
            gossipsub_config,
        )
        .map_err(|e| HostBuilderError::Gossipsub(e.to_string()))?;

        let identify = identify::Behaviour::new(
            identify::Config::new("sonda/1.0.0".to_string(), keypair.public())
                .with_agent_version(agent),
        );
        let ping = ping::Behaviour::new(ping::Config::new());

        let behaviour = CrawlerBehaviour { gossipsub, identify, ping };

        let swarm = SwarmBuilder::with_existing_identity(keypair)
            .with_tokio()
            .with_tcp(TcpConfig::default(), |i: &Keypair| NoiseConfig::new(i), YamuxConfig::default)
            .map_err(|_| HostBuilderError::TcpError)?
            .with_behaviour(|_| behaviour)
            .map_err(|_| HostBuilderError::WithBehaviourError)?
            .with_swarm_config(|c| c.with_idle_connection_timeout(timeout))
            .build();

        let local_peer_id = *swarm.local_peer_id();
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);

        let driver = HostDriver {
            swarm,
            listen_addr: addr,
            topics: self.topics,
            commands: command_rx,
            events: event_tx,
            pending_dials: HashMap::new(),
            cancellation: self.cancellation.unwrap_or_default(),
        };
        Ok((driver, P2pHandle::new(local_peer_id, command_tx), event_rx))
    }
}
