//! Contains the crawler CLI.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result, bail};
use clap::Parser;
use discv5::Enr;
use libp2p::Multiaddr;
use libp2p_identity::Keypair;
use metrics_exporter_prometheus::PrometheusBuilder;
use sonda_p2p::{DiscoveryDriver, HostDriver};
use sonda_peering::StrategyConfig;
use sonda_peers::{DiscoveredPeer, NetworkKind};
use sonda_service::{
    AggregatorConfig, Crawler, CrawlerConfig, IpApiLocator, IpLocator, NoopLocator,
};
use sonda_store::{MemoryBackend, PeerBackend, PeerStore, RocksBackend};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// The peer record store backends the crawler can run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum StorageKind {
    /// Durable single-directory RocksDB store.
    Rocksdb,
    /// Volatile in-memory store.
    Memory,
}

/// sonda: crawl and monitor a gossip-based libp2p network.
#[derive(Parser, Clone, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Verbosity level (-v debug, -vv trace).
    #[clap(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbosity: u8,
    /// The network whose clients the crawler classifies against.
    #[clap(long, default_value = "eth2", env = "SONDA_NETWORK")]
    pub network: NetworkKind,
    /// IP address to listen on, for both TCP (libp2p) and UDP (discv5).
    #[clap(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub listen_ip: IpAddr,
    /// TCP port for the libp2p host.
    #[clap(long, default_value_t = 9000)]
    pub tcp_port: u16,
    /// UDP port for the discovery service.
    #[clap(long, default_value_t = 9000)]
    pub udp_port: u16,
    /// Path to a file with one bootnode ENR per line.
    #[clap(long)]
    pub bootnodes: Option<PathBuf>,
    /// Gossip topics to subscribe to and count traffic on.
    #[clap(long, value_delimiter = ',')]
    pub topics: Vec<String>,
    /// Which peer store backend to run on.
    #[clap(long, value_enum, default_value_t = StorageKind::Rocksdb)]
    pub storage: StorageKind,
    /// Directory for the durable peer store.
    #[clap(long, default_value = "./sonda-db")]
    pub db_path: PathBuf,
    /// Path to a hex-encoded secp256k1 private key. Generated fresh when
    /// omitted.
    #[clap(long)]
    pub private_key: Option<PathBuf>,
    /// Port the Prometheus scrape endpoint listens on.
    #[clap(long, default_value_t = 9090)]
    pub metrics_port: u16,
    /// Disable IP geolocation lookups.
    #[clap(long)]
    pub no_geolocation: bool,
    /// Per-dial timeout in seconds.
    #[clap(long, default_value_t = 15)]
    pub dial_timeout_secs: u64,
    /// Concurrent dials in flight.
    #[clap(long, default_value_t = 10)]
    pub dial_workers: usize,
}

impl Cli {
    /// Runs the CLI.
    pub fn run(self) -> Result<()> {
        Self::init_stack(self.verbosity, self.metrics_port)?;
        Self::run_until_complete(self.start())
    }

    /// Initialize the tracing stack and Prometheus metrics recorder.
    fn init_stack(verbosity: u8, metrics_port: u16) -> Result<()> {
        let default_directive = match verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive));
        tracing_subscriber::fmt().with_env_filter(filter).init();

        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, metrics_port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install Prometheus exporter")?;
        info!(target: "sonda", "serving metrics at http://{addr}");
        Ok(())
    }

    /// Drives the crawler future on a fresh multi-threaded runtime.
    fn run_until_complete<F>(fut: F) -> Result<()>
    where
        F: std::future::Future<Output = Result<()>>,
    {
        let rt = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
        rt.block_on(fut)
    }

    /// Starts the crawler.
    async fn start(self) -> Result<()> {
        match self.storage {
            StorageKind::Memory => {
                info!(target: "sonda", "using in-memory peer store");
                self.launch(PeerStore::new(MemoryBackend::new())).await
            }
            StorageKind::Rocksdb => {
                let backend = RocksBackend::open(&self.db_path)
                    .with_context(|| format!("failed to open peer store at {:?}", self.db_path))?;
                info!(target: "sonda", path = ?self.db_path, "using RocksDB peer store");
                self.launch(PeerStore::new(backend)).await
            }
        }
    }

    /// Assembles the transports and actors over `store` and runs them.
    async fn launch<B: PeerBackend>(self, store: PeerStore<B>) -> Result<()> {
        let store = Arc::new(store);
        let keypair = self.keypair()?;
        let cancellation = CancellationToken::new();

        tokio::spawn({
            let cancellation = cancellation.clone();
            async move {
                shutdown_signal().await;
                info!(target: "sonda", "shutdown requested, draining actors");
                cancellation.cancel();
            }
        });

        // The libp2p host.
        let (host_driver, handle, host_events) = HostDriver::builder()
            .with_keypair(keypair.clone())
            .with_address(self.listen_multiaddr())
            .with_topics(self.topics.clone())
            .with_agent_version(format!("sonda/{}", env!("CARGO_PKG_VERSION")))
            .with_cancellation(cancellation.clone())
            .build()
            .context("failed to build libp2p host")?;
        info!(target: "sonda", peer_id = %host_driver.local_peer_id(), "host identity ready");
        tokio::spawn({
            let cancellation = cancellation.clone();
            async move {
                if let Err(err) = host_driver.start().await {
                    error!(target: "sonda", %err, "host driver failed");
                    cancellation.cancel();
                }
            }
        });

        // Peer discovery. Only the eth2 variant ships a built-in (discv5)
        // discovery transport; other networks feed sketches externally.
        let mut external_sketch_tx = None;
        let sketches = match self.network {
            NetworkKind::Eth2 => {
                let (driver, sketches) = DiscoveryDriver::builder()
                    .with_keypair(keypair)
                    .with_listen_addr(SocketAddr::new(self.listen_ip, self.udp_port))
                    .with_bootnodes(self.load_bootnodes()?)
                    .with_cancellation(cancellation.clone())
                    .build()
                    .context("failed to build discovery service")?;
                tokio::spawn({
                    let cancellation = cancellation.clone();
                    async move {
                        if let Err(err) = driver.start().await {
                            error!(target: "sonda", %err, "discovery driver failed");
                            cancellation.cancel();
                        }
                    }
                });
                sketches
            }
            NetworkKind::Ipfs | NetworkKind::Filecoin => {
                info!(target: "sonda", network = %self.network, "no built-in discovery for this network");
                let (tx, rx) = mpsc::channel::<DiscoveredPeer>(1);
                // Held until shutdown so the ingest actor idles instead of
                // seeing a closed stream and exiting.
                external_sketch_tx = Some(tx);
                rx
            }
        };

        let locator: Arc<dyn IpLocator> = if self.no_geolocation {
            Arc::new(NoopLocator)
        } else {
            Arc::new(IpApiLocator::default())
        };

        let config = CrawlerConfig {
            network: self.network,
            strategy: StrategyConfig {
                dial_timeout: Duration::from_secs(self.dial_timeout_secs),
                dial_workers: self.dial_workers,
                ..Default::default()
            },
            aggregator: AggregatorConfig::default(),
        };

        let crawler =
            Crawler::new(store, handle, locator, config, sketches, host_events, cancellation);
        let result = crawler.start().await;
        drop(external_sketch_tx);
        result.map_err(Into::into)
    }

    /// The multiaddress the libp2p host listens on.
    fn listen_multiaddr(&self) -> Multiaddr {
        let mut addr = Multiaddr::empty();
        match self.listen_ip {
            IpAddr::V4(ip) => addr.push(libp2p::multiaddr::Protocol::Ip4(ip)),
            IpAddr::V6(ip) => addr.push(libp2p::multiaddr::Protocol::Ip6(ip)),
        }
        addr.push(libp2p::multiaddr::Protocol::Tcp(self.tcp_port));
        addr
    }

    /// Loads or generates the node's secp256k1 keypair.
    fn keypair(&self) -> Result<Keypair> {
        let Some(path) = &self.private_key else {
            info!(target: "sonda", "generating ephemeral node key");
            return Ok(Keypair::generate_secp256k1());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read private key at {path:?}"))?;
        let mut bytes = hex_decode(raw.trim())
            .with_context(|| format!("private key at {path:?} is not valid hex"))?;
        let secret = libp2p_identity::secp256k1::SecretKey::try_from_bytes(&mut bytes)
            .map_err(|e| anyhow::anyhow!("invalid secp256k1 private key: {e}"))?;
        Ok(Keypair::from(libp2p_identity::secp256k1::Keypair::from(secret)))
    }

    /// Reads the bootnode ENR list, one `enr:` record per line.
    fn load_bootnodes(&self) -> Result<Vec<Enr>> {
        let Some(path) = &self.bootnodes else {
            return Ok(Vec::new());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read bootnodes at {path:?}"))?;
        let mut bootnodes = Vec::new();
        for (number, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let enr = Enr::from_str(line)
                .map_err(|e| anyhow::anyhow!("invalid ENR on line {}: {e}", number + 1))?;
            bootnodes.push(enr);
        }
        if bootnodes.is_empty() {
            bail!("bootnode file {path:?} contains no ENRs");
        }
        info!(target: "sonda", count = bootnodes.len(), "loaded bootnode ENRs");
        Ok(bootnodes)
    }
}

/// Decodes a plain hex string without pulling in a hex crate.
fn hex_decode(raw: &str) -> Result<Vec<u8>> {
    let raw = raw.strip_prefix("0x").unwrap_or(raw);
    if raw.len() % 2 != 0 {
        bail!("odd-length hex string");
    }
    (0..raw.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&raw[i..i + 2], 16).map_err(Into::into))
        .collect()
}

/// Listens for OS shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!(target: "sonda", "received SIGINT"),
        _ = terminate => info!(target: "sonda", "received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_decode() {
        assert_eq!(hex_decode("0a0b").unwrap(), vec![0x0a, 0x0b]);
        assert_eq!(hex_decode("0x0a0b").unwrap(), vec![0x0a, 0x0b]);
        assert!(hex_decode("abc").is_err());
        assert!(hex_decode("zz").is_err());
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["sonda"]);
        assert_eq!(cli.network, NetworkKind::Eth2);
        assert_eq!(cli.tcp_port, 9000);
        assert_eq!(cli.storage, StorageKind::Rocksdb);
        assert!(!cli.no_geolocation);
    }

    #[test]
    fn test_listen_multiaddr() {
        let cli = Cli::parse_from(["sonda", "--listen-ip", "1.2.3.4", "--tcp-port", "9123"]);
        assert_eq!(cli.listen_multiaddr().to_string(), "/ip4/1.2.3.4/tcp/9123");
    }
}
