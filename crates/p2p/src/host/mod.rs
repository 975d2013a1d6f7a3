//! The libp2p swarm host.

mod behaviour;
pub use behaviour::CrawlerBehaviour;
pub(crate) use behaviour::CrawlerBehaviourEvent;

mod builder;
pub use builder::{HostBuilder, HostBuilderError};

mod driver;
pub use driver::{HostDriver, HostError};

mod handle;
pub use handle::P2pHandle;
pub(crate) use handle::HostCommand;
