//! Ingest actors: every transport observation enters the store here.

mod discovery;
pub use discovery::DiscoveryIngest;

mod host;
pub use host::HostIngest;

use sonda_store::StoreError;

/// An error that aborts an ingest actor.
///
/// Only storage-level failures land here; per-event conditions such as
/// events for unknown peers are logged and skipped.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The peer store failed at the storage level.
    #[error(transparent)]
    Store(#[from] StoreError),
}
