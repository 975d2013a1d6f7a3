//! The storage contract required from a peer record backend.

use libp2p_identity::PeerId;
use sonda_peers::PeerRecord;

/// An error bubbling up from a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The underlying database failed.
    #[error("database error: {0}")]
    Database(String),
    /// A stored record failed to encode or decode.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Keyed storage for [`PeerRecord`]s.
///
/// Backends only provide point operations and enumeration; atomicity
/// across get-modify-put is the responsibility of the wrapping
/// [`PeerStore`](crate::PeerStore), so implementations just need each
/// individual operation to be safe under concurrent callers.
pub trait PeerBackend: Send + Sync + 'static {
    /// Point lookup by peer id.
    fn get(&self, id: &PeerId) -> Result<Option<PeerRecord>, BackendError>;

    /// Inserts or replaces the record stored under `record.peer_id`.
    fn put(&self, record: &PeerRecord) -> Result<(), BackendError>;

    /// Removes the record stored under `id`, if any.
    fn delete(&self, id: &PeerId) -> Result<(), BackendError>;

    /// Enumerates every stored peer id. Snapshot semantics: the result
    /// reflects a recent state and must not block writers indefinitely.
    fn ids(&self) -> Result<Vec<PeerId>, BackendError>;

    /// Number of stored records.
    fn len(&self) -> Result<usize, BackendError>;

    /// Whether the backend holds no records.
    fn is_empty(&self) -> Result<bool, BackendError> {
        Ok(self.len()? == 0)
    }
}
