//! RocksDB-backed peer record storage.
//!
//! Records are stored as JSON values keyed by the base58 peer id, so the
//! database stays inspectable with stock tooling and survives process
//! restarts.

use std::{path::Path, str::FromStr};

use libp2p_identity::PeerId;
use rocksdb::{DB, IteratorMode, Options};
use sonda_peers::PeerRecord;

use crate::{BackendError, PeerBackend};

/// A durable backend over a single RocksDB database.
pub struct RocksBackend {
    db: DB,
}

impl std::fmt::Debug for RocksBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksBackend").field("path", &self.db.path()).finish()
    }
}

impl RocksBackend {
    /// Opens (or creates) the database at `path`.
    ///
    /// Failure here is fatal to startup by design: a crawler that cannot
    /// persist its peerstore should not run.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path).map_err(|e| BackendError::Database(e.to_string()))?;
        Ok(Self { db })
    }
}

impl PeerBackend for RocksBackend {
    fn get(&self, id: &PeerId) -> Result<Option<PeerRecord>, BackendError> {
        let raw = self
            .db
            .get(id.to_base58().as_bytes())
            .map_err(|e| BackendError::Database(e.to_string()))?;
        match raw {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put(&self, record: &PeerRecord) -> Result<(), BackendError> {
        let value = serde_json::to_vec(record)?;
        self.db
            .put(record.peer_id.to_base58().as_bytes(), value)
            .map_err(|e| BackendError::Database(e.to_string()))
    }

    fn delete(&self, id: &PeerId) -> Result<(), BackendError> {
        self.db
            .delete(id.to_base58().as_bytes())
            .map_err(|e| BackendError::Database(e.to_string()))
    }

    fn ids(&self) -> Result<Vec<PeerId>, BackendError> {
        let mut ids = Vec::new();
        for entry in self.db.iterator(IteratorMode::Start) {
            let (key, _) = entry.map_err(|e| BackendError::Database(e.to_string()))?;
            match std::str::from_utf8(&key).ok().and_then(|k| PeerId::from_str(k).ok()) {
                Some(id) => ids.push(id),
                None => {
                    warn!(target: "store::rocks", "skipping undecodable peer key in database")
                }
            }
        }
        Ok(ids)
    }

    fn len(&self) -> Result<usize, BackendError> {
        Ok(self.ids()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonda_peers::{Direction, ErrorCategory};
    use std::time::{Duration, SystemTime};

    #[test]
    fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = PeerId::random();

        {
            let backend = RocksBackend::open(dir.path()).unwrap();
            let mut record = PeerRecord::new(id);
            record.addresses = vec!["/ip4/1.2.3.4/tcp/9000".parse().unwrap()];
            record.apply_attempt_outcome(ErrorCategory::IoTimeout, SystemTime::UNIX_EPOCH);
            record.record_connection(
                Direction::Outbound,
                SystemTime::UNIX_EPOCH + Duration::from_secs(5),
            );
            backend.put(&record).unwrap();
        }

        let backend = RocksBackend::open(dir.path()).unwrap();
        let record = backend.get(&id).unwrap().expect("record should persist");
        assert_eq!(record.peer_id, id);
        assert_eq!(record.attempt_count, 1);
        assert_eq!(record.last_error, ErrorCategory::IoTimeout);
        assert_eq!(record.connections.len(), 1);
        assert_eq!(backend.ids().unwrap(), vec![id]);
    }

    #[test]
    fn test_delete_removes_record() {
        let dir = tempfile::tempdir().unwrap();
        let backend = RocksBackend::open(dir.path()).unwrap();
        let record = PeerRecord::new(PeerId::random());
        backend.put(&record).unwrap();
        assert_eq!(backend.len().unwrap(), 1);

        backend.delete(&record.peer_id).unwrap();
        assert!(backend.get(&record.peer_id).unwrap().is_none());
        assert!(backend.is_empty().unwrap());
    }
}
