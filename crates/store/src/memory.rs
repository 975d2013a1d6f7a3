//! In-memory peer record backend.

use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use libp2p_identity::PeerId;
use sonda_peers::PeerRecord;

use crate::{BackendError, PeerBackend};

/// A non-durable backend over a [`HashMap`], for testing and runs that do
/// not need to survive a restart.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: RwLock<HashMap<PeerId, PeerRecord>>,
}

impl MemoryBackend {
    /// Creates an empty in-memory backend.
    pub fn new() -> Self {
        Self::default()
    }
}

impl PeerBackend for MemoryBackend {
    fn get(&self, id: &PeerId) -> Result<Option<PeerRecord>, BackendError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(id).cloned())
    }

    fn put(&self, record: &PeerRecord) -> Result<(), BackendError> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.insert(record.peer_id, record.clone());
        Ok(())
    }

    fn delete(&self, id: &PeerId) -> Result<(), BackendError> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.remove(id);
        Ok(())
    }

    fn ids(&self) -> Result<Vec<PeerId>, BackendError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.keys().copied().collect())
    }

    fn len(&self) -> Result<usize, BackendError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.len())
    }
}
