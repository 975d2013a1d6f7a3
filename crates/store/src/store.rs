//! The shared peer record store.

use std::{
    hash::{DefaultHasher, Hash, Hasher},
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, SystemTime},
};

use libp2p_identity::PeerId;
use sonda_peers::{Direction, ErrorCategory, IdentifyFacts, PeerRecord, classify};

use crate::{BackendError, PeerBackend};

/// Number of key-lock shards. Mutators hash the peer id onto one of these,
/// so unrelated peers proceed in parallel while same-peer mutations are
/// strictly serialized.
const STORE_SHARDS: usize = 64;

/// An error from the [`PeerStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An event was recorded against a peer the store has never seen.
    /// Connection events cannot auto-create: the record must have been
    /// created through discovery or identification first.
    #[error("unknown peer: {0}")]
    UnknownPeer(PeerId),
    /// The backend failed.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// A concurrency-safe keyed store of [`PeerRecord`]s with merge-on-write
/// semantics.
#[derive(Debug)]
pub struct PeerStore<B> {
    backend: B,
    shards: Box<[Mutex<()>]>,
}

impl<B: PeerBackend> PeerStore<B> {
    /// Wraps `backend` with per-key serialization.
    pub fn new(backend: B) -> Self {
        let shards = (0..STORE_SHARDS).map(|_| Mutex::new(())).collect();
        Self { backend, shards }
    }

    fn key_guard(&self, id: &PeerId) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        let shard = (hasher.finish() as usize) % self.shards.len();
        self.shards[shard].lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts `record` verbatim, or merges it into the existing record
    /// for the same peer per the non-regression rules.
    pub fn store_or_update(&self, record: PeerRecord) -> Result<(), StoreError> {
        let _guard = self.key_guard(&record.peer_id);
        match self.backend.get(&record.peer_id)? {
            Some(mut existing) => {
                existing.merge(record);
                self.backend.put(&existing)?;
            }
            None => self.backend.put(&record)?,
        }
        Ok(())
    }

    /// Point lookup.
    pub fn get(&self, id: &PeerId) -> Result<Option<PeerRecord>, StoreError> {
        Ok(self.backend.get(id)?)
    }

    /// Snapshot of every known peer id.
    pub fn list(&self) -> Result<Vec<PeerId>, StoreError> {
        Ok(self.backend.ids()?)
    }

    /// Number of known peers.
    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.backend.len()?)
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.backend.is_empty()?)
    }

    /// Records an observed connection. Errors on unknown peers.
    pub fn record_connection(
        &self,
        id: &PeerId,
        direction: Direction,
        at: SystemTime,
    ) -> Result<(), StoreError> {
        self.mutate_existing(id, |record| record.record_connection(direction, at))
    }

    /// Records an observed disconnection. Errors on unknown peers.
    pub fn record_disconnection(&self, id: &PeerId, at: SystemTime) -> Result<(), StoreError> {
        self.mutate_existing(id, |record| record.record_disconnection(at))
    }

    /// Records the outcome of one connection attempt and returns the
    /// classified category.
    ///
    /// Success clears the negative-attempt history and the deprecation
    /// flag; failures are classified from `raw_error`, and structurally
    /// unreachable categories flip the deprecation flag.
    pub fn record_attempt_outcome(
        &self,
        id: &PeerId,
        succeeded: bool,
        raw_error: &str,
    ) -> Result<ErrorCategory, StoreError> {
        let category = if succeeded { ErrorCategory::None } else { classify(raw_error) };
        self.mutate_existing(id, |record| {
            record.apply_attempt_outcome(category, SystemTime::now())
        })?;
        Ok(category)
    }

    /// Records the result of an identify exchange, creating the record if
    /// the peer was never discovered.
    pub fn record_identification(
        &self,
        id: &PeerId,
        facts: IdentifyFacts,
        at: SystemTime,
    ) -> Result<(), StoreError> {
        self.mutate_or_create(id, |record| record.apply_identification(facts, at))
    }

    /// Counts one gossip message, creating the record if the peer was
    /// never discovered.
    pub fn record_message(&self, id: &PeerId, topic: &str, at: SystemTime) -> Result<(), StoreError> {
        self.mutate_or_create(id, |record| record.record_message(topic, at))
    }

    /// Records a round-trip time measurement. Errors on unknown peers.
    pub fn record_latency(&self, id: &PeerId, rtt: Duration) -> Result<(), StoreError> {
        self.mutate_existing(id, |record| record.latency = Some(rtt))
    }

    /// Sets or clears the soft-exclusion flag.
    pub fn set_deprecated(&self, id: &PeerId, deprecated: bool) -> Result<(), StoreError> {
        self.mutate_existing(id, |record| record.deprecated = deprecated)
    }

    /// Removes a record outright. The crawler itself never deletes; this
    /// exists for explicit operator cleanup.
    pub fn remove(&self, id: &PeerId) -> Result<(), StoreError> {
        let _guard = self.key_guard(id);
        Ok(self.backend.delete(id)?)
    }

    /// Clears per-interval counters on every record, preserving identity
    /// and connection-history facts. Returns the number of records swept.
    pub fn reset_dynamic_metrics(&self) -> Result<usize, StoreError> {
        let ids = self.backend.ids()?;
        let mut swept = 0;
        for id in &ids {
            // Tolerate records vanishing mid-sweep; deletion is an operator
            // action the sweep must not fail on.
            if self.mutate_existing(id, PeerRecord::reset_dynamic_metrics).is_ok() {
                swept += 1;
            }
        }
        Ok(swept)
    }

    fn mutate_existing(
        &self,
        id: &PeerId,
        apply: impl FnOnce(&mut PeerRecord),
    ) -> Result<(), StoreError> {
        let _guard = self.key_guard(id);
        let mut record = self.backend.get(id)?.ok_or(StoreError::UnknownPeer(*id))?;
        apply(&mut record);
        Ok(self.backend.put(&record)?)
    }

    fn mutate_or_create(
        &self,
        id: &PeerId,
        apply: impl FnOnce(&mut PeerRecord),
    ) -> Result<(), StoreError> {
        let _guard = self.key_guard(id);
        let mut record = self.backend.get(id)?.unwrap_or_else(|| PeerRecord::new(*id));
        apply(&mut record);
        Ok(self.backend.put(&record)?)
    }
}
