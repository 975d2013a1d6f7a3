//! # sonda-store
//!
//! The concurrency-safe keyed store of [`PeerRecord`]s shared by every
//! crawler subsystem.
//!
//! The store wraps a pluggable [`PeerBackend`] (in-memory map or RocksDB)
//! with per-key mutual exclusion: every mutator is a get-modify-put that
//! holds the key's shard lock for its whole duration, so concurrent
//! writers to the same peer can never interleave partial updates. A plain
//! concurrent map with a non-atomic load-then-store is exactly the race
//! this layer exists to prevent.
//!
//! [`PeerRecord`]: sonda_peers::PeerRecord

#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

#[macro_use]
extern crate tracing;

/// The storage contract backends must satisfy.
mod backend;
pub use backend::{BackendError, PeerBackend};

/// Non-durable in-memory backend, for testing and ephemeral runs.
mod memory;
pub use memory::MemoryBackend;

/// Durable RocksDB backend.
mod rocks;
pub use rocks::RocksBackend;

/// The store itself: per-key serialization plus the event mutators.
mod store;
pub use store::{PeerStore, StoreError};
