//! Beacon chain facts observed during identification of eth2 peers.

use std::time::SystemTime;

use alloy_primitives::{B256, Bytes, FixedBytes};
use serde::{Deserialize, Serialize};

/// A fork digest, the first four bytes identifying an eth2 fork.
pub type ForkDigest = FixedBytes<4>;

/// A value paired with the time it was observed at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stamped<T> {
    /// The observed value.
    pub value: T,
    /// When the value was observed.
    pub at: SystemTime,
}

impl<T> Stamped<T> {
    /// Stamps `value` with the observation time `at`.
    pub const fn new(value: T, at: SystemTime) -> Self {
        Self { value, at }
    }
}

/// The status a beacon node reports during the status exchange.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconStatus {
    /// The fork digest the peer is following.
    pub fork_digest: ForkDigest,
    /// Root of the peer's finalized checkpoint block.
    pub finalized_root: B256,
    /// Epoch of the peer's finalized checkpoint.
    pub finalized_epoch: u64,
    /// Root of the peer's head block.
    pub head_root: B256,
    /// Slot of the peer's head block.
    pub head_slot: u64,
}

/// The metadata a beacon node reports during the metadata exchange.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconMetadata {
    /// Monotonic sequence number of the peer's metadata.
    pub seq_number: u64,
    /// The peer's attestation subnet bitfield.
    pub attnets: Bytes,
    /// The peer's sync committee subnet bitfield, post-Altair.
    pub syncnets: Option<Bytes>,
}
