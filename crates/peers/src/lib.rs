//! # sonda-peers
//!
//! Peer-level data model for the sonda network crawler.
//!
//! This crate holds the vocabulary shared by every other sonda crate:
//! the canonical [`PeerRecord`] fact sheet with its merge semantics, the
//! dial-error classifier, the user-agent classification tables, and the
//! boundary types exchanged with the discovery and host transports.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

#[macro_use]
extern crate tracing;

/// The canonical per-peer fact sheet and its merge rules.
mod record;
pub use record::{ConnectionStamp, MessageMetric, PeerRecord, addr_public_ip};

/// Classification of raw dial/identify error strings.
mod classify;
pub use classify::{ErrorCategory, classify};

/// User-agent parsing against the known-client tables.
mod useragent;
pub use useragent::{ClientInfo, UNKNOWN, parse_user_agent};

/// Beacon chain facts observed during identification (eth2 networks).
mod beacon;
pub use beacon::{BeaconMetadata, BeaconStatus, Stamped};

/// Boundary types shared between the transports and the core.
mod types;
pub use types::{Direction, DiscoveredPeer, HostEvent, IdentifyFacts, NetworkKind};

/// Serde helpers for transport types persisted inside records.
pub(crate) mod serde_util;
