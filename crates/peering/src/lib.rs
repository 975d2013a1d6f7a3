//! # sonda-peering
//!
//! The peer lifecycle engine: the per-peer backoff state machine and the
//! strategy actor that walks the peerstore, dials eligible peers through
//! the host boundary, and folds attempt outcomes back into the store.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

#[macro_use]
extern crate tracing;

/// The per-peer backoff state machine.
mod prune;
pub use prune::{BackoffConfig, DelayCategory, PruneState};

/// The host-transport boundary the strategy dials through.
mod dialer;
pub use dialer::{DialFailure, Dialer};

/// The peering strategy actor.
mod strategy;
pub use strategy::{PeeringActor, PeeringError, StrategyConfig, StrategySignal};

/// Metric identifiers recorded by this crate.
mod metrics;
pub use metrics::Metrics;
