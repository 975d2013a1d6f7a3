//! # sonda-service
//!
//! The crawler's service layer: the ingest actors that fold transport
//! observations into the peer store, the metrics aggregator that turns
//! the store into exportable distributions, the geolocation client, and
//! the orchestrator that runs all actors under one cancellation signal.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

#[macro_use]
extern crate tracing;

/// Ingest actors for discovery sketches and host events.
mod ingest;
pub use ingest::{DiscoveryIngest, HostIngest, IngestError};

/// Periodic aggregation of the store into exported distributions.
mod aggregator;
pub use aggregator::{AggregatorConfig, MetricsAggregator};

/// Best-effort IP geolocation.
mod geo;
pub use geo::{GeoError, IpApiLocator, IpLocation, IpLocator, NoopLocator};

/// Orchestration of all crawler actors.
mod crawler;
pub use crawler::{Crawler, CrawlerConfig, CrawlerError};

/// Metric identifiers recorded by this crate.
mod metrics;
pub use metrics::Metrics;
