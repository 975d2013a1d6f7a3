//! Periodic aggregation of the peer store into exported metrics.
//!
//! On every tick the aggregator scans the store and rebuilds the exported
//! distributions from scratch; nothing here mutates peer facts. A much
//! slower timer clears the per-topic traffic counters so multi-day runs
//! stay bounded in memory.

use std::{collections::HashMap, sync::Arc, time::Duration};

use sonda_peers::{PeerRecord, UNKNOWN};
use sonda_store::{PeerBackend, PeerStore, StoreError};
use tokio_util::sync::CancellationToken;

use crate::Metrics;

/// Tuning knobs for the aggregator.
#[derive(Debug, Clone, Copy)]
pub struct AggregatorConfig {
    /// Spacing between store scans.
    pub interval: Duration,
    /// Spacing between dynamic-metric resets. Resetting trades message
    /// counts for bounded memory, so this is hours, not seconds.
    pub reset_interval: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            reset_interval: Duration::from_secs(6 * 3600),
        }
    }
}

/// The distributions of one store scan.
#[derive(Debug, Default)]
struct Snapshot {
    total: usize,
    connected: usize,
    deprecated: usize,
    identified: usize,
    clients: HashMap<String, u64>,
    client_versions: HashMap<String, u64>,
    countries: HashMap<String, u64>,
    rtt_buckets: HashMap<String, u64>,
    connected_time_buckets: HashMap<String, u64>,
    errors: HashMap<&'static str, u64>,
}

impl Snapshot {
    /// Folds one record into the snapshot. Only non-deprecated peers that
    /// have been asked for metadata contribute to the export
    /// distributions; totals count everyone.
    fn observe(&mut self, record: &PeerRecord) {
        self.total += 1;
        if record.deprecated {
            self.deprecated += 1;
        }
        if record.is_connected() {
            self.connected += 1;
        }
        *self.errors.entry(record.last_error.as_str()).or_default() += 1;

        if record.deprecated || !record.metadata_requested {
            return;
        }
        if record.metadata_succeeded {
            self.identified += 1;
        }

        let client = if record.client_name.is_empty() {
            UNKNOWN.to_string()
        } else {
            record.client_name.clone()
        };
        *self.client_versions.entry(format!("{}/{}", client, version_label(record))).or_default() +=
            1;
        *self.clients.entry(client).or_default() += 1;

        if !record.country_code.is_empty() {
            *self.countries.entry(record.country_code.clone()).or_default() += 1;
        }
        if let Some(latency) = record.latency {
            let bucket = format!("{:.1}", round_to_half(latency.as_secs_f64()));
            *self.rtt_buckets.entry(bucket).or_default() += 1;
        }
        let minutes = record.connected_time().as_secs_f64() / 60.0;
        if minutes > 0.0 {
            let bucket = format!("{:.1}", round_to_half(minutes));
            *self.connected_time_buckets.entry(bucket).or_default() += 1;
        }
    }

    fn publish(&self) {
        sonda_macros::set!(gauge, Metrics::KNOWN_PEERS, self.total as f64);
        sonda_macros::set!(gauge, Metrics::CONNECTED_PEERS, self.connected as f64);
        sonda_macros::set!(gauge, Metrics::DEPRECATED_PEERS, self.deprecated as f64);
        sonda_macros::set!(gauge, Metrics::IDENTIFIED_PEERS, self.identified as f64);

        for (client, count) in &self.clients {
            sonda_macros::set!(
                gauge,
                Metrics::CLIENT_DISTRIBUTION,
                "client",
                client.clone(),
                *count as f64
            );
        }
        for (version, count) in &self.client_versions {
            sonda_macros::set!(
                gauge,
                Metrics::CLIENT_VERSION_DISTRIBUTION,
                "client_version",
                version.clone(),
                *count as f64
            );
        }
        for (country, count) in &self.countries {
            sonda_macros::set!(
                gauge,
                Metrics::COUNTRY_DISTRIBUTION,
                "country",
                country.clone(),
                *count as f64
            );
        }
        for (bucket, count) in &self.rtt_buckets {
            sonda_macros::set!(
                gauge,
                Metrics::RTT_DISTRIBUTION,
                "seconds",
                bucket.clone(),
                *count as f64
            );
        }
        for (bucket, count) in &self.connected_time_buckets {
            sonda_macros::set!(
                gauge,
                Metrics::CONNECTED_TIME_DISTRIBUTION,
                "minutes",
                bucket.clone(),
                *count as f64
            );
        }
        for (category, count) in &self.errors {
            sonda_macros::set!(
                gauge,
                Metrics::ERROR_DISTRIBUTION,
                "category",
                *category,
                *count as f64
            );
        }
    }
}

/// Periodically scans the store, publishes distributions, and resets the
/// dynamic per-topic counters on a slow cadence.
#[derive(Debug)]
pub struct MetricsAggregator<B> {
    store: Arc<PeerStore<B>>,
    config: AggregatorConfig,
    cancellation: CancellationToken,
}

impl<B: PeerBackend> MetricsAggregator<B> {
    /// Creates the aggregator.
    pub fn new(
        store: Arc<PeerStore<B>>,
        config: AggregatorConfig,
        cancellation: CancellationToken,
    ) -> Self {
        Self { store, config, cancellation }
    }

    /// Runs the aggregation loop until cancellation.
    pub async fn start(self) -> Result<(), StoreError> {
        info!(
            target: "aggregator",
            interval = ?self.config.interval,
            reset_interval = ?self.config.reset_interval,
            "starting metrics aggregator"
        );
        let mut scan = tokio::time::interval(self.config.interval);
        let start = tokio::time::Instant::now() + self.config.reset_interval;
        let mut reset = tokio::time::interval_at(start, self.config.reset_interval);

        loop {
            tokio::select! {
                _ = self.cancellation.cancelled() => break,
                _ = scan.tick() => self.aggregate()?,
                _ = reset.tick() => {
                    let swept = self.store.reset_dynamic_metrics()?;
                    info!(target: "aggregator", swept, "reset dynamic metrics");
                }
            }
        }
        info!(target: "aggregator", "metrics aggregator stopped");
        Ok(())
    }

    /// One full scan-and-publish cycle.
    fn aggregate(&self) -> Result<(), StoreError> {
        let mut snapshot = Snapshot::default();
        for id in self.store.list()? {
            if let Some(record) = self.store.get(&id)? {
                snapshot.observe(&record);
            }
        }
        snapshot.publish();
        info!(
            target: "aggregator",
            total = snapshot.total,
            connected = snapshot.connected,
            identified = snapshot.identified,
            deprecated = snapshot.deprecated,
            "peerstore summary"
        );
        Ok(())
    }
}

fn version_label(record: &PeerRecord) -> &str {
    if record.client_version.is_empty() { UNKNOWN } else { &record.client_version }
}

/// Rounds to the nearest 0.5.
fn round_to_half(value: f64) -> f64 {
    (value * 2.0).round() / 2.0
}
