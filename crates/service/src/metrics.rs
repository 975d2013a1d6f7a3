//! Metrics for the crawler service layer.

/// Container for the metric identifiers recorded by this crate.
#[derive(Debug)]
pub struct Metrics;

impl Metrics {
    /// Counter for peers ingested from discovery.
    pub const DISCOVERED_PEERS: &'static str = "sonda_crawler_discovered_peers_total";

    /// Counter for gossip messages observed, labelled by topic.
    pub const GOSSIP_MESSAGES: &'static str = "sonda_crawler_gossip_messages_total";

    /// Gauge for the total number of known peers.
    pub const KNOWN_PEERS: &'static str = "sonda_crawler_known_peers";

    /// Gauge for peers currently connected.
    pub const CONNECTED_PEERS: &'static str = "sonda_crawler_connected_peers";

    /// Gauge for peers soft-excluded as deprecated.
    pub const DEPRECATED_PEERS: &'static str = "sonda_crawler_deprecated_peers";

    /// Gauge for peers that completed an identify exchange.
    pub const IDENTIFIED_PEERS: &'static str = "sonda_crawler_identified_peers";

    /// Gauge for the client distribution, labelled by client name.
    pub const CLIENT_DISTRIBUTION: &'static str = "sonda_crawler_observed_clients";

    /// Gauge for the client version distribution, labelled by
    /// `name/version`.
    pub const CLIENT_VERSION_DISTRIBUTION: &'static str = "sonda_crawler_observed_client_versions";

    /// Gauge for the country distribution, labelled by country code.
    pub const COUNTRY_DISTRIBUTION: &'static str = "sonda_crawler_observed_countries";

    /// Gauge for the RTT distribution, labelled by half-second bucket.
    pub const RTT_DISTRIBUTION: &'static str = "sonda_crawler_rtt_distribution";

    /// Gauge for the total-connected-time distribution, labelled by
    /// half-minute bucket.
    pub const CONNECTED_TIME_DISTRIBUTION: &'static str = "sonda_crawler_connected_time_distribution";

    /// Gauge for the last-error distribution, labelled by category.
    pub const ERROR_DISTRIBUTION: &'static str = "sonda_crawler_error_distribution";
}
