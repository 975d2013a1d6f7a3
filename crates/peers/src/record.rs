//! The canonical per-peer fact sheet.
//!
//! One [`PeerRecord`] exists per distinct peer identity. Records are
//! enriched over time by discovery, identification, connection and gossip
//! events; merge never regresses a populated field to an empty one.

use std::{
    collections::HashMap,
    net::IpAddr,
    time::{Duration, SystemTime},
};

use libp2p::Multiaddr;
use libp2p_identity::PeerId;
use serde::{Deserialize, Serialize};

use crate::{
    BeaconMetadata, BeaconStatus, Direction, ErrorCategory, IdentifyFacts, Stamped,
    serde_util::{multiaddr_vec, peer_id},
};

/// Traffic counters for one gossip topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetric {
    /// Number of messages received on the topic.
    pub count: u64,
    /// When the first message was seen.
    pub first_seen: SystemTime,
    /// When the most recent message was seen.
    pub last_seen: SystemTime,
}

/// One observed connection transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStamp {
    /// Who initiated the connection.
    pub direction: Direction,
    /// When the connection was observed.
    pub at: SystemTime,
}

/// Everything the crawler knows about one peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRecord {
    /// The peer identity. Immutable once created; the store's key.
    #[serde(with = "peer_id")]
    pub peer_id: PeerId,
    /// Last known addresses for reaching the peer.
    #[serde(with = "multiaddr_vec")]
    pub addresses: Vec<Multiaddr>,
    /// Latest signed routing record, base64 encoded.
    pub enr: Option<String>,

    /// Protocols the peer advertised during identification.
    pub protocols: Vec<String>,
    /// Protocol version string advertised by the peer.
    pub protocol_version: String,
    /// Raw user-agent string.
    pub user_agent: String,
    /// Canonical client name derived from the user agent.
    pub client_name: String,
    /// Client version derived from the user agent.
    pub client_version: String,
    /// Client operating system derived from the user agent.
    pub client_os: String,

    /// Publicly routable IP extracted from the address set.
    pub ip: Option<IpAddr>,
    /// Country resolved from the IP.
    pub country: String,
    /// ISO country code resolved from the IP.
    pub country_code: String,
    /// City resolved from the IP.
    pub city: String,
    /// Last observed round-trip time.
    pub latency: Option<Duration>,

    /// Every observed connection, in arrival order.
    pub connections: Vec<ConnectionStamp>,
    /// Every observed disconnection, in arrival order.
    pub disconnections: Vec<SystemTime>,

    /// Total connection attempts issued against this peer.
    pub attempt_count: u64,
    /// Whether the peer has ever been attempted.
    pub attempted: bool,
    /// Timestamps of consecutive failed attempts since the last success.
    pub negative_attempts: Vec<SystemTime>,
    /// Most recent classified attempt outcome.
    pub last_error: ErrorCategory,
    /// When the most recent outcome was recorded.
    pub last_error_at: Option<SystemTime>,
    /// Soft exclusion flag: deprecated peers are dropped from export and
    /// deprioritized for reconnection, but never deleted.
    pub deprecated: bool,

    /// Whether a metadata/identify request was ever issued.
    pub metadata_requested: bool,
    /// Whether a metadata/identify request ever succeeded.
    pub metadata_succeeded: bool,
    /// When the peer was last identified.
    pub last_identify_at: Option<SystemTime>,

    /// Per-topic gossip traffic counters.
    pub message_metrics: HashMap<String, MessageMetric>,

    /// Beacon status observed during identification (eth2).
    pub beacon_status: Option<Stamped<BeaconStatus>>,
    /// Beacon metadata observed during identification (eth2).
    pub beacon_metadata: Option<Stamped<BeaconMetadata>>,
}

impl PeerRecord {
    /// Creates an empty record for `peer_id`.
    pub fn new(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            addresses: Vec::new(),
            enr: None,
            protocols: Vec::new(),
            protocol_version: String::new(),
            user_agent: String::new(),
            client_name: String::new(),
            client_version: String::new(),
            client_os: String::new(),
            ip: None,
            country: String::new(),
            country_code: String::new(),
            city: String::new(),
            latency: None,
            connections: Vec::new(),
            disconnections: Vec::new(),
            attempt_count: 0,
            attempted: false,
            negative_attempts: Vec::new(),
            last_error: ErrorCategory::None,
            last_error_at: None,
            deprecated: false,
            metadata_requested: false,
            metadata_succeeded: false,
            last_identify_at: None,
            message_metrics: HashMap::new(),
            beacon_status: None,
            beacon_metadata: None,
        }
    }

    /// Merges the facts of `incoming` into this record.
    ///
    /// Populated fields are never overwritten by empty ones; event vectors
    /// are appended; sticky booleans only move towards `true`. The peer id
    /// itself is never touched.
    pub fn merge(&mut self, incoming: Self) {
        if !incoming.addresses.is_empty() {
            self.addresses = incoming.addresses;
        }
        if incoming.enr.is_some() {
            self.enr = incoming.enr;
        }
        if !incoming.protocols.is_empty() {
            self.protocols = incoming.protocols;
        }
        merge_string(&mut self.protocol_version, incoming.protocol_version);
        merge_string(&mut self.user_agent, incoming.user_agent);
        merge_string(&mut self.client_os, incoming.client_os);
        // Client name and version travel as a pair.
        if !incoming.client_name.is_empty() || self.client_name.is_empty() {
            self.client_name = incoming.client_name;
            self.client_version = incoming.client_version;
        }
        if incoming.ip.is_some() {
            self.ip = incoming.ip;
        }
        // Location facts travel as a unit keyed on the city.
        if self.city.is_empty() || !incoming.city.is_empty() {
            self.city = incoming.city;
            self.country = incoming.country;
            self.country_code = incoming.country_code;
        }
        if incoming.latency.is_some() {
            self.latency = incoming.latency;
        }

        for stamp in incoming.connections {
            self.record_connection(stamp.direction, stamp.at);
        }
        for at in incoming.disconnections {
            self.record_disconnection(at);
        }

        self.attempt_count += incoming.attempt_count;
        if incoming.attempted {
            self.attempted = true;
            // A merged record with no negative attempts had a success since
            // our last sighting; its empty list wins.
            if incoming.negative_attempts.is_empty() {
                self.negative_attempts.clear();
            } else {
                self.negative_attempts.extend(incoming.negative_attempts);
            }
        }
        if incoming.last_error_at > self.last_error_at {
            self.last_error = incoming.last_error;
            self.last_error_at = incoming.last_error_at;
        }

        self.metadata_requested |= incoming.metadata_requested;
        self.metadata_succeeded |= incoming.metadata_succeeded;
        if incoming.last_identify_at > self.last_identify_at {
            self.last_identify_at = incoming.last_identify_at;
        }

        for (topic, metric) in incoming.message_metrics {
            match self.message_metrics.get_mut(&topic) {
                Some(existing) => {
                    existing.count += metric.count;
                    existing.first_seen = existing.first_seen.min(metric.first_seen);
                    existing.last_seen = existing.last_seen.max(metric.last_seen);
                }
                None => {
                    self.message_metrics.insert(topic, metric);
                }
            }
        }

        if incoming.beacon_status.is_some() {
            self.beacon_status = incoming.beacon_status;
        }
        if incoming.beacon_metadata.is_some() {
            self.beacon_metadata = incoming.beacon_metadata;
        }
    }

    /// Appends a connection event.
    pub fn record_connection(&mut self, direction: Direction, at: SystemTime) {
        self.connections.push(ConnectionStamp { direction, at });
    }

    /// Appends a disconnection event.
    pub fn record_disconnection(&mut self, at: SystemTime) {
        self.disconnections.push(at);
    }

    /// Applies one classified attempt outcome.
    ///
    /// Success clears the negative-attempt history and the deprecation
    /// flag; structurally-unreachable failures set the deprecation flag.
    pub fn apply_attempt_outcome(&mut self, category: ErrorCategory, at: SystemTime) {
        self.attempt_count += 1;
        self.attempted = true;
        self.last_error = category;
        self.last_error_at = Some(at);
        if category == ErrorCategory::None {
            self.negative_attempts.clear();
            self.deprecated = false;
        } else {
            self.negative_attempts.push(at);
            if category.deprecates() {
                self.deprecated = true;
            }
        }
    }

    /// Applies the facts of one identify exchange.
    pub fn apply_identification(&mut self, facts: IdentifyFacts, at: SystemTime) {
        self.metadata_requested = true;
        if facts.succeeded {
            self.metadata_succeeded = true;
            self.last_identify_at = Some(at);
        }
        if let Some(ua) = facts.user_agent {
            merge_string(&mut self.user_agent, ua);
        }
        if let Some(client) = facts.client {
            self.client_name = client.name;
            self.client_version = client.version;
            merge_string(&mut self.client_os, client.os);
        }
        if !facts.protocols.is_empty() {
            self.protocols = facts.protocols;
        }
        if let Some(version) = facts.protocol_version {
            merge_string(&mut self.protocol_version, version);
        }
        if facts.latency.is_some() {
            self.latency = facts.latency;
        }
        if let Some(status) = facts.beacon_status {
            self.beacon_status = Some(Stamped::new(status, at));
        }
        if let Some(metadata) = facts.beacon_metadata {
            self.beacon_metadata = Some(Stamped::new(metadata, at));
        }
    }

    /// Counts one gossip message on `topic`.
    pub fn record_message(&mut self, topic: &str, at: SystemTime) {
        let metric = self
            .message_metrics
            .entry(topic.to_string())
            .or_insert(MessageMetric { count: 0, first_seen: at, last_seen: at });
        metric.count += 1;
        metric.last_seen = at;
    }

    /// Total messages received from this peer across all topics.
    pub fn total_messages(&self) -> u64 {
        self.message_metrics.values().map(|m| m.count).sum()
    }

    /// Clears the per-interval counters while preserving identity and
    /// connection-history facts.
    pub fn reset_dynamic_metrics(&mut self) {
        self.message_metrics = HashMap::new();
    }

    /// Whether the last observed transition left the peer connected.
    pub fn is_connected(&self) -> bool {
        let Some(last_conn) = self.connections.last() else {
            return false;
        };
        match self.disconnections.last() {
            Some(last_disc) => *last_disc < last_conn.at,
            None => true,
        }
    }

    /// Cumulative time this peer has spent connected to us.
    ///
    /// Pairs each connection with the next later unconsumed disconnection,
    /// in chronological order. A pure function of the two sequences: open
    /// sessions contribute nothing, and recomputing never drifts.
    pub fn connected_time(&self) -> Duration {
        let mut conns: Vec<SystemTime> = self.connections.iter().map(|c| c.at).collect();
        conns.sort();
        let mut discs: Vec<SystemTime> = self.disconnections.clone();
        discs.sort();

        let mut total = Duration::ZERO;
        let mut next_disc = 0;
        for conn in conns {
            while next_disc < discs.len() && discs[next_disc] < conn {
                next_disc += 1;
            }
            if next_disc == discs.len() {
                break;
            }
            total += discs[next_disc].duration_since(conn).unwrap_or_default();
            next_disc += 1;
        }
        total
    }

    /// The first address with a publicly routable IP, if any.
    pub fn public_addr(&self) -> Option<&Multiaddr> {
        self.addresses.iter().find(|addr| addr_public_ip(addr).is_some())
    }

    /// Extracts a publicly routable IP from the address set.
    pub fn public_ip(&self) -> Option<IpAddr> {
        self.addresses.iter().find_map(|addr| addr_public_ip(addr))
    }
}

fn merge_string(current: &mut String, incoming: String) {
    if !incoming.is_empty() {
        *current = incoming;
    }
}

/// Returns the IP of a multiaddress when it is publicly routable.
pub fn addr_public_ip(addr: &Multiaddr) -> Option<IpAddr> {
    use libp2p::multiaddr::Protocol;
    for protocol in addr.iter() {
        let ip = match protocol {
            Protocol::Ip4(ip) => IpAddr::V4(ip),
            Protocol::Ip6(ip) => IpAddr::V6(ip),
            _ => continue,
        };
        if ip_is_public(&ip) {
            return Some(ip);
        }
        return None;
    }
    None
}

fn ip_is_public(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            !(v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified())
        }
        IpAddr::V6(v6) => !(v6.is_loopback() || v6.is_unspecified()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> PeerRecord {
        PeerRecord::new(PeerId::random())
    }

    fn secs(n: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(n)
    }

    #[test]
    fn test_merge_does_not_regress_populated_fields() {
        let mut existing = record();
        existing.user_agent = "Prysm/v1.4.3".to_string();
        existing.client_name = "prysm".to_string();
        existing.client_version = "v1.4.3".to_string();
        existing.addresses = vec!["/ip4/1.2.3.4/tcp/9000".parse().unwrap()];
        existing.country = "Germany".to_string();
        existing.country_code = "DE".to_string();
        existing.city = "Berlin".to_string();

        let incoming = PeerRecord::new(existing.peer_id);
        existing.merge(incoming);

        assert_eq!(existing.user_agent, "Prysm/v1.4.3");
        assert_eq!(existing.client_name, "prysm");
        assert_eq!(existing.client_version, "v1.4.3");
        assert_eq!(existing.addresses.len(), 1);
        assert_eq!(existing.city, "Berlin");
        assert_eq!(existing.country_code, "DE");
    }

    #[test]
    fn test_merge_non_empty_fields_overwrite() {
        let mut existing = record();
        existing.user_agent = "Prysm/v1.4.3".to_string();

        let mut incoming = PeerRecord::new(existing.peer_id);
        incoming.user_agent = "Prysm/v2.0.0".to_string();
        incoming.addresses = vec!["/ip4/5.6.7.8/tcp/9000".parse().unwrap()];
        incoming.latency = Some(Duration::from_millis(120));

        existing.merge(incoming);
        assert_eq!(existing.user_agent, "Prysm/v2.0.0");
        assert_eq!(existing.addresses[0].to_string(), "/ip4/5.6.7.8/tcp/9000");
        assert_eq!(existing.latency, Some(Duration::from_millis(120)));
    }

    #[test]
    fn test_merge_sticky_metadata_flags() {
        let mut existing = record();
        existing.metadata_requested = true;
        existing.metadata_succeeded = true;

        let incoming = PeerRecord::new(existing.peer_id);
        existing.merge(incoming);
        assert!(existing.metadata_requested);
        assert!(existing.metadata_succeeded);
    }

    #[test]
    fn test_merge_accumulates_message_metrics() {
        let mut existing = record();
        existing.record_message("beacon_block", secs(10));
        existing.record_message("beacon_block", secs(20));

        let mut incoming = PeerRecord::new(existing.peer_id);
        incoming.record_message("beacon_block", secs(5));
        incoming.record_message("beacon_aggregate_and_proof", secs(30));

        existing.merge(incoming);
        let metric = &existing.message_metrics["beacon_block"];
        assert_eq!(metric.count, 3);
        assert_eq!(metric.first_seen, secs(5));
        assert_eq!(metric.last_seen, secs(20));
        assert_eq!(existing.message_metrics["beacon_aggregate_and_proof"].count, 1);
        assert_eq!(existing.total_messages(), 4);
    }

    #[test]
    fn test_attempt_outcome_success_clears_negatives() {
        let mut rec = record();
        rec.apply_attempt_outcome(ErrorCategory::IoTimeout, secs(1));
        rec.apply_attempt_outcome(ErrorCategory::NoRouteToHost, secs(2));
        assert_eq!(rec.attempt_count, 2);
        assert_eq!(rec.negative_attempts.len(), 2);
        assert!(rec.deprecated);

        rec.apply_attempt_outcome(ErrorCategory::None, secs(3));
        assert_eq!(rec.attempt_count, 3);
        assert!(rec.negative_attempts.is_empty());
        assert!(!rec.deprecated);
        assert_eq!(rec.last_error, ErrorCategory::None);
    }

    #[test]
    fn test_connected_time_pairs_chronologically() {
        let mut rec = record();
        rec.record_connection(Direction::Outbound, secs(100));
        rec.record_disconnection(secs(160));
        rec.record_connection(Direction::Inbound, secs(200));
        rec.record_disconnection(secs(230));

        assert_eq!(rec.connected_time(), Duration::from_secs(90));
        // Idempotent: recomputing without new events yields the same value.
        assert_eq!(rec.connected_time(), Duration::from_secs(90));
    }

    #[test]
    fn test_connected_time_ignores_open_session() {
        let mut rec = record();
        rec.record_connection(Direction::Outbound, secs(100));
        rec.record_disconnection(secs(150));
        rec.record_connection(Direction::Outbound, secs(300));

        assert_eq!(rec.connected_time(), Duration::from_secs(50));
        assert!(rec.is_connected());
    }

    #[test]
    fn test_connected_time_skips_stale_disconnections() {
        let mut rec = record();
        // A disconnection observed before any connection cannot be paired.
        rec.record_disconnection(secs(50));
        rec.record_connection(Direction::Outbound, secs(100));
        rec.record_disconnection(secs(180));

        assert_eq!(rec.connected_time(), Duration::from_secs(80));
    }

    #[test]
    fn test_reset_dynamic_metrics_preserves_history() {
        let mut rec = record();
        for i in 0..5 {
            rec.record_message("beacon_block", secs(i));
        }
        rec.record_connection(Direction::Outbound, secs(10));
        rec.record_disconnection(secs(20));
        rec.record_connection(Direction::Inbound, secs(30));
        rec.user_agent = "Lighthouse/v1.5.1".to_string();

        rec.reset_dynamic_metrics();
        assert!(rec.message_metrics.is_empty());
        assert_eq!(rec.connections.len(), 2);
        assert_eq!(rec.disconnections.len(), 1);
        assert_eq!(rec.user_agent, "Lighthouse/v1.5.1");
    }

    #[test]
    fn test_identification_failure_is_sticky_requested_only() {
        let mut rec = record();
        rec.apply_identification(IdentifyFacts::default(), secs(1));
        assert!(rec.metadata_requested);
        assert!(!rec.metadata_succeeded);
        assert!(rec.last_identify_at.is_none());

        let facts = IdentifyFacts {
            user_agent: Some("teku/teku/v21.8.2".to_string()),
            succeeded: true,
            ..Default::default()
        };
        rec.apply_identification(facts, secs(2));
        assert!(rec.metadata_succeeded);
        assert_eq!(rec.last_identify_at, Some(secs(2)));
        assert_eq!(rec.user_agent, "teku/teku/v21.8.2");
    }

    #[test]
    fn test_record_round_trips_through_json() {
        let mut rec = record();
        rec.addresses = vec!["/ip4/1.2.3.4/tcp/9000".parse().unwrap()];
        rec.apply_attempt_outcome(ErrorCategory::ConnectionRefused, secs(9));
        rec.record_message("beacon_block", secs(10));

        let json = serde_json::to_string(&rec).unwrap();
        let back: PeerRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.peer_id, rec.peer_id);
        assert_eq!(back.addresses, rec.addresses);
        assert_eq!(back.attempt_count, 1);
        assert_eq!(back.last_error, ErrorCategory::ConnectionRefused);
        assert_eq!(back.message_metrics["beacon_block"].count, 1);
    }

    #[test]
    fn test_public_ip_extraction() {
        let mut rec = record();
        rec.addresses = vec![
            "/ip4/192.168.1.10/tcp/9000".parse().unwrap(),
            "/ip4/8.8.8.8/tcp/9000".parse().unwrap(),
        ];
        assert_eq!(rec.public_ip(), Some("8.8.8.8".parse().unwrap()));
        assert_eq!(rec.public_addr().unwrap().to_string(), "/ip4/8.8.8.8/tcp/9000");
    }
}
