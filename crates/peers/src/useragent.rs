//! User-agent classification.
//!
//! Identify exchanges reveal free-form user-agent strings such as
//! `teku/teku/v21.8.2/linux-x86_64/corretto-java-16` or
//! `Prysm/v1.4.3/8bca66ac`. Classification is table-driven: one fixed
//! known-client table per network, matched by case-insensitive substring,
//! plus OS/architecture tables shared across networks.

use lazy_static::lazy_static;

use crate::NetworkKind;

/// Placeholder for any attribute the user agent did not reveal.
pub const UNKNOWN: &str = "unknown";

/// Client facts derived from a user-agent string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    /// Canonical client name, or `unknown`.
    pub name: String,
    /// Cleaned client version, or `unknown`.
    pub version: String,
    /// Operating system, or `unknown`.
    pub os: String,
    /// CPU architecture, or `unknown`.
    pub arch: String,
}

/// One known client: canonical name, aliases to match, and the index of
/// the `/`-separated user-agent field carrying the version.
struct KnownClient {
    name: &'static str,
    aliases: &'static [&'static str],
    version_field: usize,
}

lazy_static! {
    static ref ETH2_CLIENTS: Vec<KnownClient> = vec![
        KnownClient { name: "prysm", aliases: &["prysm"], version_field: 1 },
        KnownClient { name: "lighthouse", aliases: &["lighthouse"], version_field: 1 },
        // Teku repeats its name, so the version sits one field further in.
        KnownClient { name: "teku", aliases: &["teku"], version_field: 2 },
        KnownClient { name: "nimbus", aliases: &["nimbus", "nim-libp2p"], version_field: 1 },
        KnownClient { name: "lodestar", aliases: &["lodestar", "js-libp2p"], version_field: 1 },
        KnownClient { name: "grandine", aliases: &["grandine", "rust-libp2p"], version_field: 1 },
        KnownClient { name: "erigon", aliases: &["erigon"], version_field: 1 },
        KnownClient { name: "trinity", aliases: &["trinity"], version_field: 1 },
    ];
    static ref IPFS_CLIENTS: Vec<KnownClient> = vec![
        KnownClient { name: "kubo", aliases: &["kubo"], version_field: 1 },
        KnownClient { name: "go-ipfs", aliases: &["go-ipfs"], version_field: 1 },
        KnownClient { name: "hydra-booster", aliases: &["hydra-booster"], version_field: 1 },
        KnownClient { name: "storm", aliases: &["storm"], version_field: 1 },
        KnownClient { name: "ioi", aliases: &["ioi"], version_field: 1 },
        KnownClient { name: "punchr", aliases: &["punchr"], version_field: 1 },
    ];
    static ref FILECOIN_CLIENTS: Vec<KnownClient> = vec![
        // Lotus ships `lotus-1.13.0+mainnet+git.7a55e8e8`: name and version
        // share the first field.
        KnownClient { name: "lotus", aliases: &["lotus"], version_field: 0 },
    ];
}

/// OS aliases shared across networks.
const OS_TABLE: &[(&str, &[&str])] = &[
    ("linux", &["linux", "ubuntu"]),
    ("mac", &["macos", "freebsd"]),
    ("windows", &["windows", "win"]),
];

/// Architecture aliases shared across networks.
const ARCH_TABLE: &[(&str, &[&str])] = &[
    ("arm", &["aarch64", "aarch_64", "aarch"]),
    ("x86_64", &["x86_64"]),
];

/// Parses a user-agent string against the known-client table for `network`.
///
/// Unrecognized clients come back as `unknown`; the raw user agent is kept
/// on the record either way, so nothing is lost by a miss here.
pub fn parse_user_agent(network: NetworkKind, user_agent: &str) -> ClientInfo {
    let table: &[KnownClient] = match network {
        NetworkKind::Eth2 => &ETH2_CLIENTS,
        NetworkKind::Ipfs => &IPFS_CLIENTS,
        NetworkKind::Filecoin => &FILECOIN_CLIENTS,
    };

    let fields: Vec<&str> = user_agent.split('/').collect();
    let lowered = user_agent.to_lowercase();

    let mut name = UNKNOWN.to_string();
    let mut version = UNKNOWN.to_string();
    for client in table {
        if client.aliases.iter().any(|alias| fields[0].to_lowercase().contains(alias)) {
            name = client.name.to_string();
            version = clean_version(fields.get(client.version_field).copied().unwrap_or(UNKNOWN));
            break;
        }
    }
    if name == UNKNOWN && !user_agent.is_empty() {
        debug!(target: "peers::useragent", %user_agent, "unrecognized user agent");
    }

    ClientInfo {
        name,
        version,
        os: match_alias_table(OS_TABLE, &lowered),
        arch: match_alias_table(ARCH_TABLE, &lowered),
    }
}

fn match_alias_table(table: &[(&str, &[&str])], lowered: &str) -> String {
    for (canonical, aliases) in table {
        if aliases.iter().any(|alias| lowered.contains(alias)) {
            return (*canonical).to_string();
        }
    }
    UNKNOWN.to_string()
}

/// Strips build metadata from a version field: everything after the first
/// `+` or `-`, and a lotus-style `name-` prefix.
fn clean_version(raw: &str) -> String {
    let cleaned = raw.split('+').next().unwrap_or(raw);
    // `lotus-1.13.0` carries the version after the dash; `v1.3.8-hotfix`
    // carries build info after it. Keep the segment that looks numeric.
    let mut parts = cleaned.split('-');
    let first = parts.next().unwrap_or(cleaned);
    let version = if first.chars().any(|c| c.is_ascii_digit()) {
        first
    } else {
        parts.next().unwrap_or(first)
    };
    if version.is_empty() { UNKNOWN.to_string() } else { version.to_string() }
}
