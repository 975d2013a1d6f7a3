//! Dial-error classification.
//!
//! Every raw error string returned by a connection or identify attempt is
//! folded into one of a closed set of categories. The categories drive the
//! backoff policy applied by the peering strategy, so the mapping lives in
//! one ordered table rather than being re-derived at each call site.

use serde::{Deserialize, Serialize};

/// The closed set of dial/identify error categories.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCategory {
    /// No error: the attempt succeeded.
    #[default]
    None,
    /// The remote reset or dropped the connection.
    ConnectionReset,
    /// The connection timed out before being established.
    IoTimeout,
    /// The host dialed its own identity.
    DialToSelf,
    /// The transport refused to dial while a previous failure backoff is active.
    DialBackoff,
    /// The remote refused the connection.
    ConnectionRefused,
    /// The connection was established but identification did not finish in time.
    ContextDeadlineExceeded,
    /// No host answered at the dialed address.
    NoRouteToHost,
    /// The network containing the dialed address is unreachable.
    UnreachableNetwork,
    /// The remote answered with a different peer identity than advertised.
    PeerIdMismatch,
    /// The metadata/identify request itself failed.
    MetadataError,
    /// A non-empty error string that matched no known pattern.
    Uncertain,
}

impl ErrorCategory {
    /// Whether this category marks the peer as structurally unreachable,
    /// which flips the record's `deprecated` flag.
    pub const fn deprecates(&self) -> bool {
        matches!(
            self,
            Self::DialToSelf | Self::NoRouteToHost | Self::UnreachableNetwork | Self::PeerIdMismatch
        )
    }

    /// Static label used for metrics and summary logs.
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// Ordered substring patterns. The first match wins, so more specific
/// patterns must come before the catch-all `"none"` entry.
const ERROR_PATTERNS: &[(&str, ErrorCategory)] = &[
    ("connection reset by peer", ErrorCategory::ConnectionReset),
    ("i/o timeout", ErrorCategory::IoTimeout),
    ("dial to self attempted", ErrorCategory::DialToSelf),
    ("dial backoff", ErrorCategory::DialBackoff),
    ("connection refused", ErrorCategory::ConnectionRefused),
    ("context deadline exceeded", ErrorCategory::ContextDeadlineExceeded),
    ("no route to host", ErrorCategory::NoRouteToHost),
    ("network is unreachable", ErrorCategory::UnreachableNetwork),
    ("unreachable network", ErrorCategory::UnreachableNetwork),
    ("peer id mismatch", ErrorCategory::PeerIdMismatch),
    ("none", ErrorCategory::None),
    ("error requesting metadata", ErrorCategory::MetadataError),
];

/// Classifies a raw error string into an [`ErrorCategory`].
///
/// Matching is case-insensitive and substring based, in the fixed order of
/// the pattern table. Empty input classifies as [`ErrorCategory::None`];
/// unmatched non-empty input classifies as [`ErrorCategory::Uncertain`] and
/// is logged so the table can be extended later.
pub fn classify(raw: &str) -> ErrorCategory {
    if raw.is_empty() {
        return ErrorCategory::None;
    }
    let lowered = raw.to_lowercase();
    for (pattern, category) in ERROR_PATTERNS {
        if lowered.contains(pattern) {
            return *category;
        }
    }
    debug!(target: "peers::classify", error = %raw, "unclassified dial error");
    ErrorCategory::Uncertain
}
