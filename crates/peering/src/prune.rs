//! The per-peer backoff state machine.
//!
//! Every connection outcome folds the peer into one of three delay
//! buckets. Repeated outcomes in the same bucket escalate the delay
//! geometrically up to a per-bucket cap; switching buckets resets the
//! escalation. Peers that stay out of the positive bucket for longer than
//! the deprecation window become deprecable.

use std::time::{Duration, SystemTime};

use sonda_peers::{ErrorCategory, PeerRecord};

/// Caps the escalation exponent so the doubling can never overflow; the
/// per-bucket delay caps bind long before this does.
const MAX_DELAY_EXPONENT: u32 = 20;

/// The three delay buckets an attempted peer can sit in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DelayCategory {
    /// The peer answered recently; re-probe on a long, widening cadence.
    Positive,
    /// The peer failed in a way that often self-resolves (restart, brief
    /// network blip); retry on a short cadence.
    NegativeWithHope,
    /// The peer failed in a way that tends to persist; retry rarely.
    NegativeWithNoHope,
}

impl DelayCategory {
    /// Folds a classified outcome into its delay bucket.
    pub const fn from_error(category: ErrorCategory) -> Self {
        match category {
            ErrorCategory::None => Self::Positive,
            ErrorCategory::ConnectionReset
            | ErrorCategory::ConnectionRefused
            | ErrorCategory::DialBackoff
            | ErrorCategory::ContextDeadlineExceeded
            | ErrorCategory::MetadataError => Self::NegativeWithHope,
            ErrorCategory::IoTimeout
            | ErrorCategory::NoRouteToHost
            | ErrorCategory::UnreachableNetwork
            | ErrorCategory::PeerIdMismatch
            | ErrorCategory::DialToSelf
            | ErrorCategory::Uncertain => Self::NegativeWithNoHope,
        }
    }
}

/// Base delays, caps and the deprecation window.
///
/// The defaults mirror the cadences the crawler was tuned with; they are
/// plain data so deployments can override them without a rebuild.
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    /// First re-probe delay after a success.
    pub positive_base: Duration,
    /// Longest re-probe delay for healthy peers.
    pub positive_cap: Duration,
    /// First retry delay after a transient failure.
    pub hope_base: Duration,
    /// Longest retry delay for transient failures.
    pub hope_cap: Duration,
    /// First retry delay after a durable failure.
    pub no_hope_base: Duration,
    /// Longest retry delay for durable failures.
    pub no_hope_cap: Duration,
    /// How long a peer may stay non-positive before it is deprecable.
    pub deprecation_after: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            positive_base: Duration::from_secs(6 * 3600),
            positive_cap: Duration::from_secs(7 * 24 * 3600),
            hope_base: Duration::from_secs(2 * 60),
            hope_cap: Duration::from_secs(3600),
            no_hope_base: Duration::from_secs(12 * 3600),
            no_hope_cap: Duration::from_secs(192 * 3600),
            deprecation_after: Duration::from_secs(24 * 3600),
        }
    }
}

/// The backoff state of one peer.
#[derive(Debug, Clone, Copy)]
pub struct PruneState {
    category: DelayCategory,
    /// Consecutive outcomes observed in the current bucket. Zero only for
    /// freshly discovered peers, which are eligible immediately.
    consecutive: u32,
    category_since: SystemTime,
    last_outcome_at: SystemTime,
    /// Anchor for the deprecation window: the last moment the peer was in
    /// (or entered) the positive bucket.
    positive_since: SystemTime,
}

impl PruneState {
    /// State for a freshly discovered, never-attempted peer: optimistic
    /// and eligible immediately.
    pub const fn new(now: SystemTime) -> Self {
        Self {
            category: DelayCategory::Positive,
            consecutive: 0,
            category_since: now,
            last_outcome_at: now,
            positive_since: now,
        }
    }

    /// Rebuilds the state of a peer from its persisted record, used when
    /// the strategy first sees a peer after a restart.
    pub fn from_record(record: &PeerRecord, config: &BackoffConfig, now: SystemTime) -> Self {
        if !record.attempted && record.connections.is_empty() {
            return Self::new(now);
        }

        // A clean last outcome without successful metadata still means the
        // peer never really identified; treat it as a metadata failure.
        let effective = if record.last_error == ErrorCategory::None && !record.metadata_succeeded {
            ErrorCategory::MetadataError
        } else {
            record.last_error
        };
        let category = DelayCategory::from_error(effective);
        let consecutive = match category {
            DelayCategory::Positive => 1,
            _ => record.negative_attempts.len().max(1) as u32,
        };
        let last_outcome_at = record
            .last_error_at
            .or_else(|| record.negative_attempts.last().copied())
            .or_else(|| record.connections.last().map(|c| c.at))
            .unwrap_or(now);
        // Deprecated records stay deprecable; everyone else gets a fresh
        // window from now.
        let positive_since = if record.deprecated {
            now.checked_sub(config.deprecation_after).unwrap_or(now)
        } else {
            now
        };

        Self { category, consecutive, category_since: last_outcome_at, last_outcome_at, positive_since }
    }

    /// Folds one classified outcome into the state.
    pub fn on_outcome(&mut self, category: ErrorCategory, at: SystemTime) {
        let next = DelayCategory::from_error(category);
        if next == self.category {
            self.consecutive += 1;
        } else {
            self.category = next;
            self.category_since = at;
            self.consecutive = 1;
        }
        if next == DelayCategory::Positive {
            self.positive_since = at;
        }
        self.last_outcome_at = at;
    }

    /// The delay currently applied before the next attempt.
    pub fn delay(&self, config: &BackoffConfig) -> Duration {
        if self.consecutive == 0 {
            return Duration::ZERO;
        }
        let (base, cap) = match self.category {
            DelayCategory::Positive => (config.positive_base, config.positive_cap),
            DelayCategory::NegativeWithHope => (config.hope_base, config.hope_cap),
            DelayCategory::NegativeWithNoHope => (config.no_hope_base, config.no_hope_cap),
        };
        let exponent = (self.consecutive - 1).min(MAX_DELAY_EXPONENT);
        base.saturating_mul(1u32 << exponent).min(cap)
    }

    /// The earliest moment the next connection attempt is allowed.
    pub fn next_eligible(&self, config: &BackoffConfig) -> SystemTime {
        self.last_outcome_at.checked_add(self.delay(config)).unwrap_or(self.last_outcome_at)
    }

    /// Whether an attempt is allowed at `now`.
    pub fn is_eligible(&self, config: &BackoffConfig, now: SystemTime) -> bool {
        now >= self.next_eligible(config)
    }

    /// Whether the peer has stayed out of the positive bucket for at least
    /// the deprecation window.
    pub fn deprecable(&self, config: &BackoffConfig, now: SystemTime) -> bool {
        self.category != DelayCategory::Positive
            && now
                .duration_since(self.positive_since)
                .is_ok_and(|dwell| dwell >= config.deprecation_after)
    }

    /// The bucket the peer currently sits in.
    pub const fn category(&self) -> DelayCategory {
        self.category
    }

    /// Consecutive outcomes observed in the current bucket.
    pub const fn consecutive(&self) -> u32 {
        self.consecutive
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libp2p_identity::PeerId;

    const HOUR: Duration = Duration::from_secs(3600);
    const MINUTE: Duration = Duration::from_secs(60);

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn test_fresh_peer_is_eligible_immediately() {
        let cfg = BackoffConfig::default();
        let state = PruneState::new(at(0));
        assert_eq!(state.delay(&cfg), Duration::ZERO);
        assert!(state.is_eligible(&cfg, at(0)));
        assert!(!state.deprecable(&cfg, at(0)));
    }

    #[test]
    fn test_positive_escalation_doubles_from_six_hours() {
        let cfg = BackoffConfig::default();
        let mut state = PruneState::new(at(0));

        state.on_outcome(ErrorCategory::None, at(0));
        assert_eq!(state.delay(&cfg), 6 * HOUR);
        assert_eq!(state.next_eligible(&cfg), at(0) + 6 * HOUR);

        state.on_outcome(ErrorCategory::None, at(100));
        assert_eq!(state.delay(&cfg), 12 * HOUR);

        state.on_outcome(ErrorCategory::None, at(200));
        assert_eq!(state.delay(&cfg), 24 * HOUR);
    }

    #[test]
    fn test_positive_delay_caps_at_seven_days() {
        let cfg = BackoffConfig::default();
        let mut state = PruneState::new(at(0));
        for i in 0..12 {
            state.on_outcome(ErrorCategory::None, at(i));
        }
        assert_eq!(state.delay(&cfg), 7 * 24 * HOUR);
    }

    #[test]
    fn test_transient_failure_resets_to_two_minutes() {
        let cfg = BackoffConfig::default();
        let mut state = PruneState::new(at(0));
        state.on_outcome(ErrorCategory::None, at(0));

        state.on_outcome(ErrorCategory::ConnectionReset, at(10));
        assert_eq!(state.category(), DelayCategory::NegativeWithHope);
        assert_eq!(state.consecutive(), 1);
        assert_eq!(state.delay(&cfg), 2 * MINUTE);
        assert_eq!(state.next_eligible(&cfg), at(10) + 2 * MINUTE);
    }

    #[test]
    fn test_durable_failure_resets_to_twelve_hours() {
        let cfg = BackoffConfig::default();
        let mut state = PruneState::new(at(0));
        state.on_outcome(ErrorCategory::NoRouteToHost, at(0));
        assert_eq!(state.category(), DelayCategory::NegativeWithNoHope);
        assert_eq!(state.delay(&cfg), 12 * HOUR);
    }

    #[test]
    fn test_same_bucket_escalates_across_categories() {
        let cfg = BackoffConfig::default();
        let mut state = PruneState::new(at(0));
        // Reset and refused share the transient bucket, so the second
        // failure escalates rather than resetting.
        state.on_outcome(ErrorCategory::ConnectionReset, at(0));
        state.on_outcome(ErrorCategory::ConnectionRefused, at(10));
        assert_eq!(state.consecutive(), 2);
        assert_eq!(state.delay(&cfg), 4 * MINUTE);

        state.on_outcome(ErrorCategory::DialBackoff, at(20));
        assert_eq!(state.delay(&cfg), 8 * MINUTE);
    }

    #[test]
    fn test_bucket_switch_resets_consecutive_count() {
        let cfg = BackoffConfig::default();
        let mut state = PruneState::new(at(0));
        state.on_outcome(ErrorCategory::ConnectionReset, at(0));
        state.on_outcome(ErrorCategory::ConnectionReset, at(10));
        assert_eq!(state.consecutive(), 2);

        state.on_outcome(ErrorCategory::IoTimeout, at(20));
        assert_eq!(state.category(), DelayCategory::NegativeWithNoHope);
        assert_eq!(state.consecutive(), 1);
        assert_eq!(state.delay(&cfg), 12 * HOUR);

        state.on_outcome(ErrorCategory::None, at(30));
        assert_eq!(state.category(), DelayCategory::Positive);
        assert_eq!(state.consecutive(), 1);
        assert_eq!(state.delay(&cfg), 6 * HOUR);
    }

    #[test]
    fn test_hope_delay_caps_at_one_hour() {
        let cfg = BackoffConfig::default();
        let mut state = PruneState::new(at(0));
        for i in 0..10 {
            state.on_outcome(ErrorCategory::ConnectionRefused, at(i));
        }
        assert_eq!(state.delay(&cfg), HOUR);
    }

    #[test]
    fn test_deprecation_boundary() {
        let cfg = BackoffConfig::default();
        let mut state = PruneState::new(at(0));
        state.on_outcome(ErrorCategory::IoTimeout, at(0));

        let threshold = at(0) + cfg.deprecation_after;
        assert!(!state.deprecable(&cfg, threshold - Duration::from_secs(1)));
        assert!(state.deprecable(&cfg, threshold));
    }

    #[test]
    fn test_positive_outcome_refreshes_deprecation_anchor() {
        let cfg = BackoffConfig::default();
        let mut state = PruneState::new(at(0));
        state.on_outcome(ErrorCategory::IoTimeout, at(0));
        state.on_outcome(ErrorCategory::None, at(1000));
        state.on_outcome(ErrorCategory::IoTimeout, at(2000));

        // The window restarts from the success at t=1000.
        assert!(!state.deprecable(&cfg, at(1000) + cfg.deprecation_after - Duration::from_secs(1)));
        assert!(state.deprecable(&cfg, at(1000) + cfg.deprecation_after));
    }

    #[test]
    fn test_from_record_fresh_record_is_eligible() {
        let cfg = BackoffConfig::default();
        let record = PeerRecord::new(PeerId::random());
        let state = PruneState::from_record(&record, &cfg, at(0));
        assert!(state.is_eligible(&cfg, at(0)));
    }

    #[test]
    fn test_from_record_restores_negative_streak() {
        let cfg = BackoffConfig::default();
        let mut record = PeerRecord::new(PeerId::random());
        record.apply_attempt_outcome(ErrorCategory::ConnectionRefused, at(100));
        record.apply_attempt_outcome(ErrorCategory::ConnectionRefused, at(200));

        let state = PruneState::from_record(&record, &cfg, at(300));
        assert_eq!(state.category(), DelayCategory::NegativeWithHope);
        assert_eq!(state.consecutive(), 2);
        assert_eq!(state.next_eligible(&cfg), at(200) + 4 * MINUTE);
    }

    #[test]
    fn test_from_record_deprecated_record_stays_deprecable() {
        let cfg = BackoffConfig::default();
        let mut record = PeerRecord::new(PeerId::random());
        record.apply_attempt_outcome(ErrorCategory::NoRouteToHost, at(100));
        assert!(record.deprecated);

        let state = PruneState::from_record(&record, &cfg, at(200));
        assert!(state.deprecable(&cfg, at(200)));
    }

    #[test]
    fn test_from_record_successful_identify_restores_positive() {
        let cfg = BackoffConfig::default();
        let mut record = PeerRecord::new(PeerId::random());
        record.apply_attempt_outcome(ErrorCategory::None, at(100));
        record.metadata_succeeded = true;

        let state = PruneState::from_record(&record, &cfg, at(200));
        assert_eq!(state.category(), DelayCategory::Positive);
        assert_eq!(state.next_eligible(&cfg), at(100) + 6 * HOUR);
    }
}
