//! The peering strategy actor.
//!
//! A continuously-running control loop: each pass snapshots the peerstore,
//! dials every eligible peer through the [`Dialer`] boundary on a bounded
//! worker pool, and folds the outcomes back into the store and the
//! per-peer [`PruneState`]s. Dial failures are steady-state data here, not
//! errors; only store failures abort the actor.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::{Duration, SystemTime},
};

use libp2p::Multiaddr;
use libp2p_identity::PeerId;
use sonda_peers::{ErrorCategory, PeerRecord};
use sonda_store::{PeerBackend, PeerStore, StoreError};
use tokio::{
    sync::{Semaphore, mpsc},
    time::Instant,
};
use tokio_util::sync::CancellationToken;

use crate::{BackoffConfig, DialFailure, Dialer, Metrics, PruneState};

/// An error that aborts the strategy actor.
#[derive(Debug, thiserror::Error)]
pub enum PeeringError {
    /// The peer store failed at the storage level.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Tuning knobs for the strategy loop.
#[derive(Debug, Clone, Copy)]
pub struct StrategyConfig {
    /// Backoff delays and the deprecation window.
    pub backoff: BackoffConfig,
    /// Upper bound on a single dial attempt.
    pub dial_timeout: Duration,
    /// Dial attempts per peer per pass before giving up for the cycle.
    pub dial_attempts: u32,
    /// Concurrent dials in flight across the whole pass.
    pub dial_workers: usize,
    /// Minimum wall-clock spacing between pass starts, so a small
    /// peerstore does not spin.
    pub min_iteration: Duration,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            dial_timeout: Duration::from_secs(15),
            dial_attempts: 1,
            dial_workers: 10,
            min_iteration: Duration::from_secs(15),
        }
    }
}

/// Out-of-band notifications that feed the backoff state machine.
#[derive(Debug, Clone)]
pub enum StrategySignal {
    /// An identify exchange finished for a peer.
    Identify {
        /// The identified peer.
        peer: PeerId,
        /// Whether the exchange succeeded.
        succeeded: bool,
        /// When the exchange finished.
        at: SystemTime,
    },
}

/// The completed result of one spawned dial task.
#[derive(Debug)]
struct DialOutcome {
    peer: PeerId,
    result: Result<(), DialFailure>,
    at: SystemTime,
}

/// Counters for one full peerstore pass.
#[derive(Debug, Default, Clone, Copy)]
struct PassStats {
    attempted: usize,
    succeeded: usize,
    failed: usize,
    waiting: usize,
    connected: usize,
    addressless: usize,
}

/// The peering strategy actor. One instance owns all [`PruneState`]s; the
/// store's per-id atomicity plus the one-in-flight-dial-per-peer guard
/// keep outcome handling linearized per peer.
#[derive(Debug)]
pub struct PeeringActor<B, D> {
    store: Arc<PeerStore<B>>,
    dialer: D,
    config: StrategyConfig,
    cancellation: CancellationToken,
    states: HashMap<PeerId, PruneState>,
    in_flight: HashSet<PeerId>,
}

impl<B: PeerBackend, D: Dialer> PeeringActor<B, D> {
    /// Creates the actor. The signal channel is created by the caller and
    /// its receiver handed to [`Self::start`].
    pub fn new(
        store: Arc<PeerStore<B>>,
        dialer: D,
        config: StrategyConfig,
        cancellation: CancellationToken,
    ) -> Self {
        Self { store, dialer, config, cancellation, states: HashMap::new(), in_flight: HashSet::new() }
    }

    /// Runs the strategy until cancellation.
    pub async fn start(
        mut self,
        mut signals: mpsc::Receiver<StrategySignal>,
    ) -> Result<(), PeeringError> {
        info!(
            target: "peering",
            workers = self.config.dial_workers,
            timeout = ?self.config.dial_timeout,
            "starting peering strategy"
        );
        let limiter = Arc::new(Semaphore::new(self.config.dial_workers.max(1)));
        let (outcome_tx, mut outcome_rx) = mpsc::channel(self.config.dial_workers.max(1) * 2);

        loop {
            if self.cancellation.is_cancelled() {
                break;
            }
            let started = Instant::now();
            let stats =
                self.run_pass(&outcome_tx, &mut outcome_rx, &mut signals, &limiter).await?;
            let elapsed = started.elapsed();

            sonda_macros::set!(gauge, Metrics::ITERATION_TIME, elapsed.as_secs_f64());
            sonda_macros::set!(gauge, Metrics::ATTEMPTED_PEERS, stats.attempted as f64);
            sonda_macros::set!(gauge, Metrics::WAITING_PEERS, stats.waiting as f64);
            info!(
                target: "peering",
                attempted = stats.attempted,
                succeeded = stats.succeeded,
                failed = stats.failed,
                waiting = stats.waiting,
                connected = stats.connected,
                addressless = stats.addressless,
                elapsed = ?elapsed,
                "peerstore pass finished"
            );

            tokio::select! {
                _ = self.cancellation.cancelled() => break,
                _ = tokio::time::sleep_until(started + self.config.min_iteration) => {}
            }
        }

        info!(target: "peering", "peering strategy stopped");
        Ok(())
    }

    /// Walks one snapshot of the peerstore, dialing every eligible peer,
    /// then drains all in-flight dials before returning.
    async fn run_pass(
        &mut self,
        outcome_tx: &mpsc::Sender<DialOutcome>,
        outcome_rx: &mut mpsc::Receiver<DialOutcome>,
        signals: &mut mpsc::Receiver<StrategySignal>,
        limiter: &Arc<Semaphore>,
    ) -> Result<PassStats, PeeringError> {
        let mut stats = PassStats::default();
        let local = self.dialer.local_peer_id();
        // Cloned so the select arms below never hold a borrow of `self`
        // while an arm handler mutates it.
        let cancellation = self.cancellation.clone();

        for id in self.store.list()? {
            if cancellation.is_cancelled() {
                break;
            }
            // Apply anything that completed while we were walking.
            while let Ok(outcome) = outcome_rx.try_recv() {
                self.apply_outcome(outcome, &mut stats);
            }
            while let Ok(signal) = signals.try_recv() {
                self.apply_signal(signal);
            }

            if id == local || self.in_flight.contains(&id) {
                continue;
            }
            let Some(record) = self.store.get(&id)? else {
                continue;
            };
            if record.is_connected() {
                stats.connected += 1;
                continue;
            }
            let now = SystemTime::now();
            let next_eligible = self
                .states
                .entry(id)
                .or_insert_with(|| PruneState::from_record(&record, &self.config.backoff, now))
                .next_eligible(&self.config.backoff);
            if next_eligible > now {
                stats.waiting += 1;
                continue;
            }
            let addrs = dial_addrs(&record);
            if addrs.is_empty() {
                stats.addressless += 1;
                continue;
            }

            let permit = loop {
                tokio::select! {
                    _ = cancellation.cancelled() => return Ok(stats),
                    permit = limiter.clone().acquire_owned() => {
                        match permit {
                            Ok(permit) => break permit,
                            // The semaphore is never closed; treat it as
                            // cancellation if it somehow is.
                            Err(_) => return Ok(stats),
                        }
                    }
                    Some(outcome) = outcome_rx.recv() => self.apply_outcome(outcome, &mut stats),
                    Some(signal) = signals.recv() => self.apply_signal(signal),
                }
            };

            debug!(target: "peering", peer = %id, addrs = addrs.len(), "dialing peer");
            self.in_flight.insert(id);
            stats.attempted += 1;

            let dialer = self.dialer.clone();
            let tx = outcome_tx.clone();
            let timeout = self.config.dial_timeout;
            let attempts = self.config.dial_attempts;
            tokio::spawn(async move {
                let result = dial_with_retries(&dialer, id, addrs, timeout, attempts).await;
                let outcome = DialOutcome { peer: id, result, at: SystemTime::now() };
                let _ = tx.send(outcome).await;
                drop(permit);
            });
        }

        // Wait out the tail of the pass so outcomes land in the pass that
        // spawned them.
        while !self.in_flight.is_empty() {
            tokio::select! {
                _ = cancellation.cancelled() => break,
                Some(outcome) = outcome_rx.recv() => self.apply_outcome(outcome, &mut stats),
                Some(signal) = signals.recv() => self.apply_signal(signal),
            }
        }

        Ok(stats)
    }

    /// Folds one dial outcome into the store and the peer's backoff state.
    fn apply_outcome(&mut self, outcome: DialOutcome, stats: &mut PassStats) {
        self.in_flight.remove(&outcome.peer);
        let (succeeded, raw_error) = match &outcome.result {
            Ok(()) => (true, String::new()),
            Err(failure) => (false, failure.message.clone()),
        };

        let category = match self.store.record_attempt_outcome(&outcome.peer, succeeded, &raw_error)
        {
            Ok(category) => category,
            Err(err) => {
                warn!(target: "peering", peer = %outcome.peer, %err, "failed to record attempt outcome");
                return;
            }
        };

        let state =
            self.states.entry(outcome.peer).or_insert_with(|| PruneState::new(outcome.at));
        state.on_outcome(category, outcome.at);
        if state.deprecable(&self.config.backoff, outcome.at) {
            if let Err(err) = self.store.set_deprecated(&outcome.peer, true) {
                warn!(target: "peering", peer = %outcome.peer, %err, "failed to deprecate peer");
            }
        }

        sonda_macros::inc!(counter, Metrics::DIAL_OUTCOMES, "category", category.as_str());
        if succeeded {
            stats.succeeded += 1;
            debug!(target: "peering", peer = %outcome.peer, "dial succeeded");
        } else {
            stats.failed += 1;
            debug!(
                target: "peering",
                peer = %outcome.peer,
                category = category.as_str(),
                error = %raw_error,
                "dial failed"
            );
        }
    }

    /// Folds an out-of-band identify signal into the peer's backoff state.
    fn apply_signal(&mut self, signal: StrategySignal) {
        match signal {
            StrategySignal::Identify { peer, succeeded, at } => {
                let category =
                    if succeeded { ErrorCategory::None } else { ErrorCategory::MetadataError };
                self.states
                    .entry(peer)
                    .or_insert_with(|| PruneState::new(at))
                    .on_outcome(category, at);
            }
        }
    }
}

/// Orders a record's addresses for dialing, public addresses first.
fn dial_addrs(record: &PeerRecord) -> Vec<Multiaddr> {
    let mut addrs = record.addresses.clone();
    if let Some(public) = record.public_addr().cloned() {
        addrs.retain(|addr| *addr != public);
        addrs.insert(0, public);
    }
    addrs
}

/// Dials with a bounded timeout and a small fixed retry count. A timeout
/// surfaces as the classifiable `i/o timeout` failure.
async fn dial_with_retries<D: Dialer>(
    dialer: &D,
    peer: PeerId,
    addrs: Vec<Multiaddr>,
    timeout: Duration,
    attempts: u32,
) -> Result<(), DialFailure> {
    let mut last = DialFailure::new("i/o timeout");
    for _ in 0..attempts.max(1) {
        match tokio::time::timeout(timeout, dialer.dial(peer, addrs.clone())).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(failure)) => last = failure,
            Err(_elapsed) => last = DialFailure::new("i/o timeout"),
        }
    }
    Err(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DelayCategory;
    use async_trait::async_trait;
    use sonda_store::MemoryBackend;
    use std::{
        collections::VecDeque,
        sync::Mutex,
        time::{Duration, SystemTime},
    };

    #[derive(Clone)]
    struct ScriptedDialer {
        local: PeerId,
        script: Arc<Mutex<VecDeque<Result<(), DialFailure>>>>,
    }

    impl ScriptedDialer {
        fn new(script: Vec<Result<(), DialFailure>>) -> Self {
            Self { local: PeerId::random(), script: Arc::new(Mutex::new(script.into())) }
        }
    }

    #[async_trait]
    impl Dialer for ScriptedDialer {
        fn local_peer_id(&self) -> PeerId {
            self.local
        }

        async fn dial(&self, _peer: PeerId, _addrs: Vec<Multiaddr>) -> Result<(), DialFailure> {
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(DialFailure::new("connection refused")))
        }
    }

    fn store_with_peer() -> (Arc<PeerStore<MemoryBackend>>, PeerId) {
        let store = Arc::new(PeerStore::new(MemoryBackend::new()));
        let id = PeerId::random();
        let mut record = PeerRecord::new(id);
        record.addresses = vec!["/ip4/1.2.3.4/tcp/9000".parse().unwrap()];
        store.store_or_update(record).unwrap();
        (store, id)
    }

    fn actor_with(
        store: Arc<PeerStore<MemoryBackend>>,
        dialer: ScriptedDialer,
    ) -> (PeeringActor<MemoryBackend, ScriptedDialer>, CancellationToken) {
        let cancellation = CancellationToken::new();
        let config = StrategyConfig {
            dial_timeout: Duration::from_secs(1),
            min_iteration: Duration::from_millis(20),
            ..Default::default()
        };
        let actor = PeeringActor::new(store, dialer, config, cancellation.clone());
        (actor, cancellation)
    }

    #[tokio::test]
    async fn test_timeout_then_success_scenario() {
        let (store, id) = store_with_peer();
        let dialer = ScriptedDialer::new(vec![]);
        let (mut actor, _cancellation) = actor_with(store.clone(), dialer);
        let mut stats = PassStats::default();

        // First attempt: the host reports an i/o timeout.
        actor.apply_outcome(
            DialOutcome {
                peer: id,
                result: Err(DialFailure::new("i/o timeout")),
                at: SystemTime::now(),
            },
            &mut stats,
        );

        let record = store.get(&id).unwrap().unwrap();
        assert_eq!(record.attempt_count, 1);
        assert_eq!(record.last_error, ErrorCategory::IoTimeout);
        assert!(!record.deprecated);
        let state = actor.states[&id];
        assert_eq!(state.category(), DelayCategory::NegativeWithNoHope);
        let wait = state
            .next_eligible(&actor.config.backoff)
            .duration_since(SystemTime::now())
            .unwrap_or_default();
        assert!(wait > Duration::from_secs(11 * 3600) && wait <= Duration::from_secs(12 * 3600));

        // A later attempt succeeds.
        actor.apply_outcome(
            DialOutcome { peer: id, result: Ok(()), at: SystemTime::now() },
            &mut stats,
        );
        let record = store.get(&id).unwrap().unwrap();
        assert_eq!(record.attempt_count, 2);
        assert_eq!(record.last_error, ErrorCategory::None);
        assert!(record.negative_attempts.is_empty());
        let state = actor.states[&id];
        assert_eq!(state.category(), DelayCategory::Positive);
        let wait = state
            .next_eligible(&actor.config.backoff)
            .duration_since(SystemTime::now())
            .unwrap_or_default();
        assert!(wait > Duration::from_secs(5 * 3600) && wait <= Duration::from_secs(6 * 3600));
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.succeeded, 1);
    }

    #[tokio::test]
    async fn test_structural_failure_deprecates_via_store() {
        let (store, id) = store_with_peer();
        let dialer = ScriptedDialer::new(vec![]);
        let (mut actor, _cancellation) = actor_with(store.clone(), dialer);
        let mut stats = PassStats::default();

        actor.apply_outcome(
            DialOutcome {
                peer: id,
                result: Err(DialFailure::new("connect: no route to host")),
                at: SystemTime::now(),
            },
            &mut stats,
        );

        let record = store.get(&id).unwrap().unwrap();
        assert!(record.deprecated);
        assert_eq!(record.last_error, ErrorCategory::NoRouteToHost);
    }

    #[tokio::test]
    async fn test_identify_signal_moves_state_positive() {
        let (store, id) = store_with_peer();
        let dialer = ScriptedDialer::new(vec![]);
        let (mut actor, _cancellation) = actor_with(store, dialer);

        actor.apply_signal(StrategySignal::Identify {
            peer: id,
            succeeded: true,
            at: SystemTime::now(),
        });
        assert_eq!(actor.states[&id].category(), DelayCategory::Positive);

        actor.apply_signal(StrategySignal::Identify {
            peer: id,
            succeeded: false,
            at: SystemTime::now(),
        });
        assert_eq!(actor.states[&id].category(), DelayCategory::NegativeWithHope);
    }

    #[tokio::test]
    async fn test_pass_dials_eligible_peer_and_records_outcome() {
        let (store, id) = store_with_peer();
        let dialer = ScriptedDialer::new(vec![Err(DialFailure::new("connection refused"))]);
        let (actor, cancellation) = actor_with(store.clone(), dialer);
        let (_signal_tx, signal_rx) = mpsc::channel(8);

        let handle = tokio::spawn(actor.start(signal_rx));

        // Wait until the pass has recorded the scripted outcome.
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let record = store.get(&id).unwrap().unwrap();
            if record.attempt_count >= 1 {
                assert_eq!(record.last_error, ErrorCategory::ConnectionRefused);
                break;
            }
            assert!(Instant::now() < deadline, "strategy never dialed the peer");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        cancellation.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_cancellation_stops_actor_promptly() {
        let store = Arc::new(PeerStore::new(MemoryBackend::new()));
        let dialer = ScriptedDialer::new(vec![]);
        let (actor, cancellation) = actor_with(store, dialer);
        let (_signal_tx, signal_rx) = mpsc::channel(8);

        cancellation.cancel();
        let result =
            tokio::time::timeout(Duration::from_secs(1), actor.start(signal_rx)).await;
        assert!(result.is_ok(), "actor did not observe cancellation");
    }

    #[test]
    fn test_dial_addrs_puts_public_first() {
        let mut record = PeerRecord::new(PeerId::random());
        record.addresses = vec![
            "/ip4/192.168.0.2/tcp/9000".parse().unwrap(),
            "/ip4/8.8.8.8/tcp/9000".parse().unwrap(),
        ];
        let addrs = dial_addrs(&record);
        assert_eq!(addrs[0].to_string(), "/ip4/8.8.8.8/tcp/9000");
        assert_eq!(addrs.len(), 2);
    }
}
