//! Metrics for the peering strategy.

/// Container for the metric identifiers recorded by this crate.
#[derive(Debug)]
pub struct Metrics;

impl Metrics {
    /// Identifier for the gauge that tracks the wall-clock duration of the
    /// last full peerstore pass, in seconds.
    pub const ITERATION_TIME: &'static str = "sonda_peering_iteration_seconds";

    /// Identifier for the gauge that tracks how many peers were attempted
    /// in the last pass.
    pub const ATTEMPTED_PEERS: &'static str = "sonda_peering_attempted_peers";

    /// Identifier for the counter that tracks dial outcomes by category.
    pub const DIAL_OUTCOMES: &'static str = "sonda_peering_dial_outcomes";

    /// Identifier for the gauge that tracks peers waiting out their
    /// backoff delay in the last pass.
    pub const WAITING_PEERS: &'static str = "sonda_peering_waiting_peers";
}
