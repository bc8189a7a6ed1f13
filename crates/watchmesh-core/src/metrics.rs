use prometheus::{register_int_counter_with_registry, register_int_gauge_with_registry};
use prometheus::{IntCounter, IntGauge, Registry};

/// Cluster- and scheduler-wide counters, grouped in one struct and shared by
/// `Arc` the way the node composition root threads a single [`Metrics`]
/// through every long-running component (spec §10.5). No scrape endpoint is
/// wired up here; that belongs to the out-of-scope daemon bootstrap.
pub struct Metrics {
    pub connected_peers: IntGauge,
    pub replay_log_bytes: IntGauge,
    pub checks_in_flight: IntGauge,
    pub notifications_sent: IntCounter,
    pub checkables_flapping: IntGauge,
}

impl Metrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            connected_peers: register_int_gauge_with_registry!(
                "watchmesh_connected_peers",
                "Number of cluster peers currently in the Connected state",
                registry
            )
            .unwrap(),
            replay_log_bytes: register_int_gauge_with_registry!(
                "watchmesh_replay_log_bytes",
                "Total size on disk of this node's replay log segments",
                registry
            )
            .unwrap(),
            checks_in_flight: register_int_gauge_with_registry!(
                "watchmesh_checks_in_flight",
                "Number of check commands currently executing",
                registry
            )
            .unwrap(),
            notifications_sent: register_int_counter_with_registry!(
                "watchmesh_notifications_sent_total",
                "Total notifications dispatched to users",
                registry
            )
            .unwrap(),
            checkables_flapping: register_int_gauge_with_registry!(
                "watchmesh_checkables_flapping",
                "Number of checkables currently in the flapping state",
                registry
            )
            .unwrap(),
        }
    }

    /// Builds a `Metrics` bound to a throwaway registry, for tests that do
    /// not care about scraping.
    pub fn for_test() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::new(&Registry::new()))
    }
}
