//! Application state shared by the HTTP handlers.

use herakles_host_telemetry::config::Config;
use herakles_host_telemetry::health_stats::HealthStats;
use herakles_host_telemetry::scheduler::SnapshotReceiver;
use herakles_host_telemetry::snapshot::MetricSnapshot;
use prometheus::Registry;
use std::sync::Arc;

use crate::metrics::TelemetryMetrics;

/// Type alias for shared application state.
pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub registry: Registry,
    pub metrics: TelemetryMetrics,
    /// Latest published snapshot; handlers never touch the live scheduler state.
    pub snapshots: SnapshotReceiver,
    pub health_stats: Arc<HealthStats>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn latest(&self) -> Option<Arc<MetricSnapshot>> {
        self.snapshots.borrow().clone()
    }
}
