//! Hardware cache metrics from an external profiling tool.

pub mod bridge;
pub mod parser;

use std::time::Duration;

pub use bridge::{BridgeState, ExternalProfilerBridge, MetricClass, ProfilerOutput};
pub use parser::{parse_cache_metrics, parse_topology, Parsed};

use crate::error::Result;
use crate::snapshot::{CacheMetrics, ProcessorTopology};

/// Runs the topology class and parses its report.
pub async fn fetch_topology(
    bridge: &ExternalProfilerBridge,
    timeout: Duration,
    previous: &ProcessorTopology,
) -> Result<ProcessorTopology> {
    let output = bridge.invoke(MetricClass::Topology, timeout).await?;
    let lines = output.read_lines().await?;
    parse_topology(&lines, previous).into_result("topology")
}

/// Runs the cache class and parses its report.
pub async fn fetch_cache_metrics(
    bridge: &ExternalProfilerBridge,
    timeout: Duration,
    previous: &CacheMetrics,
) -> Result<CacheMetrics> {
    let output = bridge.invoke(MetricClass::CacheMetrics, timeout).await?;
    let lines = output.read_lines().await?;
    parse_cache_metrics(&lines, previous).into_result("cache metric")
}
