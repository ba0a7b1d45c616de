//! Immutable metric snapshots handed to consumers.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ranking::TopConsumers;
use crate::system::DiskUsage;

/// Static processor structure captured once at startup.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessorTopology {
    pub name: String,
    pub core_count: u32,
    pub thread_count: u32,
    pub base_frequency_mhz: f64,
    pub ccd_count: u32,
    pub ccx_count: u32,
    pub smt_enabled: bool,
}

/// Hardware cache rates reported by the external profiler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheMetrics {
    pub l1_instruction_miss_percent: f64,
    pub l1_data_miss_per_thousand_instructions: f64,
    pub l2_miss_per_thousand_instructions: f64,
    pub l2_hit_per_thousand_instructions: f64,
}

impl CacheMetrics {
    /// One-line summary used in logs and status displays.
    pub fn status_line(&self) -> String {
        format!(
            "L1I Miss: {:.1}% | L1D Miss: {:.1}pti | L2 Hit: {:.1}pti",
            self.l1_instruction_miss_percent,
            self.l1_data_miss_per_thousand_instructions,
            self.l2_hit_per_thousand_instructions
        )
    }
}

/// Cache metrics with the time they were produced. Stale readings stay
/// published until the next successful refresh.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheReading {
    pub metrics: CacheMetrics,
    pub updated_at: DateTime<Utc>,
}

/// State of the profiler-derived metric class.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum ProfilerStatus {
    Initializing,
    Monitoring,
    /// The last refresh failed; last-known-good values are still published.
    Degraded(String),
    /// Permanently off for this session (configuration, privileges or tool missing).
    Disabled(String),
}

impl ProfilerStatus {
    pub fn is_disabled(&self) -> bool {
        matches!(self, ProfilerStatus::Disabled(_))
    }
}

impl std::fmt::Display for ProfilerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProfilerStatus::Initializing => write!(f, "Initializing..."),
            ProfilerStatus::Monitoring => write!(f, "Monitoring..."),
            ProfilerStatus::Degraded(reason) => write!(f, "Degraded ({})", reason),
            ProfilerStatus::Disabled(reason) => write!(f, "Disabled ({})", reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryUsage {
    pub total_bytes: u64,
    pub used_bytes: u64,
}

impl MemoryUsage {
    pub fn usage_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            self.used_bytes as f64 / self.total_bytes as f64 * 100.0
        }
    }
}

/// One fully assembled set of metrics.
///
/// `None` always means "never sampled", never zero. CPU percentages are raw
/// and may transiently exceed 100; use [`clamp_percent`] for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSnapshot {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub total_cpu_percent: Option<f64>,
    pub per_core_cpu_percent: Vec<f64>,
    pub memory: Option<MemoryUsage>,
    pub disk_usages: Vec<DiskUsage>,
    pub top_consumers: Option<TopConsumers>,
    pub tracked_processes: usize,
    pub processor_topology: Option<ProcessorTopology>,
    pub cache_metrics: Option<CacheReading>,
    pub profiler_status: ProfilerStatus,
}

impl MetricSnapshot {
    /// A snapshot with nothing sampled yet.
    pub fn empty(profiler_status: ProfilerStatus) -> Self {
        Self {
            sequence: 0,
            timestamp: Utc::now(),
            total_cpu_percent: None,
            per_core_cpu_percent: Vec::new(),
            memory: None,
            disk_usages: Vec::new(),
            top_consumers: None,
            tracked_processes: 0,
            processor_topology: None,
            cache_metrics: None,
            profiler_status,
        }
    }
}

/// Clamps a raw percentage into 0..=100 for display.
pub fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_percent() {
        assert_eq!(clamp_percent(101.3), 100.0);
        assert_eq!(clamp_percent(-0.5), 0.0);
        assert_eq!(clamp_percent(42.0), 42.0);
        assert_eq!(clamp_percent(f64::NAN), 0.0);
    }

    #[test]
    fn test_status_line() {
        let m = CacheMetrics {
            l1_instruction_miss_percent: 2.5,
            l1_data_miss_per_thousand_instructions: 1.1,
            l2_miss_per_thousand_instructions: 5.0,
            l2_hit_per_thousand_instructions: 80.0,
        };
        assert_eq!(
            m.status_line(),
            "L1I Miss: 2.5% | L1D Miss: 1.1pti | L2 Hit: 80.0pti"
        );
    }

    #[test]
    fn test_profiler_status_serializes_tagged() {
        let json = serde_json::to_string(&ProfilerStatus::Disabled("no tool".into())).unwrap();
        assert_eq!(json, r#"{"state":"disabled","detail":"no tool"}"#);
        let json = serde_json::to_string(&ProfilerStatus::Monitoring).unwrap();
        assert_eq!(json, r#"{"state":"monitoring"}"#);
    }
}
