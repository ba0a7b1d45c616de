//! Live host telemetry: OS counters, per-process history, top consumers and
//! hardware cache metrics from an external profiler, published as immutable
//! snapshots.

pub mod config;
pub mod error;
pub mod health_stats;
pub mod history;
pub mod process;
pub mod profiler;
pub mod prompt;
pub mod ranking;
pub mod scheduler;
pub mod snapshot;
pub mod source;
pub mod system;

pub use error::{Result, TelemetryError};
pub use history::ProcessHistoryTracker;
pub use profiler::ExternalProfilerBridge;
pub use ranking::{TopConsumerRanker, TopConsumers, TopProcess};
pub use scheduler::{SchedulerConfig, SchedulerHandle, TelemetryScheduler};
pub use snapshot::{CacheMetrics, MetricSnapshot, ProcessorTopology, ProfilerStatus};
pub use source::{CounterSource, ProcCounterSource};
