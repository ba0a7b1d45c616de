//! Sliding-window per-process history.
//!
//! History is keyed by process name rather than PID: PIDs churn across
//! restarts, and several instances of the same executable share one entry.
//! Every tick appends one `(cpu_percent, memory_mb, timestamp)` point per
//! running instance and evicts points older than the retention window.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use ahash::AHashMap as HashMap;
use tracing::trace;

use crate::process::ProcessSample;

/// Default age after which history points are evicted.
pub const DEFAULT_RETENTION_WINDOW: Duration = Duration::from_secs(60);

/// One retained history point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryPoint {
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub timestamp: Instant,
}

/// Retained points of one process name, oldest first.
#[derive(Debug, Clone, Default)]
pub struct ProcessHistoryEntry {
    samples: VecDeque<HistoryPoint>,
}

impl ProcessHistoryEntry {
    pub fn samples(&self) -> impl Iterator<Item = &HistoryPoint> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn average_cpu(&self) -> f64 {
        mean(self.samples.iter().map(|p| p.cpu_percent), self.samples.len())
    }

    pub fn average_memory_mb(&self) -> f64 {
        mean(self.samples.iter().map(|p| p.memory_mb), self.samples.len())
    }

    /// Drops points older than `cutoff`. Samples are appended in tick order,
    /// so only the front needs checking.
    fn prune(&mut self, cutoff: Instant) {
        while self
            .samples
            .front()
            .is_some_and(|p| p.timestamp < cutoff)
        {
            self.samples.pop_front();
        }
    }
}

fn mean(values: impl Iterator<Item = f64>, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        values.sum::<f64>() / count as f64
    }
}

/// Current-tick reading of one process name, not averaged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurrentReading {
    /// CPU percent against the immediately prior tick; 0 without a prior sample.
    pub cpu_percent: f64,
    pub memory_mb: f64,
}

/// Normalized CPU usage between two cumulative CPU-time readings.
///
/// `Δcpu / (Δwall × cores) × 100`. Returns 0 when the wall interval is not
/// positive, the core count is zero, or the CPU counter went backwards.
pub fn cpu_percent_between(
    prev_cpu: Duration,
    prev_at: Instant,
    cur_cpu: Duration,
    cur_at: Instant,
    logical_cores: usize,
) -> f64 {
    let wall_ms = cur_at.saturating_duration_since(prev_at).as_secs_f64() * 1000.0;
    if wall_ms <= 0.0 || logical_cores == 0 {
        return 0.0;
    }
    let Some(cpu_delta) = cur_cpu.checked_sub(prev_cpu) else {
        return 0.0;
    };
    let percent = cpu_delta.as_secs_f64() * 1000.0 / (wall_ms * logical_cores as f64) * 100.0;
    if percent.is_finite() {
        percent
    } else {
        0.0
    }
}

/// Owns the per-name history and the previous tick's raw samples.
#[derive(Debug)]
pub struct ProcessHistoryTracker {
    retention: Duration,
    logical_cores: usize,
    entries: HashMap<String, ProcessHistoryEntry>,
    previous: HashMap<u32, ProcessSample>,
    current: HashMap<String, CurrentReading>,
}

impl ProcessHistoryTracker {
    pub fn new(retention: Duration, logical_cores: usize) -> Self {
        Self {
            retention,
            logical_cores: logical_cores.max(1),
            entries: HashMap::new(),
            previous: HashMap::new(),
            current: HashMap::new(),
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn set_retention(&mut self, retention: Duration) {
        self.retention = retention;
    }

    /// Folds one tick of raw samples into the history.
    ///
    /// Processes without a counterpart in the previous tick (same PID and
    /// name) only seed the baseline; they start accumulating next tick.
    pub fn update(&mut self, samples: Vec<ProcessSample>, now: Instant) {
        let mut next_previous = HashMap::with_capacity(samples.len());
        self.current.clear();

        for sample in samples {
            let prior = self
                .previous
                .get(&sample.pid)
                .filter(|p| p.name == sample.name);

            let cpu_percent = prior.map(|p| {
                cpu_percent_between(
                    p.cumulative_cpu_time,
                    p.timestamp,
                    sample.cumulative_cpu_time,
                    sample.timestamp,
                    self.logical_cores,
                )
            });
            let memory_mb = sample.memory_mb();

            // First instance of a name wins the current-tick reading.
            self.current
                .entry(sample.name.clone())
                .or_insert(CurrentReading {
                    cpu_percent: cpu_percent.unwrap_or(0.0),
                    memory_mb,
                });

            if let Some(cpu_percent) = cpu_percent {
                self.entries
                    .entry(sample.name.clone())
                    .or_default()
                    .samples
                    .push_back(HistoryPoint {
                        cpu_percent,
                        memory_mb,
                        timestamp: now,
                    });
            }

            next_previous.insert(sample.pid, sample);
        }

        self.previous = next_previous;
        self.prune(now);

        trace!(
            "History updated: {} names tracked, {} raw samples retained",
            self.entries.len(),
            self.previous.len()
        );
    }

    /// Evicts points older than the retention window and removes empty entries.
    pub fn prune(&mut self, now: Instant) {
        let Some(cutoff) = now.checked_sub(self.retention) else {
            return;
        };
        self.entries.retain(|_, entry| {
            entry.prune(cutoff);
            !entry.is_empty()
        });
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &ProcessHistoryEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn entry(&self, name: &str) -> Option<&ProcessHistoryEntry> {
        self.entries.get(name)
    }

    /// Reading of `name` from the most recent `update`, if it was running.
    pub fn current_reading(&self, name: &str) -> Option<CurrentReading> {
        self.current.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
