//! Top CPU and memory consumers over the retained history window.

use serde::Serialize;

use crate::history::ProcessHistoryTracker;

/// Minimum average CPU percent for a process to be reported.
pub const DEFAULT_MIN_CPU_PERCENT: f64 = 1.0;
/// Minimum average resident memory in MB for a process to be reported.
pub const DEFAULT_MIN_MEMORY_MB: f64 = 1.0;

/// A ranked process: its window average and its current-tick value.
///
/// Units follow the ranking dimension: percent for CPU, MB for memory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopProcess {
    pub name: String,
    pub averaged: f64,
    pub instantaneous: f64,
}

/// Result of one ranking pass. `None` means no process crossed the threshold.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TopConsumers {
    pub top_cpu: Option<TopProcess>,
    pub top_memory: Option<TopProcess>,
}

#[derive(Debug, Clone, Copy)]
pub struct TopConsumerRanker {
    min_cpu_percent: f64,
    min_memory_mb: f64,
}

impl Default for TopConsumerRanker {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_CPU_PERCENT, DEFAULT_MIN_MEMORY_MB)
    }
}

impl TopConsumerRanker {
    pub fn new(min_cpu_percent: f64, min_memory_mb: f64) -> Self {
        Self {
            min_cpu_percent,
            min_memory_mb,
        }
    }

    /// Picks the argmax by average CPU and by average memory.
    ///
    /// Ties keep the first process in history iteration order, which is
    /// arbitrary and may differ between runs.
    pub fn rank(&self, history: &ProcessHistoryTracker) -> TopConsumers {
        let mut best_cpu: Option<(&str, f64)> = None;
        let mut best_mem: Option<(&str, f64)> = None;

        for (name, entry) in history.entries() {
            let avg_cpu = entry.average_cpu();
            let avg_mem = entry.average_memory_mb();
            if best_cpu.map_or(true, |(_, best)| avg_cpu > best) {
                best_cpu = Some((name, avg_cpu));
            }
            if best_mem.map_or(true, |(_, best)| avg_mem > best) {
                best_mem = Some((name, avg_mem));
            }
        }

        let top_cpu = best_cpu
            .filter(|(_, avg)| *avg >= self.min_cpu_percent)
            .map(|(name, averaged)| TopProcess {
                name: name.to_string(),
                averaged,
                instantaneous: history
                    .current_reading(name)
                    .map_or(0.0, |r| r.cpu_percent),
            });

        let top_memory = best_mem
            .filter(|(_, avg)| *avg >= self.min_memory_mb)
            .map(|(name, averaged)| TopProcess {
                name: name.to_string(),
                averaged,
                instantaneous: history.current_reading(name).map_or(0.0, |r| r.memory_mb),
            });

        TopConsumers {
            top_cpu,
            top_memory,
        }
    }
}
