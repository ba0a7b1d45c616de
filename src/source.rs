//! The `CounterSource` seam between the scheduler and the operating system.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::process::{self, ProcUnits, ProcessSample};
use crate::system::{self, CpuSample, CpuStatsCache, DiskUsage, MemorySample};

/// Pure sampling of OS counters. Implementations hold no derived state
/// beyond the baseline needed for CPU busy-time deltas.
pub trait CounterSource: Send + Sync {
    /// Total and per-core CPU usage since the previous call.
    fn sample_cpu(&self) -> Result<CpuSample>;

    fn sample_memory(&self) -> Result<MemorySample>;

    fn sample_disks(&self) -> Result<Vec<DiskUsage>>;

    /// All live processes; processes that vanish mid-enumeration are skipped.
    fn sample_all_processes(&self) -> Result<Vec<ProcessSample>>;

    fn logical_core_count(&self) -> usize;
}

/// `CounterSource` backed by a procfs mount.
pub struct ProcCounterSource {
    root: PathBuf,
    units: ProcUnits,
    cpu_cache: CpuStatsCache,
    core_count: usize,
}

impl ProcCounterSource {
    /// Opens the procfs at `root` and takes the initial CPU baseline.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        Self::with_units(root, ProcUnits::default())
    }

    pub fn with_units(root: impl Into<PathBuf>, units: ProcUnits) -> Result<Self> {
        let root = root.into();
        let stats = system::read_cpu_stats(&root)?;
        let core_count = match system::logical_core_count(&stats) {
            0 => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            n => n,
        };
        let cpu_cache = CpuStatsCache::new();
        cpu_cache.update(stats);

        Ok(Self {
            root,
            units,
            cpu_cache,
            core_count,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl CounterSource for ProcCounterSource {
    fn sample_cpu(&self) -> Result<CpuSample> {
        self.cpu_cache.sample(&self.root)
    }

    fn sample_memory(&self) -> Result<MemorySample> {
        system::read_memory_info(&self.root)
    }

    fn sample_disks(&self) -> Result<Vec<DiskUsage>> {
        system::read_disk_usages(&self.root)
    }

    fn sample_all_processes(&self) -> Result<Vec<ProcessSample>> {
        process::sample_all_processes(&self.root, self.units)
    }

    fn logical_core_count(&self) -> usize {
        self.core_count
    }
}
