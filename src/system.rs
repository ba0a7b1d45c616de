//! System-wide counters read from the /proc filesystem.
//!
//! This module provides readers for CPU time (`/proc/stat`), memory
//! (`/proc/meminfo`) and mounted volumes (`/proc/mounts` + `statvfs`).
//! Each reader has a pure `parse_*` counterpart that works on file content
//! so it can be tested without a live procfs.

use std::collections::HashMap;
use std::ffi::CString;
use std::fs;
use std::path::Path;
use std::sync::RwLock;

use serde::Serialize;

use crate::error::{Result, TelemetryError};

/// Memory information in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySample {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl MemorySample {
    pub fn used_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.available_bytes)
    }
}

/// Capacity and usage of one mounted volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiskUsage {
    pub device: String,
    pub mount_point: String,
    pub fs_type: String,
    pub total_bytes: u64,
    pub used_bytes: u64,
}

impl DiskUsage {
    pub fn usage_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            self.used_bytes as f64 / self.total_bytes as f64 * 100.0
        }
    }
}

/// CPU statistics for calculating usage ratios.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuStat {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuStat {
    /// Calculate total CPU time (all fields).
    pub fn total(&self) -> u64 {
        self.user
            + self.nice
            + self.system
            + self.idle
            + self.iowait
            + self.irq
            + self.softirq
            + self.steal
    }

    /// Non-active time (idle + iowait).
    pub fn idle_total(&self) -> u64 {
        self.idle + self.iowait
    }
}

/// Instantaneous CPU usage in percent, total and per logical core.
///
/// Values are raw: counter jitter can push them slightly past 100.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CpuSample {
    pub total_percent: f64,
    pub per_core_percent: Vec<f64>,
}

impl CpuSample {
    pub fn total(&self) -> f64 {
        self.total_percent
    }

    pub fn core(&self, index: usize) -> Option<f64> {
        self.per_core_percent.get(index).copied()
    }
}

/// Parses `/proc/stat` content into a map of "cpu", "cpu0", "cpu1", ... to stats.
pub fn parse_cpu_stats(content: &str) -> Result<HashMap<String, CpuStat>> {
    let mut stats = HashMap::new();

    for line in content.lines() {
        if !line.starts_with("cpu") {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 8 {
            continue;
        }

        let field = |i: usize| -> u64 { parts.get(i).and_then(|v| v.parse().ok()).unwrap_or(0) };

        stats.insert(
            parts[0].to_string(),
            CpuStat {
                user: field(1),
                nice: field(2),
                system: field(3),
                idle: field(4),
                iowait: field(5),
                irq: field(6),
                softirq: field(7),
                steal: field(8),
            },
        );
    }

    if stats.is_empty() {
        return Err(TelemetryError::sample("cpu", "no CPU statistics found in /proc/stat"));
    }

    Ok(stats)
}

/// Reads CPU statistics from `<proc_root>/stat`.
pub fn read_cpu_stats(proc_root: &Path) -> Result<HashMap<String, CpuStat>> {
    let path = proc_root.join("stat");
    let content = fs::read_to_string(&path)
        .map_err(|e| TelemetryError::sample("cpu", format!("{}: {}", path.display(), e)))?;
    parse_cpu_stats(&content)
}

/// Counts the per-core "cpuN" lines of a parsed `/proc/stat`.
pub fn logical_core_count(stats: &HashMap<String, CpuStat>) -> usize {
    stats
        .keys()
        .filter(|k| k.len() > 3 && k[3..].chars().all(|c| c.is_ascii_digit()))
        .count()
}

/// Parses `MemTotal` and `MemAvailable` from `/proc/meminfo` content.
pub fn parse_memory_info(content: &str) -> Result<MemorySample> {
    let mut total_bytes: Option<u64> = None;
    let mut available_bytes: Option<u64> = None;

    for line in content.lines() {
        if let Some(v) = line.strip_prefix("MemTotal:") {
            total_bytes = parse_kb_value(v).map(|kb| kb * 1024);
        } else if let Some(v) = line.strip_prefix("MemAvailable:") {
            available_bytes = parse_kb_value(v).map(|kb| kb * 1024);
        }

        if total_bytes.is_some() && available_bytes.is_some() {
            break;
        }
    }

    match (total_bytes, available_bytes) {
        (Some(total_bytes), Some(available_bytes)) => Ok(MemorySample {
            total_bytes,
            available_bytes,
        }),
        _ => Err(TelemetryError::sample(
            "memory",
            "MemTotal or MemAvailable missing from /proc/meminfo",
        )),
    }
}

/// Reads memory information from `<proc_root>/meminfo`.
pub fn read_memory_info(proc_root: &Path) -> Result<MemorySample> {
    let path = proc_root.join("meminfo");
    let content = fs::read_to_string(&path)
        .map_err(|e| TelemetryError::sample("memory", format!("{}: {}", path.display(), e)))?;
    parse_memory_info(&content)
}

/// Parses kilobyte values like "  16384000 kB".
pub(crate) fn parse_kb_value(v: &str) -> Option<u64> {
    v.split_whitespace().next()?.parse().ok()
}

/// A mount entry from `/proc/mounts` that refers to a block device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub device: String,
    pub mount_point: String,
    pub fs_type: String,
}

/// Parses `/proc/mounts`, keeping the first mount of every `/dev/*` device.
pub fn parse_mounts(content: &str) -> Vec<MountEntry> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 3 || !parts[0].starts_with("/dev/") {
            continue;
        }
        if !seen.insert(parts[0]) {
            continue;
        }
        out.push(MountEntry {
            device: parts[0].to_string(),
            // Spaces in mount points are octal-escaped by the kernel.
            mount_point: parts[1].replace("\\040", " "),
            fs_type: parts[2].to_string(),
        });
    }
    out
}

/// Returns (total, available) bytes for the filesystem mounted at `path`.
pub fn statvfs(path: &str) -> std::io::Result<(u64, u64)> {
    let c_path = CString::new(path).map_err(std::io::Error::other)?;
    // SAFETY: c_path is a valid NUL-terminated string and stat is fully
    // initialised by a successful call.
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let ret = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    let frsize = stat.f_frsize as u64;
    Ok((
        stat.f_blocks as u64 * frsize,
        stat.f_bavail as u64 * frsize,
    ))
}

/// Reads usage of every mounted block device. Unreadable mounts are skipped.
pub fn read_disk_usages(proc_root: &Path) -> Result<Vec<DiskUsage>> {
    let path = proc_root.join("mounts");
    let content = fs::read_to_string(&path)
        .map_err(|e| TelemetryError::sample("disk", format!("{}: {}", path.display(), e)))?;

    let mut usages = Vec::new();
    for mount in parse_mounts(&content) {
        match statvfs(&mount.mount_point) {
            Ok((total_bytes, available_bytes)) if total_bytes > 0 => usages.push(DiskUsage {
                device: mount.device,
                mount_point: mount.mount_point,
                fs_type: mount.fs_type,
                total_bytes,
                used_bytes: total_bytes.saturating_sub(available_bytes),
            }),
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("Skipping mount {}: {}", mount.mount_point, e);
            }
        }
    }
    Ok(usages)
}

/// CPU statistics cache for calculating deltas between ticks.
pub struct CpuStatsCache {
    previous: RwLock<Option<HashMap<String, CpuStat>>>,
}

impl Default for CpuStatsCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuStatsCache {
    pub fn new() -> Self {
        Self {
            previous: RwLock::new(None),
        }
    }

    /// Stores `current` as the new baseline and returns usage since the previous one.
    ///
    /// Without a baseline every value is 0.
    pub fn update(&self, current: HashMap<String, CpuStat>) -> CpuSample {
        let mut guard = match self.previous.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut sample = CpuSample::default();
        let core_count = logical_core_count(&current);
        sample.per_core_percent = vec![0.0; core_count];

        if let Some(prev_stats) = guard.as_ref() {
            for (cpu_name, cur) in &current {
                let Some(prev) = prev_stats.get(cpu_name) else {
                    continue;
                };
                let percent = usage_percent(prev, cur);
                if cpu_name == "cpu" {
                    sample.total_percent = percent;
                } else if let Some(slot) = cpu_name
                    .get(3..)
                    .and_then(|idx| idx.parse::<usize>().ok())
                    .and_then(|idx| sample.per_core_percent.get_mut(idx))
                {
                    *slot = percent;
                }
            }
        }

        *guard = Some(current);
        sample
    }

    /// Reads `/proc/stat` and updates the baseline.
    pub fn sample(&self, proc_root: &Path) -> Result<CpuSample> {
        let current = read_cpu_stats(proc_root)?;
        Ok(self.update(current))
    }
}

fn usage_percent(prev: &CpuStat, cur: &CpuStat) -> f64 {
    let delta_total = cur.total().saturating_sub(prev.total());
    let delta_idle = cur.idle_total().saturating_sub(prev.idle_total());
    if delta_total == 0 {
        return 0.0;
    }
    delta_total.saturating_sub(delta_idle) as f64 / delta_total as f64 * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAT_A: &str = "cpu  100 0 100 800 0 0 0 0 0 0\n\
                          cpu0 50 0 50 400 0 0 0 0 0 0\n\
                          cpu1 50 0 50 400 0 0 0 0 0 0\n\
                          intr 12345\n";
    const STAT_B: &str = "cpu  200 0 200 1000 0 0 0 0 0 0\n\
                          cpu0 150 0 50 500 0 0 0 0 0 0\n\
                          cpu1 50 0 150 500 0 0 0 0 0 0\n";

    #[test]
    fn test_parse_cpu_stats() {
        let stats = parse_cpu_stats(STAT_A).unwrap();
        assert_eq!(stats.len(), 3);
        assert_eq!(stats["cpu"].total(), 1000);
        assert_eq!(logical_core_count(&stats), 2);
    }

    #[test]
    fn test_parse_cpu_stats_empty() {
        assert!(parse_cpu_stats("intr 1 2 3\n").is_err());
    }

    #[test]
    fn test_first_sample_is_zero() {
        let cache = CpuStatsCache::new();
        let sample = cache.update(parse_cpu_stats(STAT_A).unwrap());
        assert_eq!(sample.total(), 0.0);
        assert_eq!(sample.per_core_percent, vec![0.0, 0.0]);
    }

    #[test]
    fn test_cpu_usage_delta() {
        let cache = CpuStatsCache::new();
        cache.update(parse_cpu_stats(STAT_A).unwrap());
        let sample = cache.update(parse_cpu_stats(STAT_B).unwrap());

        // total: delta 400, idle delta 200 -> 50%
        assert!((sample.total() - 50.0).abs() < 1e-9);
        // cpu0: delta 200, idle 100 -> 50%; cpu1: delta 200, idle 100 -> 50%
        assert!((sample.core(0).unwrap() - 50.0).abs() < 1e-9);
        assert!((sample.core(1).unwrap() - 50.0).abs() < 1e-9);
        assert_eq!(sample.core(2), None);
    }

    #[test]
    fn test_parse_memory_info() {
        let meminfo = "MemTotal:       16384000 kB\nMemFree:         1000 kB\nMemAvailable:    8192000 kB\n";
        let mem = parse_memory_info(meminfo).unwrap();
        assert_eq!(mem.total_bytes, 16384000 * 1024);
        assert_eq!(mem.available_bytes, 8192000 * 1024);
        assert_eq!(mem.used_bytes(), 8192000 * 1024);
    }

    #[test]
    fn test_parse_memory_info_missing_fields() {
        let meminfo = "MemFree:        8192000 kB\nSwapFree:        2048000 kB\n";
        assert!(parse_memory_info(meminfo).is_err());
    }

    #[test]
    fn test_parse_mounts() {
        let mounts = "proc /proc proc rw 0 0\n\
                      /dev/sda1 / ext4 rw 0 0\n\
                      /dev/sda1 /var/lib/docker ext4 rw 0 0\n\
                      /dev/sdb1 /mnt/my\\040data xfs rw 0 0\n\
                      tmpfs /tmp tmpfs rw 0 0\n";
        let entries = parse_mounts(mounts);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].mount_point, "/");
        assert_eq!(entries[1].mount_point, "/mnt/my data");
        assert_eq!(entries[1].fs_type, "xfs");
    }

    #[test]
    fn test_disk_usage_percent() {
        let disk = DiskUsage {
            device: "/dev/sda1".into(),
            mount_point: "/".into(),
            fs_type: "ext4".into(),
            total_bytes: 200,
            used_bytes: 50,
        };
        assert!((disk.usage_percent() - 25.0).abs() < 1e-9);
    }
}
