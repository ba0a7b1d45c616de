//! Per-process counters read from `/proc/<pid>`.
//!
//! Processes are enumerated from the numeric directories of the procfs root
//! and read in parallel with rayon. A process that exits while it is being
//! read is skipped rather than failing the whole enumeration.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::error::{Result, TelemetryError};

/// Kernel clock ticks per second used by `/proc/<pid>/stat` time fields.
pub static CLOCK_TICKS: Lazy<u64> = Lazy::new(|| {
    // SAFETY: sysconf has no memory-safety preconditions.
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 {
        ticks as u64
    } else {
        100
    }
});

/// Size of a memory page in bytes, used by `/proc/<pid>/statm`.
pub static PAGE_SIZE: Lazy<u64> = Lazy::new(|| {
    // SAFETY: sysconf has no memory-safety preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as u64
    } else {
        4096
    }
});

/// Raw per-tick capture of one process.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSample {
    pub pid: u32,
    pub name: String,
    pub cumulative_cpu_time: Duration,
    pub memory_bytes: u64,
    pub timestamp: Instant,
}

impl ProcessSample {
    pub fn memory_mb(&self) -> f64 {
        self.memory_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// Process entry representing a directory in the procfs root.
#[derive(Debug, Clone)]
pub struct ProcEntry {
    pub pid: u32,
    pub proc_path: PathBuf,
}

/// Units needed to convert procfs counters.
#[derive(Debug, Clone, Copy)]
pub struct ProcUnits {
    pub clock_ticks: u64,
    pub page_size: u64,
}

impl Default for ProcUnits {
    fn default() -> Self {
        Self {
            clock_ticks: *CLOCK_TICKS,
            page_size: *PAGE_SIZE,
        }
    }
}

/// Scans the procfs root for process entries with numeric PIDs.
pub fn collect_proc_entries(root: &Path) -> Result<Vec<ProcEntry>> {
    let entries = fs::read_dir(root)
        .map_err(|e| TelemetryError::sample("processes", format!("{}: {}", root.display(), e)))?;

    let mut out = Vec::new();
    for entry in entries.flatten() {
        let p = entry.path();
        let Some(name) = p.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let Ok(pid) = name.parse::<u32>() else {
            continue;
        };
        out.push(ProcEntry { pid, proc_path: p });
    }
    Ok(out)
}

/// Reads process name from comm file or extracts it from cmdline.
pub fn read_process_name(proc_path: &Path) -> Option<String> {
    if let Ok(s) = fs::read_to_string(proc_path.join("comm")) {
        let t = s.trim();
        if !t.is_empty() {
            return Some(t.into());
        }
    }

    let content = fs::read(proc_path.join("cmdline")).ok()?;
    let first = content.split(|&b| b == 0u8).next()?;
    let first = std::str::from_utf8(first).ok()?;
    Path::new(first)
        .file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.to_string())
}

/// Parses user+system CPU time from `/proc/<pid>/stat` content.
///
/// The command field may contain spaces and parentheses, so fields are
/// counted from the last ')'.
pub fn parse_cpu_time(content: &str, clock_ticks: u64) -> Option<Duration> {
    let after_comm = &content[content.rfind(')')? + 1..];
    let parts: Vec<&str> = after_comm.split_whitespace().collect();
    // After the command: state(0) ... utime(11) stime(12)
    let utime: u64 = parts.get(11)?.parse().ok()?;
    let stime: u64 = parts.get(12)?.parse().ok()?;
    let ticks = clock_ticks.max(1);
    let total = utime + stime;
    Some(
        Duration::from_secs(total / ticks)
            + Duration::from_nanos((total % ticks) * 1_000_000_000 / ticks),
    )
}

/// Parses resident memory from `/proc/<pid>/statm` content.
pub fn parse_resident_bytes(content: &str, page_size: u64) -> Option<u64> {
    let resident: u64 = content.split_whitespace().nth(1)?.parse().ok()?;
    Some(resident * page_size)
}

fn map_read_error(pid: u32, what: &str, e: std::io::Error) -> TelemetryError {
    match e.kind() {
        ErrorKind::NotFound => TelemetryError::ProcessRace { pid },
        _ => TelemetryError::Io(std::io::Error::new(
            e.kind(),
            format!("pid {} {}: {}", pid, what, e),
        )),
    }
}

/// Reads one process. Returns `ProcessRace` when it exited mid-read.
pub fn read_process_sample(
    entry: &ProcEntry,
    units: ProcUnits,
    timestamp: Instant,
) -> Result<ProcessSample> {
    let name = read_process_name(&entry.proc_path)
        .ok_or(TelemetryError::ProcessRace { pid: entry.pid })?;

    let stat = fs::read_to_string(entry.proc_path.join("stat"))
        .map_err(|e| map_read_error(entry.pid, "stat", e))?;
    let cumulative_cpu_time = parse_cpu_time(&stat, units.clock_ticks).ok_or_else(|| {
        TelemetryError::Io(std::io::Error::other(format!(
            "pid {}: invalid stat format",
            entry.pid
        )))
    })?;

    let statm = fs::read_to_string(entry.proc_path.join("statm"))
        .map_err(|e| map_read_error(entry.pid, "statm", e))?;
    let memory_bytes = parse_resident_bytes(&statm, units.page_size).unwrap_or(0);

    Ok(ProcessSample {
        pid: entry.pid,
        name,
        cumulative_cpu_time,
        memory_bytes,
        timestamp,
    })
}

/// Samples every live process under `root`.
///
/// Vanished processes are skipped quietly; other per-process failures
/// (permissions, malformed files) are logged and excluded.
pub fn sample_all_processes(root: &Path, units: ProcUnits) -> Result<Vec<ProcessSample>> {
    let entries = collect_proc_entries(root)?;
    let timestamp = Instant::now();

    let samples: Vec<ProcessSample> = entries
        .par_iter()
        .filter_map(|entry| match read_process_sample(entry, units, timestamp) {
            Ok(sample) => Some(sample),
            Err(TelemetryError::ProcessRace { pid }) => {
                debug!("Skipping process {}: exited during read", pid);
                None
            }
            Err(TelemetryError::Io(e)) if e.kind() == ErrorKind::PermissionDenied => {
                debug!("Skipping process {}: {}", entry.pid, e);
                None
            }
            Err(e) => {
                warn!("Skipping process {}: {}", entry.pid, e);
                None
            }
        })
        .collect();

    debug!(
        "Sampled {} of {} process entries",
        samples.len(),
        entries.len()
    );
    Ok(samples)
}
