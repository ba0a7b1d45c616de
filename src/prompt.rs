//! Text rendering of snapshots for the assistant and status displays.
//!
//! Everything here is a pure function of a [`MetricSnapshot`]. The prompt is
//! line oriented with literal `## ` section headers and is consumed verbatim.

use std::fmt::Write;

use crate::ranking::TopProcess;
use crate::snapshot::{clamp_percent, MetricSnapshot, ProcessorTopology};
use crate::system::DiskUsage;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;
const NOT_SAMPLED: &str = "not yet sampled";

/// Human readable size with up to two decimals: `512 B`, `1.5 KB`, `2 GB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let mut text = format!("{:.2}", value);
    while text.ends_with('0') {
        text.pop();
    }
    if text.ends_with('.') {
        text.pop();
    }
    format!("{} {}", text, UNITS[unit])
}

/// Multi-line processor description.
pub fn processor_info_text(topology: &ProcessorTopology) -> String {
    format!(
        "{}\nCores: {} | Threads: {}\nBase Frequency: {:.1} GHz\nSMT: {}\nCCDs: {} | CCXs: {}",
        topology.name,
        topology.core_count,
        topology.thread_count,
        topology.base_frequency_mhz / 1000.0,
        if topology.smt_enabled {
            "Enabled"
        } else {
            "Disabled"
        },
        topology.ccd_count,
        topology.ccx_count
    )
}

pub fn cpu_usage_text(snapshot: &MetricSnapshot) -> String {
    match snapshot.total_cpu_percent {
        Some(pct) => format!("CPU Usage: {:.1}%", clamp_percent(pct)),
        None => format!("CPU Usage: {}", NOT_SAMPLED),
    }
}

pub fn memory_usage_text(snapshot: &MetricSnapshot) -> String {
    match snapshot.memory {
        Some(mem) => format!(
            "{:.2} GB of {:.2} GB used",
            mem.used_bytes as f64 / BYTES_PER_GB,
            mem.total_bytes as f64 / BYTES_PER_GB
        ),
        None => NOT_SAMPLED.to_string(),
    }
}

pub fn disk_usage_text(disk: &DiskUsage) -> String {
    format!(
        "{} of {} used",
        format_bytes(disk.used_bytes),
        format_bytes(disk.total_bytes)
    )
}

pub fn top_cpu_text(top: Option<&TopProcess>) -> String {
    match top {
        Some(p) => format!("CPU Eater: {} ({:.1}%)", p.name, clamp_percent(p.instantaneous)),
        None => "CPU Eater: None!".to_string(),
    }
}

pub fn top_memory_text(top: Option<&TopProcess>) -> String {
    match top {
        Some(p) => format!("Memory Eater: {} ({:.0} MB)", p.name, p.instantaneous),
        None => "Memory Eater: None!".to_string(),
    }
}

/// Formats the assistant context block for `snapshot`.
pub fn format_prompt(snapshot: &MetricSnapshot) -> String {
    let mut out = String::with_capacity(1024);
    let top = snapshot.top_consumers.as_ref();

    let system = snapshot
        .processor_topology
        .as_ref()
        .map(processor_info_text)
        .unwrap_or_else(|| snapshot.profiler_status.to_string());

    // Writing to a String cannot fail.
    let _ = writeln!(out, "Real-time system metrics from herakles-host-telemetry:");
    let _ = writeln!(out, "System: {}", system);

    let _ = writeln!(out, "## Current Usage");
    let _ = writeln!(out, "Total CPU Usage: {}", cpu_usage_text(snapshot));
    let _ = writeln!(out, "Memory Usage: {}", memory_usage_text(snapshot));
    let _ = writeln!(
        out,
        "Most CPU-Intensive Process: {}",
        top_cpu_text(top.and_then(|t| t.top_cpu.as_ref()))
    );
    let _ = writeln!(
        out,
        "Most Memory-Intensive Process: {}",
        top_memory_text(top.and_then(|t| t.top_memory.as_ref()))
    );
    for disk in &snapshot.disk_usages {
        let _ = writeln!(
            out,
            "Disk {} ({}): {}",
            disk.mount_point,
            disk.device,
            disk_usage_text(disk)
        );
    }
    out.push('\n');

    let _ = writeln!(out, "## Cache Performance");
    match &snapshot.cache_metrics {
        Some(reading) => {
            let m = &reading.metrics;
            let _ = writeln!(
                out,
                "L1 Instruction Cache Miss Rate: {}%",
                m.l1_instruction_miss_percent
            );
            let _ = writeln!(
                out,
                "L1 Data Cache Miss Rate: {} per 1000 instructions",
                m.l1_data_miss_per_thousand_instructions
            );
            let _ = writeln!(
                out,
                "L2 Cache Miss Rate: {} per 1000 instructions",
                m.l2_miss_per_thousand_instructions
            );
            let _ = writeln!(out, "L2 Cache Hit Rate: {}%", m.l2_hit_per_thousand_instructions);
            if !matches!(
                snapshot.profiler_status,
                crate::snapshot::ProfilerStatus::Monitoring
            ) {
                let _ = writeln!(out, "Status: {}", snapshot.profiler_status);
            }
        }
        None => {
            let _ = writeln!(out, "Cache metrics: {}", snapshot.profiler_status);
        }
    }

    out
}

/// Appends a user question to a formatted prompt.
pub fn append_question(prompt: &str, question: &str) -> String {
    format!("{}\nUser asks: {}", prompt, question)
}
