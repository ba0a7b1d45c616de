//! Prometheus gauges for herakles-host-telemetry.
//!
//! All gauges are refreshed from the latest published snapshot on each
//! scrape; nothing here is updated from the sampling path directly.

use herakles_host_telemetry::health_stats::HealthStats;
use herakles_host_telemetry::snapshot::{clamp_percent, MetricSnapshot, ProfilerStatus};
use prometheus::{Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Buffer capacity for metrics encoding.
const BUFFER_CAP: usize = 64 * 1024;

/// Collection of Prometheus metrics for host telemetry.
#[derive(Clone)]
pub struct TelemetryMetrics {
    pub cpu_usage: Gauge,
    pub cpu_core_usage: GaugeVec,
    pub memory_total: Gauge,
    pub memory_used: Gauge,
    pub disk_total: GaugeVec,
    pub disk_used: GaugeVec,

    // Top consumers over the retention window
    pub top_cpu_percent: GaugeVec,
    pub top_memory_mb: GaugeVec,
    pub tracked_processes: Gauge,

    // Hardware profiler
    pub cache_l1i_miss_percent: Gauge,
    pub cache_l1d_miss_pti: Gauge,
    pub cache_l2_miss_pti: Gauge,
    pub cache_l2_hit_pti: Gauge,
    pub cache_age_seconds: Gauge,
    pub processor_info: GaugeVec,
    pub profiler_up: Gauge,

    // Collector self-telemetry
    pub snapshot_sequence: Gauge,
    pub tick_duration: Gauge,
    pub scrape_duration: Gauge,

    /// Held from reset to encode so concurrent scrapes never see a half-filled vector.
    render_lock: Arc<Mutex<()>>,
}

fn gauge(registry: &Registry, name: &str, help: &str) -> anyhow::Result<Gauge> {
    let g = Gauge::new(name, help)?;
    registry.register(Box::new(g.clone()))?;
    Ok(g)
}

fn gauge_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> anyhow::Result<GaugeVec> {
    let g = GaugeVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(g.clone()))?;
    Ok(g)
}

impl TelemetryMetrics {
    /// Creates and registers all Prometheus metrics with the registry.
    pub fn new(registry: &Registry) -> anyhow::Result<Self> {
        let top_labels = &["name", "window"];

        Ok(Self {
            cpu_usage: gauge(
                registry,
                "herakles_host_cpu_usage_percent",
                "Total CPU usage in percent since the previous tick",
            )?,
            cpu_core_usage: gauge_vec(
                registry,
                "herakles_host_cpu_core_usage_percent",
                "Per logical core CPU usage in percent",
                &["core"],
            )?,
            memory_total: gauge(
                registry,
                "herakles_host_memory_total_bytes",
                "Total physical memory in bytes",
            )?,
            memory_used: gauge(
                registry,
                "herakles_host_memory_used_bytes",
                "Used physical memory (total minus available) in bytes",
            )?,
            disk_total: gauge_vec(
                registry,
                "herakles_host_disk_total_bytes",
                "Filesystem size in bytes",
                &["device", "mount_point", "fs_type"],
            )?,
            disk_used: gauge_vec(
                registry,
                "herakles_host_disk_used_bytes",
                "Filesystem space used in bytes",
                &["device", "mount_point", "fs_type"],
            )?,
            top_cpu_percent: gauge_vec(
                registry,
                "herakles_host_top_cpu_process_percent",
                "CPU percent of the top CPU consumer (window=average|current)",
                top_labels,
            )?,
            top_memory_mb: gauge_vec(
                registry,
                "herakles_host_top_memory_process_megabytes",
                "Resident memory of the top memory consumer (window=average|current)",
                top_labels,
            )?,
            tracked_processes: gauge(
                registry,
                "herakles_host_tracked_process_names",
                "Process names with samples in the retention window",
            )?,
            cache_l1i_miss_percent: gauge(
                registry,
                "herakles_host_cache_l1i_miss_percent",
                "L1 instruction cache miss ratio in percent",
            )?,
            cache_l1d_miss_pti: gauge(
                registry,
                "herakles_host_cache_l1d_miss_per_thousand_instructions",
                "L1 data cache misses per thousand instructions",
            )?,
            cache_l2_miss_pti: gauge(
                registry,
                "herakles_host_cache_l2_miss_per_thousand_instructions",
                "L2 cache misses per thousand instructions",
            )?,
            cache_l2_hit_pti: gauge(
                registry,
                "herakles_host_cache_l2_hit_per_thousand_instructions",
                "L2 cache hits per thousand instructions",
            )?,
            cache_age_seconds: gauge(
                registry,
                "herakles_host_cache_metrics_age_seconds",
                "Seconds since the cache metrics were last refreshed",
            )?,
            processor_info: gauge_vec(
                registry,
                "herakles_host_processor_info",
                "Static processor topology (value is always 1)",
                &["name", "cores", "threads", "ccds", "ccxs", "smt"],
            )?,
            profiler_up: gauge(
                registry,
                "herakles_host_profiler_up",
                "Whether profiler metrics are fresh (1) or degraded/disabled (0)",
            )?,
            snapshot_sequence: gauge(
                registry,
                "herakles_host_snapshot_sequence",
                "Sequence number of the latest published snapshot",
            )?,
            tick_duration: gauge(
                registry,
                "herakles_host_tick_duration_seconds",
                "Duration of the most recent sampling tick",
            )?,
            scrape_duration: gauge(
                registry,
                "herakles_host_scrape_duration_seconds",
                "Time spent serving the /metrics request",
            )?,
            render_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Resets label sets so vanished disks, cores or processes disappear.
    fn reset(&self) {
        self.cpu_core_usage.reset();
        self.disk_total.reset();
        self.disk_used.reset();
        self.top_cpu_percent.reset();
        self.top_memory_mb.reset();
        self.processor_info.reset();
    }

    /// Refreshes the gauges from `snapshot` and encodes `registry` in text format.
    ///
    /// Update, gather and encode run under one lock, so every scrape sees
    /// exactly one snapshot's label sets.
    pub fn render(
        &self,
        registry: &Registry,
        snapshot: Option<&MetricSnapshot>,
        health: &HealthStats,
        started: Instant,
    ) -> anyhow::Result<String> {
        let _guard = self.render_lock.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(snapshot) = snapshot {
            self.update_from_snapshot(snapshot, health);
        }
        self.scrape_duration.set(started.elapsed().as_secs_f64());

        let mut buffer = Vec::with_capacity(BUFFER_CAP);
        TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Populates every gauge from `snapshot`. Metrics never sampled stay unset.
    pub fn update_from_snapshot(&self, snapshot: &MetricSnapshot, health: &HealthStats) {
        self.reset();

        self.snapshot_sequence.set(snapshot.sequence as f64);
        self.tick_duration
            .set(health.tick_duration_seconds.snapshot().current);

        if let Some(total) = snapshot.total_cpu_percent {
            self.cpu_usage.set(clamp_percent(total));
        }
        for (core, pct) in snapshot.per_core_cpu_percent.iter().enumerate() {
            let core = core.to_string();
            self.cpu_core_usage
                .with_label_values(&[core.as_str()])
                .set(clamp_percent(*pct));
        }

        if let Some(mem) = snapshot.memory {
            self.memory_total.set(mem.total_bytes as f64);
            self.memory_used.set(mem.used_bytes as f64);
        }

        for disk in &snapshot.disk_usages {
            let labels = [
                disk.device.as_str(),
                disk.mount_point.as_str(),
                disk.fs_type.as_str(),
            ];
            self.disk_total
                .with_label_values(&labels)
                .set(disk.total_bytes as f64);
            self.disk_used
                .with_label_values(&labels)
                .set(disk.used_bytes as f64);
        }

        self.tracked_processes
            .set(snapshot.tracked_processes as f64);
        if let Some(top) = &snapshot.top_consumers {
            if let Some(p) = &top.top_cpu {
                self.top_cpu_percent
                    .with_label_values(&[p.name.as_str(), "average"])
                    .set(p.averaged);
                self.top_cpu_percent
                    .with_label_values(&[p.name.as_str(), "current"])
                    .set(p.instantaneous);
            }
            if let Some(p) = &top.top_memory {
                self.top_memory_mb
                    .with_label_values(&[p.name.as_str(), "average"])
                    .set(p.averaged);
                self.top_memory_mb
                    .with_label_values(&[p.name.as_str(), "current"])
                    .set(p.instantaneous);
            }
        }

        if let Some(reading) = &snapshot.cache_metrics {
            let m = &reading.metrics;
            self.cache_l1i_miss_percent
                .set(m.l1_instruction_miss_percent);
            self.cache_l1d_miss_pti
                .set(m.l1_data_miss_per_thousand_instructions);
            self.cache_l2_miss_pti
                .set(m.l2_miss_per_thousand_instructions);
            self.cache_l2_hit_pti
                .set(m.l2_hit_per_thousand_instructions);
            let age = (snapshot.timestamp - reading.updated_at)
                .num_milliseconds()
                .max(0) as f64
                / 1000.0;
            self.cache_age_seconds.set(age);
        }

        if let Some(topo) = &snapshot.processor_topology {
            let cores = topo.core_count.to_string();
            let threads = topo.thread_count.to_string();
            let ccds = topo.ccd_count.to_string();
            let ccxs = topo.ccx_count.to_string();
            self.processor_info
                .with_label_values(&[
                    topo.name.as_str(),
                    cores.as_str(),
                    threads.as_str(),
                    ccds.as_str(),
                    ccxs.as_str(),
                    if topo.smt_enabled { "true" } else { "false" },
                ])
                .set(1.0);
        }

        self.profiler_up
            .set(if snapshot.profiler_status == ProfilerStatus::Monitoring {
                1.0
            } else {
                0.0
            });
    }
}
