use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use herakles_host_telemetry::error::{Result, TelemetryError};
use herakles_host_telemetry::process::ProcessSample;
use herakles_host_telemetry::profiler::{BridgeState, ExternalProfilerBridge};
use herakles_host_telemetry::scheduler::{SchedulerConfig, SnapshotReceiver, TelemetryScheduler};
use herakles_host_telemetry::snapshot::{MetricSnapshot, ProfilerStatus};
use herakles_host_telemetry::source::CounterSource;
use herakles_host_telemetry::system::{CpuSample, DiskUsage, MemorySample};

const MIB: u64 = 1024 * 1024;
const TOTAL_MEMORY: u64 = 8192 * MIB;

/// Counter source with two long-running processes and one that exits
/// after the first tick. Memory reads start failing after `memory_ok` calls.
struct ScriptedSource {
    process_calls: AtomicU64,
    memory_calls: AtomicU64,
    memory_ok: u64,
}

impl ScriptedSource {
    fn new(memory_ok: u64) -> Self {
        Self {
            process_calls: AtomicU64::new(0),
            memory_calls: AtomicU64::new(0),
            memory_ok,
        }
    }
}

fn process(pid: u32, name: &str, cpu_ms: u64, memory_mb: u64, at: Instant) -> ProcessSample {
    ProcessSample {
        pid,
        name: name.to_string(),
        cumulative_cpu_time: Duration::from_millis(cpu_ms),
        memory_bytes: memory_mb * MIB,
        timestamp: at,
    }
}

impl CounterSource for ScriptedSource {
    fn sample_cpu(&self) -> Result<CpuSample> {
        Ok(CpuSample {
            total_percent: 25.0,
            per_core_percent: vec![25.0],
        })
    }

    fn sample_memory(&self) -> Result<MemorySample> {
        let call = self.memory_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call > self.memory_ok {
            return Err(TelemetryError::TransientSample {
                counter: "meminfo",
                reason: "unreadable".to_string(),
            });
        }
        Ok(MemorySample {
            total_bytes: TOTAL_MEMORY,
            available_bytes: TOTAL_MEMORY - call * 100 * MIB,
        })
    }

    fn sample_disks(&self) -> Result<Vec<DiskUsage>> {
        Ok(vec![DiskUsage {
            device: "/dev/sda1".to_string(),
            mount_point: "/".to_string(),
            fs_type: "ext4".to_string(),
            total_bytes: 100 * 1024 * MIB,
            used_bytes: 40 * 1024 * MIB,
        }])
    }

    fn sample_all_processes(&self) -> Result<Vec<ProcessSample>> {
        let call = self.process_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Instant::now();
        let mut samples = vec![
            process(10, "busy-worker", call * 40, 16, now),
            process(20, "cache-daemon", 10, 512, now),
        ];
        if call == 1 {
            samples.push(process(30, "short-lived", 5, 2048, now));
        }
        Ok(samples)
    }

    fn logical_core_count(&self) -> usize {
        1
    }
}

fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        tick_interval: Duration::from_millis(30),
        profiler_interval: Duration::from_millis(30),
        profiler_timeout: Duration::from_secs(5),
        ..SchedulerConfig::default()
    }
}

async fn wait_for_snapshot(
    rx: &mut SnapshotReceiver,
    mut pred: impl FnMut(&MetricSnapshot) -> bool,
) -> Arc<MetricSnapshot> {
    let guard = tokio::time::timeout(
        Duration::from_secs(10),
        rx.wait_for(|s| s.as_ref().is_some_and(|s| pred(s))),
    )
    .await
    .expect("timed out waiting for snapshot")
    .expect("scheduler stopped publishing");
    let snapshot = guard.as_ref().cloned();
    drop(guard);
    snapshot.unwrap()
}

#[tokio::test]
async fn test_ticks_publish_ranked_consumers() {
    let source = Arc::new(ScriptedSource::new(u64::MAX));
    let handle = TelemetryScheduler::new(source, None, fast_config()).start();
    let mut rx = handle.subscribe();

    let snapshot = wait_for_snapshot(&mut rx, |s| s.sequence >= 4).await;

    assert_eq!(snapshot.total_cpu_percent, Some(25.0));
    assert_eq!(snapshot.disk_usages.len(), 1);
    assert_eq!(snapshot.disk_usages[0].mount_point, "/");

    let top = snapshot.top_consumers.as_ref().unwrap();
    let top_cpu = top.top_cpu.as_ref().unwrap();
    assert_eq!(top_cpu.name, "busy-worker");
    assert!(top_cpu.averaged > 0.0);

    let top_memory = top.top_memory.as_ref().unwrap();
    assert_eq!(top_memory.name, "cache-daemon");
    assert!((top_memory.averaged - 512.0).abs() < 1e-9);
    assert!((top_memory.instantaneous - 512.0).abs() < 1e-9);

    // Exited after its baseline tick, so it never entered the history.
    assert_eq!(snapshot.tracked_processes, 2);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_failed_counter_keeps_previous_value() {
    let source = Arc::new(ScriptedSource::new(1));
    let handle = TelemetryScheduler::new(source, None, fast_config()).start();
    let mut rx = handle.subscribe();

    let first = wait_for_snapshot(&mut rx, |s| s.sequence >= 1).await;
    let memory = first.memory.expect("first memory read succeeds");
    assert_eq!(memory.used_bytes, 100 * MIB);

    let later = wait_for_snapshot(&mut rx, |s| s.sequence >= 3).await;
    assert_eq!(later.memory, Some(memory));
    assert!(later.top_consumers.is_some());

    handle.shutdown().await;
}

#[tokio::test]
async fn test_sequence_is_monotonic() {
    let source = Arc::new(ScriptedSource::new(u64::MAX));
    let handle = TelemetryScheduler::new(source, None, fast_config()).start();
    let mut rx = handle.subscribe();

    let mut last = 0;
    for _ in 0..4 {
        let snapshot = wait_for_snapshot(&mut rx, |s| s.sequence > last).await;
        assert!(snapshot.sequence > last);
        last = snapshot.sequence;
    }

    handle.shutdown().await;
}

#[tokio::test]
async fn test_interval_change_applies_from_next_fire() {
    let source = Arc::new(ScriptedSource::new(u64::MAX));
    let handle = TelemetryScheduler::new(source, None, fast_config()).start();
    let mut rx = handle.subscribe();

    wait_for_snapshot(&mut rx, |s| s.sequence >= 2).await;
    handle.set_tick_interval(Duration::from_secs(60));
    assert_eq!(handle.tick_interval(), Duration::from_secs(60));

    tokio::time::sleep(Duration::from_millis(100)).await;
    let settled = handle.latest().unwrap().sequence;
    tokio::time::sleep(Duration::from_millis(300)).await;
    let after = handle.latest().unwrap();
    assert_eq!(after.sequence, settled, "no ticks inside the new interval");
    assert_eq!(after.tracked_processes, 2, "history survives the change");

    handle.shutdown().await;
}

#[tokio::test]
async fn test_missing_profiler_disables_cache_metrics() {
    let tmp = tempfile::TempDir::new().unwrap();
    let bridge = ExternalProfilerBridge::new(tmp.path().join("no-such-profiler"))
        .with_output_dir(tmp.path())
        .with_privilege_check(|| true);

    let source = Arc::new(ScriptedSource::new(u64::MAX));
    let handle =
        TelemetryScheduler::new(source, Some(Arc::new(bridge)), fast_config()).start();
    let mut rx = handle.subscribe();

    let snapshot = wait_for_snapshot(&mut rx, |s| s.profiler_status.is_disabled()).await;
    assert!(snapshot.cache_metrics.is_none());
    assert!(snapshot.processor_topology.is_none());
    match handle.profiler_status() {
        ProfilerStatus::Disabled(reason) => assert!(reason.contains("not found")),
        other => panic!("unexpected status {:?}", other),
    }

    // Sampling continues without the profiler.
    let seq = snapshot.sequence;
    let later = wait_for_snapshot(&mut rx, |s| s.sequence > seq + 1).await;
    assert!(later.profiler_status.is_disabled());
    assert!(later.total_cpu_percent.is_some());

    handle.shutdown().await;
}

#[tokio::test]
async fn test_unprivileged_profiler_is_disabled() {
    let tmp = tempfile::TempDir::new().unwrap();
    let tool = tmp.path().join("profiler");
    std::fs::write(&tool, "").unwrap();
    let bridge = ExternalProfilerBridge::new(&tool).with_privilege_check(|| false);

    let source = Arc::new(ScriptedSource::new(u64::MAX));
    let handle =
        TelemetryScheduler::new(source, Some(Arc::new(bridge)), fast_config()).start();
    let mut rx = handle.subscribe();

    let snapshot = wait_for_snapshot(&mut rx, |s| s.profiler_status.is_disabled()).await;
    assert_eq!(
        snapshot.profiler_status,
        ProfilerStatus::Disabled("Run as Admin".to_string())
    );

    handle.shutdown().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_profiler_results_merge_into_snapshots() {
    use std::os::unix::fs::PermissionsExt;

    let tmp = tempfile::TempDir::new().unwrap();
    let topology = tmp.path().join("topology.csv");
    let cache = tmp.path().join("cache.csv");
    std::fs::write(
        &topology,
        "Processor Name:,AMD EPYC 9654 96-Core Processor\n\
         Number of Sockets :,1\n\
         Number of CCDs :,12\n\
         Number of Core Complexes(CCX) :,12\n\
         Number of Cores :,96\n\
         Number of Threads :,192\n\
         SMT Enabled in HW:,True\n\
         Core P0 state frequency (MHz):,2400.00\n\
         Profile Time:,2024/01/01 10:00:00\n",
    )
    .unwrap();
    let mut row = vec!["0.00"; 25];
    row[0] = "2.50";
    row[16] = "5.00";
    row[20] = "80.00";
    row[24] = "1.10";
    std::fs::write(
        &cache,
        format!(
            "System (Aggregated)\nIC Fetch Miss Ratio,IC Access (pti)\n{}\n",
            row.join(",")
        ),
    )
    .unwrap();

    let tool = tmp.path().join("fake-profiler.sh");
    std::fs::write(
        &tool,
        format!(
            "#!/bin/sh\n\
             out=\"\"\n\
             groups=\"\"\n\
             while [ $# -gt 0 ]; do\n\
             \x20 case \"$1\" in\n\
             \x20   -o) out=\"$2\"; shift ;;\n\
             \x20   -m) groups=\"$2\"; shift ;;\n\
             \x20 esac\n\
             \x20 shift\n\
             done\n\
             if [ \"$groups\" = \"dc\" ]; then cp \"{}\" \"$out\"; else cp \"{}\" \"$out\"; fi\n",
            topology.display(),
            cache.display()
        ),
    )
    .unwrap();
    std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

    let reports = tmp.path().join("reports");
    std::fs::create_dir(&reports).unwrap();
    let bridge = Arc::new(
        ExternalProfilerBridge::new(&tool)
            .with_output_dir(&reports)
            .with_settle_delay(Duration::ZERO)
            .with_privilege_check(|| true),
    );

    let source = Arc::new(ScriptedSource::new(u64::MAX));
    let handle = TelemetryScheduler::new(source, Some(bridge.clone()), fast_config()).start();
    let mut rx = handle.subscribe();

    let snapshot = wait_for_snapshot(&mut rx, |s| {
        s.cache_metrics.is_some() && s.processor_topology.is_some()
    })
    .await;

    let topo = snapshot.processor_topology.as_ref().unwrap();
    assert_eq!(topo.name, "AMD EPYC 9654 96-Core Processor");
    assert_eq!(topo.core_count, 96);
    assert_eq!(topo.thread_count, 192);
    assert_eq!(topo.ccd_count, 12);
    assert!(topo.smt_enabled);

    let cache = snapshot.cache_metrics.unwrap().metrics;
    assert_eq!(cache.l1_instruction_miss_percent, 2.5);
    assert_eq!(cache.l1_data_miss_per_thousand_instructions, 1.1);
    assert_eq!(cache.l2_miss_per_thousand_instructions, 5.0);
    assert_eq!(cache.l2_hit_per_thousand_instructions, 80.0);
    assert_eq!(snapshot.profiler_status, ProfilerStatus::Monitoring);

    // Let any in-flight run finish before looking for report files.
    handle.set_profiler_interval(Duration::from_secs(60));
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(bridge.state(), BridgeState::Succeeded);
    assert!(handle.health_stats().profiler_successes() >= 2);
    handle.shutdown().await;

    let leftover = std::fs::read_dir(&reports).unwrap().count();
    assert_eq!(leftover, 0, "report files are removed after parsing");
}

#[cfg(unix)]
#[tokio::test]
async fn test_cache_metrics_without_topology_section() {
    use std::os::unix::fs::PermissionsExt;

    let tmp = tempfile::TempDir::new().unwrap();
    let cache = tmp.path().join("cache.csv");
    let calls = tmp.path().join("calls.log");
    let mut row = vec!["0.00"; 25];
    row[0] = "2.50";
    row[16] = "5.00";
    row[20] = "80.00";
    row[24] = "1.10";
    std::fs::write(&cache, format!("System (Aggregated)\n{}\n", row.join(","))).unwrap();

    // Every run writes the same report, which has no processor header.
    let tool = tmp.path().join("fake-profiler.sh");
    std::fs::write(
        &tool,
        format!(
            "#!/bin/sh\n\
             out=\"\"\n\
             groups=\"\"\n\
             while [ $# -gt 0 ]; do\n\
             \x20 case \"$1\" in\n\
             \x20   -o) out=\"$2\"; shift ;;\n\
             \x20   -m) groups=\"$2\"; shift ;;\n\
             \x20 esac\n\
             \x20 shift\n\
             done\n\
             echo \"$groups\" >> \"{}\"\n\
             cp \"{}\" \"$out\"\n",
            calls.display(),
            cache.display()
        ),
    )
    .unwrap();
    std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

    let reports = tmp.path().join("reports");
    std::fs::create_dir(&reports).unwrap();
    let bridge = Arc::new(
        ExternalProfilerBridge::new(&tool)
            .with_output_dir(&reports)
            .with_settle_delay(Duration::ZERO)
            .with_privilege_check(|| true),
    );

    let source = Arc::new(ScriptedSource::new(u64::MAX));
    let handle = TelemetryScheduler::new(source, Some(bridge), fast_config()).start();
    let mut rx = handle.subscribe();

    let snapshot = wait_for_snapshot(&mut rx, |s| {
        s.cache_metrics.is_some() && s.profiler_status == ProfilerStatus::Monitoring
    })
    .await;
    assert!(snapshot.processor_topology.is_none());
    let metrics = snapshot.cache_metrics.unwrap().metrics;
    assert_eq!(metrics.l1_instruction_miss_percent, 2.5);
    assert_eq!(metrics.l2_miss_per_thousand_instructions, 5.0);
    assert_eq!(metrics.l2_hit_per_thousand_instructions, 80.0);
    assert_eq!(metrics.l1_data_miss_per_thousand_instructions, 1.1);

    // Wait for at least one more cache run, then stop the profiler timer.
    wait_for_snapshot(&mut rx, |_| {
        std::fs::read_to_string(&calls)
            .map(|log| log.lines().count() >= 3)
            .unwrap_or(false)
    })
    .await;
    handle.set_profiler_interval(Duration::from_secs(60));
    tokio::time::sleep(Duration::from_millis(500)).await;
    handle.shutdown().await;

    let log = std::fs::read_to_string(&calls).unwrap();
    let topology_runs = log.lines().filter(|groups| *groups == "dc").count();
    assert_eq!(topology_runs, 1, "topology is fetched once: {}", log);
    assert!(log.lines().count() >= 3);
}
