use std::path::Path;
use std::time::Duration;

use herakles_host_telemetry::error::TelemetryError;
use herakles_host_telemetry::profiler::{
    fetch_cache_metrics, fetch_topology, BridgeState, ExternalProfilerBridge, MetricClass,
};
use herakles_host_telemetry::snapshot::{CacheMetrics, ProcessorTopology};

const TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_missing_executable_is_sticky() {
    let tmp = tempfile::TempDir::new().unwrap();
    let tool = tmp.path().join("AMDuProfPcm");
    let bridge = ExternalProfilerBridge::new(&tool)
        .with_output_dir(tmp.path())
        .with_privilege_check(|| true);

    let err = bridge
        .invoke(MetricClass::Topology, TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, TelemetryError::ExternalToolUnavailable(_)));
    assert!(err.is_permanent());
    assert_eq!(bridge.state(), BridgeState::Idle, "nothing was launched");

    // Installing the tool later does not re-enable the session.
    std::fs::write(&tool, "#!/bin/sh\n").unwrap();
    let err = fetch_cache_metrics(&bridge, TIMEOUT, &CacheMetrics::default())
        .await
        .unwrap_err();
    assert!(matches!(err, TelemetryError::ExternalToolUnavailable(_)));
    assert!(bridge.disabled_reason().unwrap().contains("not found"));
}

#[cfg(unix)]
fn install_fake_profiler(dir: &Path) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let mut row = vec!["0.00"; 25];
    row[0] = "3.25%";
    row[16] = "4.00";
    row[20] = "75.50";
    row[24] = "0.90";
    std::fs::write(
        dir.join("cache.csv"),
        format!(
            "CACHE REPORT\nSystem (Aggregated)\nIC Fetch Miss Ratio,IC Access (pti)\n{}\n",
            row.join(",")
        ),
    )
    .unwrap();
    std::fs::write(
        dir.join("topology.csv"),
        "Processor Name:,AMD Ryzen 7 5800X 8-Core Processor\n\
         Number of Sockets :,1\n\
         Number of Cores :,8\n\
         Number of Threads :,16\n\
         SMT Enabled in HW:,Yes\n\
         Profile Time:,2024/01/01 10:00:00\n",
    )
    .unwrap();

    // Behavior is switched through a mode file so the script is written once.
    let tool = dir.join("fake-profiler.sh");
    let script = format!(
        r#"#!/bin/sh
dir="{dir}"
echo "$@" > "$dir/args"
out=""
groups=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift ;;
    -m) groups="$2"; shift ;;
  esac
  shift
done
case "$(cat "$dir/mode")" in
  ok)
    if [ "$groups" = "dc" ]; then cp "$dir/topology.csv" "$out"; else cp "$dir/cache.csv" "$out"; fi ;;
  fail)
    echo "profiler crashed" >&2
    exit 3 ;;
  silent)
    exit 0 ;;
  garbage)
    echo "nothing useful here" > "$out" ;;
  hang)
    exec sleep 30 ;;
esac
"#,
        dir = dir.display()
    );
    std::fs::write(&tool, script).unwrap();
    std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
    tool
}

#[cfg(unix)]
fn set_mode(dir: &Path, mode: &str) {
    std::fs::write(dir.join("mode"), mode).unwrap();
}

#[cfg(unix)]
fn report_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("cache_metrics_"))
        .count()
}

// One test drives every outcome so the script is never rewritten while
// another test thread forks.
#[cfg(unix)]
#[tokio::test]
async fn test_invocation_outcomes() {
    let tmp = tempfile::TempDir::new().unwrap();
    let dir = tmp.path();
    let tool = install_fake_profiler(dir);
    let bridge = ExternalProfilerBridge::new(&tool)
        .with_output_dir(dir)
        .with_settle_delay(Duration::ZERO)
        .with_privilege_check(|| true);

    // Success: topology and cache reports are parsed and removed.
    set_mode(dir, "ok");
    let topo = fetch_topology(&bridge, TIMEOUT, &ProcessorTopology::default())
        .await
        .unwrap();
    assert_eq!(topo.name, "AMD Ryzen 7 5800X 8-Core Processor");
    assert_eq!(topo.core_count, 8);
    assert_eq!(topo.ccd_count, 1, "socket count stands in for CCDs");
    assert!(topo.smt_enabled);

    let metrics = fetch_cache_metrics(&bridge, TIMEOUT, &CacheMetrics::default())
        .await
        .unwrap();
    assert_eq!(metrics.l1_instruction_miss_percent, 3.25);
    assert_eq!(metrics.l2_miss_per_thousand_instructions, 4.0);
    assert_eq!(metrics.l2_hit_per_thousand_instructions, 75.5);
    assert_eq!(metrics.l1_data_miss_per_thousand_instructions, 0.9);
    assert_eq!(bridge.state(), BridgeState::Succeeded);
    assert_eq!(report_files(dir), 0);

    let args = std::fs::read_to_string(dir.join("args")).unwrap();
    assert!(
        args.starts_with("-m dc,cache_miss,l1,l2 -a -A system -d 1 -o "),
        "unexpected args: {}",
        args
    );

    // The report file lives until the output handle is dropped.
    let output = bridge
        .invoke(MetricClass::CacheMetrics, TIMEOUT)
        .await
        .unwrap();
    assert!(output.path().is_file());
    assert!(!output.read_lines().await.unwrap().is_empty());
    drop(output);
    assert_eq!(report_files(dir), 0);

    // Non-zero exit carries stderr.
    set_mode(dir, "fail");
    let err = bridge
        .invoke(MetricClass::CacheMetrics, TIMEOUT)
        .await
        .unwrap_err();
    match err {
        TelemetryError::ExternalToolFailure { stderr, .. } => {
            assert!(stderr.contains("profiler crashed"))
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(bridge.state(), BridgeState::Failed);

    // Clean exit without a report.
    set_mode(dir, "silent");
    let err = bridge
        .invoke(MetricClass::CacheMetrics, TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, TelemetryError::ExternalToolFailure { .. }));

    // Unparseable report keeps nothing and surfaces a parse error.
    set_mode(dir, "garbage");
    let err = fetch_cache_metrics(&bridge, TIMEOUT, &metrics)
        .await
        .unwrap_err();
    assert!(matches!(err, TelemetryError::Parse(_)));
    assert_eq!(report_files(dir), 0);

    // Hung tool is killed at the deadline.
    set_mode(dir, "hang");
    let started = std::time::Instant::now();
    let err = bridge
        .invoke(MetricClass::CacheMetrics, Duration::from_millis(300))
        .await
        .unwrap_err();
    assert!(matches!(err, TelemetryError::ExternalToolTimeout(_)));
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(bridge.state(), BridgeState::TimedOut);
    assert_eq!(report_files(dir), 0);

    // Transient failures never disable the bridge.
    assert!(bridge.disabled_reason().is_none());
    set_mode(dir, "ok");
    assert!(fetch_cache_metrics(&bridge, TIMEOUT, &CacheMetrics::default())
        .await
        .is_ok());
}
