//! Documentation endpoint handler.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use tracing::{debug, instrument};

use crate::handlers::health::FOOTER_TEXT;
use crate::state::SharedState;

/// Handler for the /doc endpoint.
#[instrument(skip(state))]
pub async fn doc_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing /doc request");

    let version = env!("CARGO_PKG_VERSION");
    let port = state
        .config
        .port
        .unwrap_or(herakles_host_telemetry::config::DEFAULT_PORT);
    let doc = format!(
        r#"HERAKLES HOST TELEMETRY - DOCUMENTATION
=======================================

VERSION: {version}
DESCRIPTION: Live host telemetry with per-process history, top consumers and hardware cache metrics

HTTP ENDPOINTS
--------------
GET /metrics     - Prometheus metrics endpoint
GET /health      - Health check with internal statistics (plain text, 503 before first sample)
GET /snapshot    - Latest snapshot (JSON)
GET /prompt      - Assistant context text (optional ?question=...)
GET /doc         - This documentation (plain text)

AVAILABLE METRICS
-----------------
herakles_host_cpu_usage_percent                  - Total CPU usage
herakles_host_cpu_core_usage_percent             - Per-core CPU usage
herakles_host_memory_{{total,used}}_bytes          - Physical memory
herakles_host_disk_{{total,used}}_bytes            - Per-filesystem usage
herakles_host_top_cpu_process_percent            - Top CPU consumer (average/current)
herakles_host_top_memory_process_megabytes       - Top memory consumer (average/current)
herakles_host_cache_*                            - Hardware cache rates from the profiler
herakles_host_processor_info                     - Static processor topology
herakles_host_profiler_up                        - Profiler metrics fresh (1) or not (0)

CONFIGURATION
-------------
Config file locations (in order):
1. CLI specified: -c /path/to/config.yaml
2. System config: /etc/herakles/host-telemetry.yaml
3. Current directory: ./herakles-host-telemetry.yaml

Key configuration options:
- polling_interval: Sampling tick in seconds (default: 2)
- retention_window: History window in seconds (default: 60)
- enable_profiler: Read cache metrics from the hardware profiler (default: true)
- profiler_path: Profiler executable
- profiler_interval: Cache metric refresh in seconds (default: polling_interval)

Send SIGHUP to reload polling_interval and profiler_interval.

CLI COMMANDS
------------
herakles-host-telemetry                       - Start the collector
herakles-host-telemetry check --all           - Validate system requirements
herakles-host-telemetry config -o config.yaml - Generate config file
herakles-host-telemetry test -n 3             - Sample a few ticks and print the result

EXAMPLE USAGE
-------------
curl http://localhost:{port}/metrics
curl http://localhost:{port}/snapshot
curl 'http://localhost:{port}/prompt?question=why+is+my+build+slow'

{FOOTER_TEXT}
"#
    );

    (
        StatusCode::OK,
        [("Content-Type", "text/plain; charset=utf-8")],
        doc,
    )
}
