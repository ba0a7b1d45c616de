//! Config file generation command implementation.

use herakles_host_telemetry::config::Config;
use std::fs;
use std::path::PathBuf;

use crate::cli::ConfigFormat;

/// Generates configuration files
pub fn command_config(
    output: Option<PathBuf>,
    format: ConfigFormat,
    commented: bool,
) -> anyhow::Result<()> {
    let config = Config::default();
    let output = output.unwrap_or_else(|| PathBuf::from("herakles-host-telemetry.yaml"));

    let content = render_config(&config, format, commented)?;

    if output.to_string_lossy() == "-" {
        print!("{}", content);
    } else {
        fs::write(&output, content)?;
        println!("✅ Configuration written to: {}", output.display());
    }

    Ok(())
}

/// Serializes `config` in `format`; comments are only added to YAML.
pub fn render_config(
    config: &Config,
    format: ConfigFormat,
    commented: bool,
) -> anyhow::Result<String> {
    Ok(match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Toml => toml::to_string_pretty(config)?,
        ConfigFormat::Yaml => {
            let mut content = serde_yaml::to_string(config)?;
            if commented {
                content = add_config_comments(content);
            }
            content
        }
    })
}

/// Adds comments to YAML configuration
fn add_config_comments(yaml: String) -> String {
    let comments = r#"# Herakles Host Telemetry Configuration
# =====================================
#
# Server Configuration
# --------------------
# bind: "0.0.0.0"              # Bind IP (0.0.0.0 = all interfaces)
# port: 9216                   # HTTP port
#
# Sampling
# --------
# polling_interval: 2          # Sampling tick in seconds (SIGHUP reloads)
# retention_window: 60         # Per-process history window in seconds
# min_cpu_percent: 1.0         # Minimum average CPU % to report a top consumer
# min_memory_mb: 1.0           # Minimum average memory (MB) to report a top consumer
# proc_root: /proc             # procfs mount point
# parallelism: null            # Parallel threads for process reads (null = auto)
#
# Hardware Profiler
# -----------------
# enable_profiler: true        # Read cache metrics from the profiler (requires root)
# profiler_path: /opt/AMDuProf/bin/AMDuProfPcm
# profiler_interval: null      # Cache metric refresh in seconds (null = polling_interval)
# profiler_timeout: 15         # Kill the profiler after N seconds
# profiler_settle_ms: 500      # Wait after profiler exit before reading its report
# profiler_output_dir: null    # Report directory (null = system temp dir)
#
# Feature Flags
# -------------
# enable_health: true          # Enable /health endpoint
#
# Logging
# -------
# log_level: "info"            # off, error, warn, info, debug, trace
"#;

    format!("{comments}\n{yaml}")
}
