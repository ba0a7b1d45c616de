//! Collector configuration: defaults, file loading and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::profiler::ExternalProfilerBridge;
use crate::scheduler::SchedulerConfig;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 9216;
pub const DEFAULT_POLLING_INTERVAL: u64 = 2;
pub const DEFAULT_RETENTION_WINDOW: u64 = 60;
pub const DEFAULT_PROFILER_PATH: &str = "/opt/AMDuProf/bin/AMDuProfPcm";
pub const DEFAULT_PROFILER_TIMEOUT: u64 = 15;
pub const DEFAULT_PROFILER_SETTLE_MS: u64 = 500;
pub const DEFAULT_PROC_ROOT: &str = "/proc";

/// Files probed when no config path is given, in order.
pub const DEFAULT_CONFIG_LOCATIONS: [&str; 6] = [
    "/etc/herakles/host-telemetry.yaml",
    "/etc/herakles/host-telemetry.yml",
    "/etc/herakles/host-telemetry.json",
    "./herakles-host-telemetry.yaml",
    "./herakles-host-telemetry.yml",
    "./herakles-host-telemetry.json",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    // Server configuration
    pub port: Option<u16>,
    pub bind: Option<String>,

    // Sampling
    /// Main tick in whole seconds.
    #[serde(alias = "polling-interval")]
    pub polling_interval: Option<u64>,
    #[serde(alias = "retention-window")]
    pub retention_window: Option<u64>,
    #[serde(alias = "min-cpu-percent")]
    pub min_cpu_percent: Option<f64>,
    #[serde(alias = "min-memory-mb")]
    pub min_memory_mb: Option<f64>,
    pub proc_root: Option<PathBuf>,
    pub parallelism: Option<usize>,

    // Hardware profiler
    #[serde(alias = "enable-profiler")]
    pub enable_profiler: Option<bool>,
    #[serde(alias = "profiler-path")]
    pub profiler_path: Option<PathBuf>,
    #[serde(alias = "profiler-interval")]
    pub profiler_interval: Option<u64>,
    #[serde(alias = "profiler-timeout")]
    pub profiler_timeout: Option<u64>,
    #[serde(alias = "profiler-settle-ms")]
    pub profiler_settle_ms: Option<u64>,
    pub profiler_output_dir: Option<PathBuf>,

    // Feature flags
    pub enable_health: Option<bool>,

    // Logging
    pub log_level: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: Some(DEFAULT_PORT),
            bind: Some(DEFAULT_BIND_ADDR.to_string()),
            polling_interval: Some(DEFAULT_POLLING_INTERVAL),
            retention_window: Some(DEFAULT_RETENTION_WINDOW),
            min_cpu_percent: Some(crate::ranking::DEFAULT_MIN_CPU_PERCENT),
            min_memory_mb: Some(crate::ranking::DEFAULT_MIN_MEMORY_MB),
            proc_root: Some(PathBuf::from(DEFAULT_PROC_ROOT)),
            parallelism: None,
            enable_profiler: Some(true),
            profiler_path: Some(PathBuf::from(DEFAULT_PROFILER_PATH)),
            profiler_interval: None,
            profiler_timeout: Some(DEFAULT_PROFILER_TIMEOUT),
            profiler_settle_ms: Some(DEFAULT_PROFILER_SETTLE_MS),
            profiler_output_dir: None,
            enable_health: Some(true),
            log_level: Some("info".into()),
        }
    }
}

impl Config {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval.unwrap_or(DEFAULT_POLLING_INTERVAL))
    }

    /// Cache metric cadence; follows the polling interval when unset.
    pub fn profiler_interval(&self) -> Duration {
        self.profiler_interval
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.polling_interval())
    }

    pub fn proc_root(&self) -> PathBuf {
        self.proc_root
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PROC_ROOT))
    }

    pub fn profiler_path(&self) -> PathBuf {
        self.profiler_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PROFILER_PATH))
    }

    pub fn profiler_output_dir(&self) -> PathBuf {
        self.profiler_output_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    pub fn profiler_settle_delay(&self) -> Duration {
        Duration::from_millis(self.profiler_settle_ms.unwrap_or(DEFAULT_PROFILER_SETTLE_MS))
    }

    pub fn profiler_enabled(&self) -> bool {
        self.enable_profiler.unwrap_or(true)
    }

    /// The profiler bridge, or `None` when profiler metrics are disabled.
    pub fn profiler_bridge(&self) -> Option<ExternalProfilerBridge> {
        self.profiler_enabled().then(|| {
            ExternalProfilerBridge::new(self.profiler_path())
                .with_output_dir(self.profiler_output_dir())
                .with_settle_delay(self.profiler_settle_delay())
        })
    }

    /// Scheduler settings with defaults filled in.
    pub fn scheduler_config(&self) -> SchedulerConfig {
        let defaults = SchedulerConfig::default();
        SchedulerConfig {
            tick_interval: self.polling_interval(),
            profiler_interval: self.profiler_interval(),
            profiler_timeout: self
                .profiler_timeout
                .map(Duration::from_secs)
                .unwrap_or(defaults.profiler_timeout),
            retention_window: self
                .retention_window
                .map(Duration::from_secs)
                .unwrap_or(defaults.retention_window),
            min_cpu_percent: self.min_cpu_percent.unwrap_or(defaults.min_cpu_percent),
            min_memory_mb: self.min_memory_mb.unwrap_or(defaults.min_memory_mb),
        }
    }
}

/// Validate effective config (used by --check-config and at startup)
pub fn validate_effective_config(cfg: &Config) -> anyhow::Result<()> {
    for (name, value) in [
        ("polling_interval", cfg.polling_interval),
        ("retention_window", cfg.retention_window),
        ("profiler_interval", cfg.profiler_interval),
        ("profiler_timeout", cfg.profiler_timeout),
    ] {
        if value == Some(0) {
            bail!("{} must be a positive number of seconds", name);
        }
    }

    for (name, value) in [
        ("min_cpu_percent", cfg.min_cpu_percent),
        ("min_memory_mb", cfg.min_memory_mb),
    ] {
        if let Some(v) = value {
            if !v.is_finite() || v < 0.0 {
                bail!("{} must be a non-negative number, got {}", name, v);
            }
        }
    }

    if let Some(bind) = cfg.bind.as_deref() {
        if bind.parse::<std::net::IpAddr>().is_err() {
            bail!("Invalid bind address '{}'", bind);
        }
    }

    if let Some(level) = cfg.log_level.as_deref() {
        match level.to_ascii_lowercase().as_str() {
            "off" | "error" | "warn" | "info" | "debug" | "trace" => {}
            other => bail!(
                "Invalid log_level '{}', expected off/error/warn/info/debug/trace",
                other
            ),
        }
    }

    if cfg.profiler_enabled()
        && cfg
            .profiler_path
            .as_ref()
            .is_some_and(|p| p.as_os_str().is_empty())
    {
        bail!("profiler_path must not be empty when the profiler is enabled");
    }

    Ok(())
}

/// First existing file among [`DEFAULT_CONFIG_LOCATIONS`].
pub fn find_default_config() -> Option<PathBuf> {
    DEFAULT_CONFIG_LOCATIONS
        .iter()
        .find(|p| Path::new(p).exists())
        .map(PathBuf::from)
}

/// Loads a config file; the format follows the extension (YAML by default).
pub fn load_config_file(path: &Path) -> anyhow::Result<Config> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;

    let config: Config = match path.extension().and_then(|s| s.to_str()) {
        Some("json") => serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON in {}", path.display()))?,
        Some("toml") => toml::from_str(&content)
            .with_context(|| format!("Invalid TOML in {}", path.display()))?,
        _ => serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid YAML in {}", path.display()))?,
    };
    info!("Loaded configuration from: {}", path.display());
    Ok(config)
}

/// Loads `path`, or the first default location, falling back to defaults.
///
/// Returns the file the config came from, if any.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<(Config, Option<PathBuf>)> {
    let path = match path {
        Some(p) => {
            if !p.exists() {
                bail!("Config file {} does not exist", p.display());
            }
            Some(p.to_path_buf())
        }
        None => find_default_config(),
    };

    match path {
        Some(path) => Ok((load_config_file(&path)?, Some(path))),
        None => Ok((Config::default(), None)),
    }
}
