//! CLI arguments and subcommands for herakles-host-telemetry.

use clap::{Parser, Subcommand, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;

/// Log level options for CLI parsing
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Parses a config file value; unknown names yield `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        <Self as ValueEnum>::from_str(name, true).ok()
    }
}

/// Configuration format options for output
#[derive(Debug, Clone, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

/// Main CLI arguments structure
#[derive(Parser, Debug)]
#[command(
    name = "herakles-host-telemetry",
    about = "Live host telemetry collector with top consumers and hardware cache metrics",
    long_about = "Live host telemetry collector.\n\n\
                  Samples CPU, memory, disk and per-process usage on a fixed tick, keeps a \
                  sliding window of per-process history to report the top CPU and memory \
                  consumers, and reads hardware cache metrics from an external profiler.",
    author = "Michael Moll <proc-mem@herakles.io> - Herakles IO",
    version = "0.1.0",
    propagate_version = true,
    after_help = "Project: https://github.com/herakles-io/herakles-host-telemetry | Support: proc-mem@herakles.io"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// HTTP listen port
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Bind to specific interface/IP
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// Log level (overrides log_level from the config file)
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Config file (YAML/JSON/TOML)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Disable all config file loading
    #[arg(long)]
    pub no_config: bool,

    /// Print effective merged config and exit
    #[arg(long)]
    pub show_config: bool,

    /// Output format for --show-config
    #[arg(long, value_enum, default_value = "yaml")]
    pub config_format: ConfigFormat,

    /// Validate config and exit (return code 1 on error)
    #[arg(long)]
    pub check_config: bool,

    /// Sampling tick in seconds
    #[arg(long)]
    pub polling_interval: Option<u64>,

    /// History retention window in seconds
    #[arg(long)]
    pub retention_window: Option<u64>,

    /// Path to the hardware profiler executable
    #[arg(long)]
    pub profiler_path: Option<PathBuf>,

    /// Cache metric refresh interval in seconds
    #[arg(long)]
    pub profiler_interval: Option<u64>,

    /// Disable profiler-based cache metrics
    #[arg(long)]
    pub disable_profiler: bool,

    /// Disable /health endpoint
    #[arg(long)]
    pub disable_health: bool,

    /// Parallel processing threads (0 = auto)
    #[arg(long)]
    pub parallelism: Option<usize>,

    /// procfs mount point
    #[arg(long)]
    pub proc_root: Option<PathBuf>,
}

/// Subcommands for additional functionality
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate configuration and system requirements
    Check {
        /// Check /proc filesystem
        #[arg(long)]
        proc: bool,

        /// Check profiler executable and privileges
        #[arg(long)]
        profiler: bool,

        /// Check all system requirements
        #[arg(long)]
        all: bool,
    },

    /// Generate configuration files
    Config {
        /// Output file path ("-" for stdout)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "yaml")]
        format: ConfigFormat,

        /// Include comments and examples
        #[arg(long)]
        commented: bool,
    },

    /// Sample a few ticks in the foreground and print the result
    Test {
        /// Number of ticks to sample
        #[arg(short = 'n', long, default_value_t = 2)]
        iterations: usize,

        /// Print the prompt text after the last tick
        #[arg(long)]
        verbose: bool,

        /// Print the final snapshot as JSON
        #[arg(long)]
        json: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags_and_subcommand() {
        let args = Args::try_parse_from([
            "herakles-host-telemetry",
            "--polling-interval",
            "5",
            "--disable-profiler",
            "--log-level",
            "debug",
            "test",
            "-n",
            "3",
        ])
        .unwrap();
        assert_eq!(args.polling_interval, Some(5));
        assert!(args.disable_profiler);
        assert!(matches!(args.log_level, Some(LogLevel::Debug)));
        assert!(matches!(
            args.command,
            Some(Commands::Test { iterations: 3, .. })
        ));
    }

    #[test]
    fn test_log_level_from_name() {
        assert!(matches!(LogLevel::from_name("WARN"), Some(LogLevel::Warn)));
        assert!(LogLevel::from_name("loud").is_none());
    }
}
