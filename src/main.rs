// herakles-host-telemetry - version 0.1.0
// Live host telemetry collector with tracing logging
use axum::{routing::get, Router};
use clap::Parser;
use herakles_host_telemetry::config::{
    load_config, validate_effective_config, Config, DEFAULT_BIND_ADDR, DEFAULT_PORT,
};
use herakles_host_telemetry::health_stats::HealthStats;
use herakles_host_telemetry::scheduler::{SchedulerHandle, TelemetryScheduler};
use herakles_host_telemetry::source::ProcCounterSource;
use prometheus::Registry;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::{net::TcpListener, signal};
use tracing::{debug, error, info, level_filters::LevelFilter, warn};

mod cli;
mod commands;
mod handlers;
mod metrics;
mod state;

use cli::{Args, Commands, ConfigFormat, LogLevel};
use commands::config::render_config;
use metrics::TelemetryMetrics;
use state::AppState;

/// -------------------------------------------------------------------
/// CONFIGURATION MANAGEMENT
/// -------------------------------------------------------------------

/// Resolves configuration from CLI args, config file, and defaults.
/// Precedence: CLI (if provided) > config file > default.
fn resolve_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = if args.no_config {
        Config::default()
    } else {
        load_config(args.config.as_deref())?.0
    };

    if let Some(bind_ip) = args.bind {
        config.bind = Some(bind_ip.to_string());
    }
    if let Some(cli_port) = args.port {
        config.port = Some(cli_port);
    }
    if let Some(level) = args.log_level {
        config.log_level = Some(format!("{:?}", level).to_lowercase());
    }

    // Sampling
    if args.polling_interval.is_some() {
        config.polling_interval = args.polling_interval;
    }
    if args.retention_window.is_some() {
        config.retention_window = args.retention_window;
    }
    if args.parallelism.is_some() {
        config.parallelism = args.parallelism;
    }
    if args.proc_root.is_some() {
        config.proc_root = args.proc_root.clone();
    }

    // Profiler
    if args.profiler_path.is_some() {
        config.profiler_path = args.profiler_path.clone();
    }
    if args.profiler_interval.is_some() {
        config.profiler_interval = args.profiler_interval;
    }
    if args.disable_profiler {
        config.enable_profiler = Some(false);
    }

    // Feature flags
    if args.disable_health {
        config.enable_health = Some(false);
    }

    Ok(config)
}

/// Shows configuration in requested format
fn show_config(config: &Config, format: ConfigFormat) -> anyhow::Result<()> {
    println!("{}", render_config(config, format, false)?);
    Ok(())
}

/// Initializes tracing logging subsystem with configured log level
fn setup_logging(config: &Config) {
    let level = config
        .log_level
        .as_deref()
        .and_then(LogLevel::from_name)
        .unwrap_or(LogLevel::Info);

    let filter = match level {
        LogLevel::Off => LevelFilter::OFF,
        LogLevel::Error => LevelFilter::ERROR,
        LogLevel::Warn => LevelFilter::WARN,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Debug => LevelFilter::DEBUG,
        LogLevel::Trace => LevelFilter::TRACE,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return;
    }

    info!("Logging initialized with level: {:?}", level);
}

/// Applies reloaded intervals to the running scheduler.
fn apply_intervals(config: &Config, scheduler: &SchedulerHandle) {
    let tick = config.polling_interval();
    let profiler = config.profiler_interval();
    if tick != scheduler.tick_interval() {
        scheduler.set_tick_interval(tick);
    }
    if profiler != scheduler.profiler_interval() {
        scheduler.set_profiler_interval(profiler);
    }
}

/// Re-reads the configuration on SIGHUP and applies the interval settings.
#[cfg(unix)]
async fn reload_on_hangup(args: Arc<Args>, scheduler: Arc<SchedulerHandle>) {
    let mut hangup = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            warn!("Failed to install SIGHUP handler, reload disabled: {}", e);
            return;
        }
    };

    while hangup.recv().await.is_some() {
        info!("Received SIGHUP, reloading configuration");
        let reloaded = resolve_config(&args).and_then(|config| {
            validate_effective_config(&config)?;
            Ok(config)
        });
        match reloaded {
            Ok(config) => apply_intervals(&config, &scheduler),
            Err(e) => error!("Configuration reload failed, keeping current settings: {:#}", e),
        }
    }
}

/// Resolves once SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }
}

/// -------------------------------------------------------------------
/// MAIN APPLICATION ENTRY POINT
/// -------------------------------------------------------------------
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Arc::new(Args::parse());

    // Early config resolution for show/check modes
    if args.show_config || args.check_config {
        let config = resolve_config(&args)?;

        if args.check_config {
            if let Err(e) = validate_effective_config(&config) {
                eprintln!("❌ Configuration invalid: {:#}", e);
                std::process::exit(1);
            }
            println!("✅ Configuration is valid");
            return Ok(());
        }

        return show_config(&config, args.config_format.clone());
    }

    // Handle subcommands
    if let Some(command) = &args.command {
        let config = resolve_config(&args)?;
        if let Err(e) = validate_effective_config(&config) {
            eprintln!("❌ Configuration invalid: {:#}", e);
            std::process::exit(1);
        }

        return match command {
            Commands::Check { proc, profiler, all } => {
                if commands::command_check(*proc, *profiler, *all, &config) {
                    Ok(())
                } else {
                    std::process::exit(1);
                }
            }
            Commands::Config {
                output,
                format,
                commented,
            } => commands::command_config(output.clone(), format.clone(), *commented),
            Commands::Test {
                iterations,
                verbose,
                json,
            } => {
                setup_logging(&config);
                commands::command_test(*iterations, *verbose, *json, &config).await
            }
        };
    }

    // Load configuration for main server mode
    let config = resolve_config(&args)?;

    if let Err(e) = validate_effective_config(&config) {
        eprintln!("❌ Configuration invalid: {:#}", e);
        std::process::exit(1);
    }

    setup_logging(&config);

    info!("Starting herakles-host-telemetry");

    let bind_ip_str = config.bind.as_deref().unwrap_or(DEFAULT_BIND_ADDR);
    let port = config.port.unwrap_or(DEFAULT_PORT);

    // Configure parallel processing thread pool if specified
    if let Some(threads) = config.parallelism {
        if threads > 0 {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build_global()
            {
                Ok(()) => debug!("Rayon thread pool configured with {} threads", threads),
                Err(e) => error!("Failed to set rayon thread pool: {}", e),
            }
        }
    }

    // Counter source takes its CPU baseline here
    let source = Arc::new(ProcCounterSource::new(config.proc_root())?);
    let bridge = config.profiler_bridge().map(Arc::new);
    if bridge.is_none() {
        info!("Profiler metrics disabled by configuration");
    }

    let health_stats = Arc::new(HealthStats::new());
    let scheduler = Arc::new(
        TelemetryScheduler::new(source, bridge, config.scheduler_config())
            .with_health_stats(health_stats.clone())
            .start(),
    );

    let registry = Registry::new();
    let metrics = TelemetryMetrics::new(&registry)?;
    debug!("All metrics registered successfully");

    let state = Arc::new(AppState {
        registry,
        metrics,
        snapshots: scheduler.subscribe(),
        health_stats,
        config: Arc::new(config.clone()),
    });

    #[cfg(unix)]
    let reload_task = tokio::spawn(reload_on_hangup(args.clone(), scheduler.clone()));

    // Configure HTTP server routes and start listening
    let addr = SocketAddr::new(bind_ip_str.parse::<IpAddr>()?, port);

    let mut app = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .route("/snapshot", get(handlers::snapshot_handler))
        .route("/prompt", get(handlers::prompt_handler))
        .route("/doc", get(handlers::doc_handler));

    if config.enable_health.unwrap_or(true) {
        app = app.route("/health", get(handlers::health_handler));
    }

    let app = app.with_state(state);

    let listener = TcpListener::bind(addr).await?;
    info!(
        "herakles-host-telemetry listening on http://{}:{}",
        bind_ip_str, port
    );

    let server = axum::serve(listener, app);

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                error!("Server error: {}", e);
                scheduler.shutdown().await;
                return Err(e.into());
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, exiting...");
        }
    }

    #[cfg(unix)]
    {
        reload_task.abort();
        let _ = reload_task.await;
    }
    scheduler.shutdown().await;

    info!("herakles-host-telemetry stopped gracefully");
    Ok(())
}
