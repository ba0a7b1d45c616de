//! Drives sampling, history, ranking and publication on two timers.
//!
//! The main tick samples OS counters, folds process samples into the
//! history, ranks the top consumers and publishes a fresh snapshot. The
//! profiler refresh runs on its own timer; its results are stored in the
//! shared state and merged into the next assembled snapshot.
//!
//! Both timers are non-reentrant: each loop awaits its own work before the
//! next tick, and late ticks are skipped rather than bunched.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::TelemetryError;
use crate::health_stats::HealthStats;
use crate::history::{ProcessHistoryTracker, DEFAULT_RETENTION_WINDOW};
use crate::process::ProcessSample;
use crate::profiler::{self, ExternalProfilerBridge};
use crate::ranking::{TopConsumerRanker, DEFAULT_MIN_CPU_PERCENT, DEFAULT_MIN_MEMORY_MB};
use crate::snapshot::{
    CacheMetrics, CacheReading, MemoryUsage, MetricSnapshot, ProcessorTopology, ProfilerStatus,
};
use crate::source::CounterSource;
use crate::system::{CpuSample, DiskUsage, MemorySample};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_PROFILER_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_PROFILER_TIMEOUT: Duration = Duration::from_secs(15);

/// Status text when profiler metrics are switched off in configuration.
pub const PROFILER_DISABLED_BY_CONFIG: &str = "disabled by configuration";

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    pub profiler_interval: Duration,
    pub profiler_timeout: Duration,
    pub retention_window: Duration,
    pub min_cpu_percent: f64,
    pub min_memory_mb: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            profiler_interval: DEFAULT_PROFILER_INTERVAL,
            profiler_timeout: DEFAULT_PROFILER_TIMEOUT,
            retention_window: DEFAULT_RETENTION_WINDOW,
            min_cpu_percent: DEFAULT_MIN_CPU_PERCENT,
            min_memory_mb: DEFAULT_MIN_MEMORY_MB,
        }
    }
}

/// Latest published snapshot; `None` until the first tick completes.
pub type SnapshotReceiver = watch::Receiver<Option<Arc<MetricSnapshot>>>;

/// Mutable state shared by both timers, behind one coarse lock.
struct TelemetryState {
    history: ProcessHistoryTracker,
    ranker: TopConsumerRanker,
    last: MetricSnapshot,
    topology: Option<ProcessorTopology>,
    /// Topology is fetched once; set after the first attempt whatever its outcome.
    topology_attempted: bool,
    cache: Option<CacheReading>,
    profiler_status: ProfilerStatus,
}

/// Counters read during one tick. `None` marks a failed read.
struct TickSample {
    cpu: Option<CpuSample>,
    memory: Option<MemorySample>,
    disks: Option<Vec<DiskUsage>>,
    processes: Option<Vec<ProcessSample>>,
    taken_at: Instant,
}

fn keep_previous<T>(result: crate::error::Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("{}; keeping previous value", e);
            None
        }
    }
}

fn sample_counters(source: &dyn CounterSource) -> TickSample {
    TickSample {
        cpu: keep_previous(source.sample_cpu()),
        memory: keep_previous(source.sample_memory()),
        disks: keep_previous(source.sample_disks()),
        processes: keep_previous(source.sample_all_processes()),
        taken_at: Instant::now(),
    }
}

struct Shared {
    source: Arc<dyn CounterSource>,
    state: Mutex<TelemetryState>,
    publisher: watch::Sender<Option<Arc<MetricSnapshot>>>,
    health: Arc<HealthStats>,
    profiler_timeout: Duration,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, TelemetryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_profiler_status(&self, status: ProfilerStatus) {
        let mut state = self.lock();
        if state.profiler_status != status {
            info!("Profiler status: {}", status);
            state.profiler_status = status;
        }
    }

    async fn tick(&self) {
        let started = Instant::now();
        let source = self.source.clone();
        let sample = match tokio::task::spawn_blocking(move || sample_counters(source.as_ref())).await
        {
            Ok(sample) => sample,
            Err(e) => {
                warn!("Sampling task failed: {}", e);
                return;
            }
        };
        let processes_sampled = sample.processes.as_ref().map_or(0, Vec::len);

        let snapshot = {
            let mut state = self.lock();
            let state = &mut *state;

            if let Some(processes) = sample.processes {
                state.history.update(processes, sample.taken_at);
            } else {
                state.history.prune(sample.taken_at);
            }
            let top = state.ranker.rank(&state.history);

            let mut next = state.last.clone();
            next.sequence += 1;
            next.timestamp = Utc::now();
            if let Some(cpu) = sample.cpu {
                next.total_cpu_percent = Some(cpu.total());
                next.per_core_cpu_percent = cpu.per_core_percent;
            }
            if let Some(mem) = sample.memory {
                next.memory = Some(MemoryUsage {
                    total_bytes: mem.total_bytes,
                    used_bytes: mem.used_bytes(),
                });
            }
            if let Some(disks) = sample.disks {
                next.disk_usages = disks;
            }
            next.top_consumers = Some(top);
            next.tracked_processes = state.history.len();
            next.processor_topology = state.topology.clone();
            next.cache_metrics = state.cache;
            next.profiler_status = state.profiler_status.clone();

            state.last = next.clone();
            Arc::new(next)
        };

        debug!(
            "Tick {} assembled: {} processes sampled, {} names tracked",
            snapshot.sequence, processes_sampled, snapshot.tracked_processes
        );
        self.publisher.send_replace(Some(snapshot));
        self.health
            .record_tick(processes_sampled, started.elapsed().as_secs_f64());
    }

    /// One profiler pass. Returns `false` once the profiler is permanently unavailable.
    ///
    /// The first pass also fetches the topology. A failed topology fetch is
    /// not retried and never holds back the cache metrics.
    async fn refresh_profiler(&self, bridge: &ExternalProfilerBridge) -> bool {
        let (first_pass, previous) = {
            let mut state = self.lock();
            let first = !state.topology_attempted;
            state.topology_attempted = true;
            (first, state.cache.map(|c| c.metrics).unwrap_or_default())
        };

        if first_pass {
            let started = Instant::now();
            let result =
                profiler::fetch_topology(bridge, self.profiler_timeout, &ProcessorTopology::default())
                    .await;
            self.health
                .record_profiler_run(result.is_ok(), started.elapsed().as_secs_f64());
            match result {
                Ok(topology) => {
                    info!(
                        "Processor topology: {} ({} cores, {} threads)",
                        topology.name, topology.core_count, topology.thread_count
                    );
                    self.lock().topology = Some(topology);
                }
                Err(e) => {
                    if !self.profiler_failed(e) {
                        return false;
                    }
                }
            }
        }

        let started = Instant::now();
        let result = profiler::fetch_cache_metrics(bridge, self.profiler_timeout, &previous).await;
        self.health
            .record_profiler_run(result.is_ok(), started.elapsed().as_secs_f64());
        match result {
            Ok(metrics) => {
                self.store_cache_metrics(metrics);
                true
            }
            Err(e) => self.profiler_failed(e),
        }
    }

    fn store_cache_metrics(&self, metrics: CacheMetrics) {
        debug!("Cache metrics updated: {}", metrics.status_line());
        let mut state = self.lock();
        state.cache = Some(CacheReading {
            metrics,
            updated_at: Utc::now(),
        });
        if state.profiler_status != ProfilerStatus::Monitoring {
            info!("Profiler status: {}", ProfilerStatus::Monitoring);
            state.profiler_status = ProfilerStatus::Monitoring;
        }
    }

    fn profiler_failed(&self, error: TelemetryError) -> bool {
        match error {
            TelemetryError::ExternalToolUnavailable(reason) => {
                self.set_profiler_status(ProfilerStatus::Disabled(reason));
                false
            }
            TelemetryError::ExternalToolFailure { reason, stderr } => {
                warn!(
                    "Profiler run failed: {} (stderr: {})",
                    reason,
                    stderr.trim()
                );
                self.set_profiler_status(ProfilerStatus::Degraded(reason));
                true
            }
            other => {
                warn!("Profiler refresh failed: {}; keeping last known values", other);
                self.set_profiler_status(ProfilerStatus::Degraded(other.to_string()));
                true
            }
        }
    }
}

fn make_interval(period: Duration, first: tokio::time::Instant) -> Interval {
    let mut interval = interval_at(first, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

async fn run_ticks(shared: Arc<Shared>, mut period_rx: watch::Receiver<Duration>) {
    let mut period = *period_rx.borrow_and_update();
    let mut ticker = make_interval(period, tokio::time::Instant::now());
    info!("Sampling started with {:?} interval", period);

    loop {
        tokio::select! {
            _ = ticker.tick() => shared.tick().await,
            changed = period_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let next = *period_rx.borrow_and_update();
                if next != period {
                    info!("Sampling interval changed from {:?} to {:?}", period, next);
                    period = next;
                    ticker = make_interval(period, tokio::time::Instant::now() + period);
                }
            }
        }
    }
}

async fn run_profiler(
    shared: Arc<Shared>,
    bridge: Arc<ExternalProfilerBridge>,
    mut period_rx: watch::Receiver<Duration>,
) {
    let mut period = *period_rx.borrow_and_update();
    let mut ticker = make_interval(period, tokio::time::Instant::now());
    info!("Profiler refresh started with {:?} interval", period);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !shared.refresh_profiler(&bridge).await {
                    info!("Profiler refresh stopped for this session");
                    break;
                }
            }
            changed = period_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let next = *period_rx.borrow_and_update();
                if next != period {
                    info!("Profiler interval changed from {:?} to {:?}", period, next);
                    period = next;
                    ticker = make_interval(period, tokio::time::Instant::now() + period);
                }
            }
        }
    }
}

/// A configured scheduler that has not started yet.
pub struct TelemetryScheduler {
    source: Arc<dyn CounterSource>,
    bridge: Option<Arc<ExternalProfilerBridge>>,
    config: SchedulerConfig,
    health: Arc<HealthStats>,
}

impl TelemetryScheduler {
    /// `bridge` is `None` when profiler metrics are disabled.
    pub fn new(
        source: Arc<dyn CounterSource>,
        bridge: Option<Arc<ExternalProfilerBridge>>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            source,
            bridge,
            config,
            health: Arc::new(HealthStats::new()),
        }
    }

    pub fn with_health_stats(mut self, health: Arc<HealthStats>) -> Self {
        self.health = health;
        self
    }

    /// Spawns both timers on the current tokio runtime.
    pub fn start(self) -> SchedulerHandle {
        let initial_status = if self.bridge.is_some() {
            ProfilerStatus::Initializing
        } else {
            ProfilerStatus::Disabled(PROFILER_DISABLED_BY_CONFIG.to_string())
        };

        let state = TelemetryState {
            history: ProcessHistoryTracker::new(
                self.config.retention_window,
                self.source.logical_core_count(),
            ),
            ranker: TopConsumerRanker::new(self.config.min_cpu_percent, self.config.min_memory_mb),
            last: MetricSnapshot::empty(initial_status.clone()),
            topology: None,
            topology_attempted: false,
            cache: None,
            profiler_status: initial_status,
        };

        let (publisher, snapshots) = watch::channel(None);
        let shared = Arc::new(Shared {
            source: self.source,
            state: Mutex::new(state),
            publisher,
            health: self.health.clone(),
            profiler_timeout: self.config.profiler_timeout,
        });

        let (tick_tx, tick_rx) = watch::channel(self.config.tick_interval);
        let (profiler_tx, profiler_rx) = watch::channel(self.config.profiler_interval);

        let mut tasks = vec![tokio::spawn(run_ticks(shared.clone(), tick_rx))];
        if let Some(bridge) = self.bridge {
            tasks.push(tokio::spawn(run_profiler(shared.clone(), bridge, profiler_rx)));
        }

        SchedulerHandle {
            shared,
            snapshots,
            tick_interval: tick_tx,
            profiler_interval: profiler_tx,
            tasks: Mutex::new(tasks),
        }
    }
}

/// A running scheduler.
pub struct SchedulerHandle {
    shared: Arc<Shared>,
    snapshots: SnapshotReceiver,
    tick_interval: watch::Sender<Duration>,
    profiler_interval: watch::Sender<Duration>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SchedulerHandle {
    /// New subscriber. Slow subscribers only ever see the latest snapshot.
    pub fn subscribe(&self) -> SnapshotReceiver {
        self.snapshots.clone()
    }

    pub fn latest(&self) -> Option<Arc<MetricSnapshot>> {
        self.snapshots.borrow().clone()
    }

    pub fn health_stats(&self) -> Arc<HealthStats> {
        self.shared.health.clone()
    }

    pub fn tick_interval(&self) -> Duration {
        *self.tick_interval.borrow()
    }

    pub fn profiler_interval(&self) -> Duration {
        *self.profiler_interval.borrow()
    }

    /// Applies from the next fire; accumulated history is kept. Zero is ignored.
    pub fn set_tick_interval(&self, interval: Duration) {
        if interval.is_zero() {
            warn!("Ignoring zero sampling interval");
            return;
        }
        self.tick_interval.send_replace(interval);
    }

    pub fn set_profiler_interval(&self, interval: Duration) {
        if interval.is_zero() {
            warn!("Ignoring zero profiler interval");
            return;
        }
        self.profiler_interval.send_replace(interval);
    }

    pub fn profiler_status(&self) -> ProfilerStatus {
        self.shared.lock().profiler_status.clone()
    }

    /// Stops both timers and waits for them to finish.
    pub async fn shutdown(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            let _ = task.await;
        }
        info!("Telemetry scheduler stopped");
    }
}
