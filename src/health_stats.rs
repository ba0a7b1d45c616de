//! Running statistics about the collector itself, rendered on `/health`.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Clone, Copy, Default, Debug)]
struct RunningStat {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    last: f64,
}

impl RunningStat {
    fn add(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
            self.last = value;
            self.sum = value;
            self.count = 1;
            return;
        }
        self.count += 1;
        self.sum += value;
        self.last = value;
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
    }

    fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / (self.count as f64)
        }
    }
}

/// Point-in-time view of one statistic.
#[derive(Clone, Copy, Default, Debug, PartialEq)]
pub struct StatSnapshot {
    pub current: f64,
    pub average: f64,
    pub max: f64,
    pub min: f64,
    pub count: u64,
}

#[derive(Default, Debug)]
pub struct Stat {
    inner: Mutex<RunningStat>,
}

impl Stat {
    pub fn add_sample(&self, value: f64) {
        if let Ok(mut s) = self.inner.lock() {
            s.add(value);
        }
    }

    pub fn snapshot(&self) -> StatSnapshot {
        match self.inner.lock() {
            Ok(s) => StatSnapshot {
                current: s.last,
                average: s.avg(),
                max: s.max,
                min: s.min,
                count: s.count,
            },
            Err(_) => StatSnapshot::default(),
        }
    }
}

#[derive(Default, Debug)]
pub struct HealthStats {
    pub processes_sampled: Stat,
    pub tick_duration_seconds: Stat,
    pub profiler_run_seconds: Stat,
    total_ticks: AtomicU64,
    profiler_successes: AtomicU64,
    profiler_failures: AtomicU64,
}

impl HealthStats {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn record_tick(&self, processes: usize, tick_duration_seconds: f64) {
        self.processes_sampled.add_sample(processes as f64);
        self.tick_duration_seconds.add_sample(tick_duration_seconds);
        self.total_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_profiler_run(&self, success: bool, duration_seconds: f64) {
        self.profiler_run_seconds.add_sample(duration_seconds);
        if success {
            self.profiler_successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.profiler_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn total_ticks(&self) -> u64 {
        self.total_ticks.load(Ordering::Relaxed)
    }

    pub fn profiler_successes(&self) -> u64 {
        self.profiler_successes.load(Ordering::Relaxed)
    }

    pub fn profiler_failures(&self) -> u64 {
        self.profiler_failures.load(Ordering::Relaxed)
    }

    pub fn render_table(&self) -> String {
        let left_col = 26usize;
        let col_w = 12usize;

        let mut out = String::new();

        writeln!(
            out,
            "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
            "metric",
            "current",
            "average",
            "max",
            "min",
            left = left_col,
            col = col_w
        )
        .ok();

        writeln!(out, "{}", "-".repeat(left_col + 3 + (col_w + 3) * 4)).ok();

        let rows = [
            ("processes sampled", self.processes_sampled.snapshot(), 0usize),
            ("tick duration (s)", self.tick_duration_seconds.snapshot(), 3),
            ("profiler run (s)", self.profiler_run_seconds.snapshot(), 3),
        ];
        for (label, s, precision) in rows {
            writeln!(
                out,
                "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
                label,
                format!("{:.p$}", s.current, p = precision),
                format!("{:.p$}", s.average, p = precision.max(1)),
                format!("{:.p$}", s.max, p = precision),
                format!("{:.p$}", s.min, p = precision),
                left = left_col,
                col = col_w
            )
            .ok();
        }

        writeln!(out).ok();
        writeln!(out, "number of done ticks: {}", self.total_ticks()).ok();
        writeln!(
            out,
            "profiler runs: {} ok, {} failed",
            self.profiler_successes(),
            self.profiler_failures()
        )
        .ok();

        out
    }
}
