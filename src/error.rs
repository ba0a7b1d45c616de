//! Error taxonomy for the telemetry core.
//!
//! None of these errors is fatal to the collector. The scheduler maps each
//! variant to a degradation policy: keep the previous value, skip the
//! process, or mark profiler-based metrics as disabled.

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TelemetryError>;

#[derive(Error, Debug)]
pub enum TelemetryError {
    /// A system-wide counter could not be read for this tick.
    #[error("Failed to sample {counter}: {reason}")]
    TransientSample {
        counter: &'static str,
        reason: String,
    },

    /// The process exited between enumeration and reading its counters.
    #[error("Process {pid} vanished while reading its counters")]
    ProcessRace { pid: u32 },

    /// Missing privileges or executable. Permanent for the session.
    #[error("External profiler unavailable: {0}")]
    ExternalToolUnavailable(String),

    #[error("External profiler timed out after {0:?}")]
    ExternalToolTimeout(Duration),

    #[error("External profiler failed: {reason}")]
    ExternalToolFailure { reason: String, stderr: String },

    #[error("Failed to parse profiler output: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TelemetryError {
    pub(crate) fn sample(counter: &'static str, reason: impl std::fmt::Display) -> Self {
        TelemetryError::TransientSample {
            counter,
            reason: reason.to_string(),
        }
    }

    /// Whether the error disables the failing metric class for the rest of the session.
    pub fn is_permanent(&self) -> bool {
        matches!(self, TelemetryError::ExternalToolUnavailable(_))
    }
}
