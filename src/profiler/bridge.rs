//! Launches the external hardware profiler and hands back its report file.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, TelemetryError};

/// Wait between tool exit and reading the report; the tool flushes late.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// The two kinds of profiler runs. They share the tool and are serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricClass {
    /// One-time static processor description.
    Topology,
    /// Recurring cache miss and hit rates.
    CacheMetrics,
}

impl MetricClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricClass::Topology => "topology",
            MetricClass::CacheMetrics => "cache_metrics",
        }
    }

    fn file_prefix(&self) -> &'static str {
        match self {
            MetricClass::Topology => "processor_info",
            MetricClass::CacheMetrics => "cache_metrics",
        }
    }

    fn metric_groups(&self) -> &'static str {
        match self {
            MetricClass::Topology => "dc",
            MetricClass::CacheMetrics => "dc,cache_miss,l1,l2",
        }
    }

    /// Argument list for one run writing its report to `output`.
    pub fn args(&self, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = [
            "-m",
            self.metric_groups(),
            "-a",
            "-A",
            "system",
            "-d",
            "1",
            "-o",
        ]
        .iter()
        .map(OsString::from)
        .collect();
        args.push(output.as_os_str().to_owned());
        args
    }
}

impl fmt::Display for MetricClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of the most recent invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Idle,
    Launching,
    Running,
    Succeeded,
    TimedOut,
    Failed,
}

/// Report file of a successful run. The file is removed when this is dropped.
#[derive(Debug)]
pub struct ProfilerOutput {
    path: PathBuf,
}

impl ProfilerOutput {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read_lines(&self) -> Result<Vec<String>> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        Ok(content.lines().map(str::to_owned).collect())
    }
}

impl Drop for ProfilerOutput {
    fn drop(&mut self) {
        remove_report(&self.path);
    }
}

fn remove_report(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed profiler report {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove profiler report {}: {}", path.display(), e),
    }
}

/// Whether the current process runs with elevated privileges.
pub fn has_elevated_privileges() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

/// Wrapper around the external profiler executable.
///
/// Preconditions (privileges, executable present) are checked before every
/// run. A failed precondition disables the bridge for the rest of the
/// session; later calls fail fast with the same reason.
pub struct ExternalProfilerBridge {
    executable: PathBuf,
    output_dir: PathBuf,
    settle_delay: Duration,
    privilege_check: fn() -> bool,
    disabled: Mutex<Option<String>>,
    state: Mutex<BridgeState>,
    invoke_lock: tokio::sync::Mutex<()>,
}

impl ExternalProfilerBridge {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            output_dir: std::env::temp_dir(),
            settle_delay: DEFAULT_SETTLE_DELAY,
            privilege_check: has_elevated_privileges,
            disabled: Mutex::new(None),
            state: Mutex::new(BridgeState::Idle),
            invoke_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Replaces the privilege test, e.g. to run an unprivileged stand-in tool.
    pub fn with_privilege_check(mut self, check: fn() -> bool) -> Self {
        self.privilege_check = check;
        self
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn state(&self) -> BridgeState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: BridgeState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Reason the bridge was permanently disabled, if it was.
    pub fn disabled_reason(&self) -> Option<String> {
        self.disabled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Checks the preconditions without launching anything.
    pub fn check_available(&self) -> Result<()> {
        let mut disabled = self.disabled.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(reason) = disabled.as_ref() {
            return Err(TelemetryError::ExternalToolUnavailable(reason.clone()));
        }

        let reason = if !self.executable.is_file() {
            Some(format!(
                "profiler executable not found at {}",
                self.executable.display()
            ))
        } else if !(self.privilege_check)() {
            Some("Run as Admin".to_string())
        } else {
            None
        };

        match reason {
            Some(reason) => {
                warn!("Disabling profiler metrics: {}", reason);
                *disabled = Some(reason.clone());
                Err(TelemetryError::ExternalToolUnavailable(reason))
            }
            None => Ok(()),
        }
    }

    /// Runs the tool for `class` and waits for its report, at most `timeout`.
    ///
    /// Invocations are serialized; a second caller waits for the first to
    /// finish. On timeout the child is killed.
    #[instrument(skip(self), fields(tool = %self.executable.display()))]
    pub async fn invoke(&self, class: MetricClass, timeout: Duration) -> Result<ProfilerOutput> {
        self.check_available()?;

        let _serial = self.invoke_lock.lock().await;
        self.set_state(BridgeState::Launching);

        let output = self.output_dir.join(format!(
            "{}_{:016x}.csv",
            class.file_prefix(),
            rand::random::<u64>()
        ));

        let mut child = match Command::new(&self.executable)
            .args(class.args(&output))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                self.set_state(BridgeState::Failed);
                return Err(TelemetryError::ExternalToolFailure {
                    reason: format!("failed to launch: {}", e),
                    stderr: String::new(),
                });
            }
        };
        self.set_state(BridgeState::Running);
        debug!("Launched profiler for {} (pid {:?})", class, child.id());

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                stdout.abort();
                stderr.abort();
                self.set_state(BridgeState::Failed);
                remove_report(&output);
                return Err(TelemetryError::ExternalToolFailure {
                    reason: format!("failed to wait for profiler: {}", e),
                    stderr: String::new(),
                });
            }
            Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill timed out profiler: {}", e);
                }
                stdout.abort();
                stderr.abort();
                self.set_state(BridgeState::TimedOut);
                remove_report(&output);
                return Err(TelemetryError::ExternalToolTimeout(timeout));
            }
        };

        let stderr = stderr.await.unwrap_or_default();
        let _ = stdout.await;

        if !status.success() {
            self.set_state(BridgeState::Failed);
            remove_report(&output);
            return Err(TelemetryError::ExternalToolFailure {
                reason: format!("profiler exited with {}", status),
                stderr,
            });
        }

        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }

        if !output.is_file() {
            self.set_state(BridgeState::Failed);
            return Err(TelemetryError::ExternalToolFailure {
                reason: format!("profiler wrote no report to {}", output.display()),
                stderr,
            });
        }

        self.set_state(BridgeState::Succeeded);
        info!("Profiler {} run completed", class);
        Ok(ProfilerOutput { path: output })
    }
}

impl fmt::Debug for ExternalProfilerBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalProfilerBridge")
            .field("executable", &self.executable)
            .field("output_dir", &self.output_dir)
            .field("state", &self.state())
            .field("disabled", &self.disabled_reason())
            .finish()
    }
}

/// Reads a child pipe to completion in the background.
fn drain<R>(pipe: Option<R>) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            if let Err(e) = pipe.read_to_end(&mut buf).await {
                debug!("Error reading profiler pipe: {}", e);
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_templates() {
        let out = Path::new("/tmp/report.csv");
        let args: Vec<String> = MetricClass::CacheMetrics
            .args(out)
            .into_iter()
            .map(|a| a.into_string().unwrap())
            .collect();
        assert_eq!(
            args.join(" "),
            "-m dc,cache_miss,l1,l2 -a -A system -d 1 -o /tmp/report.csv"
        );

        let args: Vec<String> = MetricClass::Topology
            .args(out)
            .into_iter()
            .map(|a| a.into_string().unwrap())
            .collect();
        assert_eq!(args.join(" "), "-m dc -a -A system -d 1 -o /tmp/report.csv");
    }

    #[test]
    fn test_missing_executable_disables_permanently() {
        let bridge = ExternalProfilerBridge::new("/nonexistent/profiler-tool");
        assert!(matches!(
            bridge.check_available(),
            Err(TelemetryError::ExternalToolUnavailable(_))
        ));
        assert!(bridge.disabled_reason().unwrap().contains("not found"));
        assert_eq!(bridge.state(), BridgeState::Idle);
    }

    #[test]
    fn test_privilege_failure_is_sticky() {
        let dir = tempfile::TempDir::new().unwrap();
        let tool = dir.path().join("tool");
        std::fs::write(&tool, "").unwrap();

        let bridge = ExternalProfilerBridge::new(&tool).with_privilege_check(|| false);
        assert!(bridge.check_available().is_err());
        assert_eq!(bridge.disabled_reason().as_deref(), Some("Run as Admin"));

        // Still disabled even though nothing about the tool changed.
        let err = bridge.check_available().unwrap_err();
        assert!(err.is_permanent());
    }

    #[test]
    fn test_output_removed_on_drop() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("report.csv");
        std::fs::write(&path, "x").unwrap();
        drop(ProfilerOutput { path: path.clone() });
        assert!(!path.exists());
    }
}
