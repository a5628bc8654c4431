//! External tool invocation
//!
//! Every external binary the crate drives (rkdeveloptool, xz, kpartx, mount)
//! goes through the narrow [`ToolRunner`] seam: (command, args, timeout) in,
//! (stdout, stderr, exit code) out. Call sites never touch
//! `tokio::process::Command` directly, so tests and demo mode can substitute
//! a scripted runner.

use std::future::Future;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

/// Tool invocation errors
#[derive(Error, Debug, Clone)]
pub enum ToolError {
    /// The binary could not be started
    #[error("'{tool}' could not be started: {error}")]
    Spawn { tool: String, error: String },

    /// The invocation exceeded its timeout and was killed
    #[error("'{tool}' timed out after {timeout:?}")]
    TimedOut { tool: String, timeout: Duration },
}

/// Captured output of one tool invocation
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
    /// Exit code; `None` if the process died to a signal
    pub code: Option<i32>,
}

impl ToolOutput {
    /// A zero exit code
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Stdout and stderr joined, for error messages
    pub fn combined(&self) -> String {
        let mut s = self.stdout.trim_end().to_string();
        if !self.stderr.trim().is_empty() {
            if !s.is_empty() {
                s.push('\n');
            }
            s.push_str(self.stderr.trim_end());
        }
        s
    }

    /// Convenience constructor for scripted runners
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            code: Some(0),
        }
    }

    /// Convenience constructor for scripted failures
    pub fn err(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            code: Some(code),
        }
    }
}

/// Subprocess seam for external tools
pub trait ToolRunner: Send + Sync + 'static {
    /// Run `tool` with `args`, killing it if `timeout` elapses.
    fn run(
        &self,
        tool: &str,
        args: &[&str],
        timeout: Duration,
    ) -> impl Future<Output = Result<ToolOutput, ToolError>> + Send;
}

/// Runner that executes real processes
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ToolRunner for SystemRunner {
    async fn run(
        &self,
        tool: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<ToolOutput, ToolError> {
        tracing::debug!("running {} {}", tool, args.join(" "));

        let child = Command::new(tool)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::Spawn {
                tool: tool.to_string(),
                error: e.to_string(),
            })?;

        // Dropping the wait future on timeout kills the child (kill_on_drop).
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| ToolError::TimedOut {
                tool: tool.to_string(),
                timeout,
            })?
            .map_err(|e| ToolError::Spawn {
                tool: tool.to_string(),
                error: e.to_string(),
            })?;

        Ok(ToolOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            code: output.status.code(),
        })
    }
}

/// Scripted runner backing the offline demo mode
///
/// Emulates a single RK3588 board attached in maskrom mode: `ld` reports it,
/// `db` moves it to loader mode, `cs`/`rfi` expose eMMC and SD (but no
/// SPI-NOR), and `wl`/`rd` succeed without touching hardware. Non-flashing
/// tools succeed with empty output.
#[derive(Debug, Default)]
pub struct DemoRunner {
    state: Mutex<DemoState>,
}

#[derive(Debug, Default)]
struct DemoState {
    loader_pushed: bool,
    active_storage: u8,
}

impl DemoRunner {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ToolRunner for DemoRunner {
    async fn run(
        &self,
        tool: &str,
        args: &[&str],
        _timeout: Duration,
    ) -> Result<ToolOutput, ToolError> {
        tracing::debug!("demo run {} {}", tool, args.join(" "));

        if !tool.contains("rkdeveloptool") {
            return Ok(ToolOutput::ok(""));
        }

        let mut state = self.state.lock().expect("demo state poisoned");
        let verb = args.first().copied().unwrap_or("");
        let output = match verb {
            "ld" => {
                let mode = if state.loader_pushed { "Loader" } else { "Maskrom" };
                ToolOutput::ok(format!(
                    "DevNo=1\tVid=0x2207,Pid=0x350b,LocationID=101\t{mode}"
                ))
            }
            "db" => {
                state.loader_pushed = true;
                ToolOutput::ok("Downloading bootloader succeeded.")
            }
            "cs" => {
                state.active_storage = args
                    .get(1)
                    .and_then(|c| c.parse().ok())
                    .unwrap_or_default();
                ToolOutput::ok("Change Storage OK.")
            }
            "rfi" => match state.active_storage {
                1 => ToolOutput::ok(
                    "Flash Info:\n\tManufacturer: SAMSUNG\n\tFlash Size: 14.6 GB\n\tBlock Size: 512 KB",
                ),
                2 => ToolOutput::ok(
                    "Flash Info:\n\tManufacturer: UNKNOWN\n\tFlash Size: 29.1 GB\n\tBlock Size: 512 KB",
                ),
                _ => ToolOutput::err(1, "Read Flash Info quit, creating comm object failed!"),
            },
            "wl" => ToolOutput::ok("Write LBA from file (100%)"),
            "rd" => ToolOutput::ok("Reset Device OK."),
            _ => ToolOutput::ok(""),
        };
        Ok(output)
    }
}
