//! Subprocess runner shared by the fetch step and the analyzer adapters
//!
//! Every external step follows the same pattern:
//! 1. Expand the configured command template
//! 2. Run it as a subprocess with its own time budget
//! 3. Hand stdout/stderr back for parsing
//!
//! stdout and stderr are drained on helper threads so a chatty tool can't
//! block on a full pipe while we poll for exit.
//!
//! On unix each tool leads its own process group. When the tool exits or
//! times out the whole group is killed, so nothing it started (test
//! binaries, `sh -c` children, git under `go get`) outlives the step.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::{PipelineError, PipelineResult};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Result from running an external tool
#[derive(Debug, Clone)]
pub struct ExternalToolResult {
    /// Whether the tool ran to completion (exit status may still be non-zero)
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    /// Process exit code
    pub return_code: Option<i32>,
    pub timed_out: bool,
    /// Error message if the tool could not be run
    pub error: Option<String>,
}

impl ExternalToolResult {
    pub fn success(stdout: String, stderr: String, return_code: i32) -> Self {
        Self {
            success: true,
            stdout,
            stderr,
            return_code: Some(return_code),
            timed_out: false,
            error: None,
        }
    }

    pub fn failure(error: String) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: String::new(),
            return_code: None,
            timed_out: false,
            error: Some(error),
        }
    }

    pub fn timeout(tool_name: &str, timeout_secs: u64) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: String::new(),
            return_code: None,
            timed_out: true,
            error: Some(format!("{} timed out after {}s", tool_name, timeout_secs)),
        }
    }

    /// Completed with exit status 0
    pub fn exit_ok(&self) -> bool {
        self.success && self.return_code == Some(0)
    }

    /// Short failure description for error events: stderr if the tool wrote
    /// any, otherwise the exit status.
    pub fn failure_text(&self) -> String {
        if let Some(error) = &self.error {
            return error.clone();
        }
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        match self.return_code {
            Some(code) => format!("exit status {}", code),
            None => "terminated by signal".to_string(),
        }
    }

    /// Turn launch failures and timeouts into pipeline errors.
    ///
    /// A completed run is returned as-is whatever its exit status; callers
    /// decide whether a non-zero exit means failure.
    pub fn into_result(self, tool_name: &str, timeout_secs: u64) -> PipelineResult<Self> {
        if self.timed_out {
            return Err(PipelineError::Timeout {
                step: tool_name.to_string(),
                secs: timeout_secs,
            });
        }
        if !self.success {
            return Err(PipelineError::tool(tool_name, self.failure_text()));
        }
        Ok(self)
    }
}

/// Substitute `{name}` placeholders in every argument of a command template.
pub fn expand_command(template: &[String], vars: &[(&str, &str)]) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            vars.iter().fold(arg.clone(), |acc, (name, value)| {
                acc.replace(&format!("{{{}}}", name), value)
            })
        })
        .collect()
}

/// Run an external tool with standard error handling
///
/// # Arguments
/// * `cmd` - Command and arguments to run
/// * `tool_name` - Human-readable tool name for error messages
/// * `timeout_secs` - Timeout in seconds (0 = no timeout)
/// * `cwd` - Working directory for the tool
/// * `env` - Additional environment variables
pub fn run_external_tool(
    cmd: &[String],
    tool_name: &str,
    timeout_secs: u64,
    cwd: Option<&Path>,
    env: Option<&HashMap<String, String>>,
) -> ExternalToolResult {
    let Some((program, args)) = cmd.split_first() else {
        return ExternalToolResult::failure("Empty command".to_string());
    };

    debug!("Running {}: {} {:?}", tool_name, program, args);

    let mut command = Command::new(program);
    command.args(args);

    if let Some(dir) = cwd {
        command.current_dir(dir);
    }
    if let Some(extra_env) = env {
        for (key, value) in extra_env {
            command.env(key, value);
        }
    }

    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            if e.kind() == std::io::ErrorKind::NotFound {
                return ExternalToolResult::failure(format!(
                    "{} not found. Please install it first.",
                    program
                ));
            }
            return ExternalToolResult::failure(format!("Failed to run {}: {}", tool_name, e));
        }
    };

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    wait_for(child, stdout, stderr, tool_name, timeout_secs)
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// Poll for completion, killing the process once the budget is spent.
fn wait_for(
    mut child: Child,
    stdout: JoinHandle<String>,
    stderr: JoinHandle<String>,
    tool_name: &str,
    timeout_secs: u64,
) -> ExternalToolResult {
    let start = Instant::now();
    let timeout = Duration::from_secs(timeout_secs);

    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                // Stragglers would keep the pipes open
                kill_group(&child);
                let stdout = stdout.join().unwrap_or_default();
                let stderr = stderr.join().unwrap_or_default();
                return ExternalToolResult::success(stdout, stderr, status.code().unwrap_or(-1));
            }
            Ok(None) => {
                if timeout_secs > 0 && start.elapsed() > timeout {
                    kill_group(&child);
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = stdout.join();
                    let _ = stderr.join();
                    warn!("{} timed out after {}s", tool_name, timeout_secs);
                    return ExternalToolResult::timeout(tool_name, timeout_secs);
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                return ExternalToolResult::failure(format!(
                    "Failed to wait for {}: {}",
                    tool_name, e
                ));
            }
        }
    }
}

/// SIGKILL every process in the child's group.
#[cfg(unix)]
fn kill_group(child: &Child) {
    let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
        return;
    };
    // SAFETY: killpg has no memory effects. The group id is our child's
    // pid, which stays reserved while the group has members or the child
    // is unreaped.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        debug!("killpg({}): {}", pgid, std::io::Error::last_os_error());
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) {}
