//! Checker runner: launches the external type checker for one invocation.
//!
//! The harness only depends on the checker's exit status and its text
//! output. Each run happens in the fixture directory, with stdin closed and
//! both output streams captured. On unix the child gets its own process
//! group so an interactive Ctrl-C reaches the harness only; the harness then
//! tears the whole group down itself, grandchildren included, whenever a run
//! ends: on timeout, on shutdown (the run future is dropped) and after a
//! normal exit.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::{Duration, Instant};
use suite::CommandSpec;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time::timeout_at;
use tracing::{debug, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    /// The checker binary could not be started
    #[error("Failed to launch '{program}': {reason}")]
    Launch { program: String, reason: String },

    /// The checker exceeded its wall clock budget and was killed
    #[error("Checker timed out after {}s", .timeout.as_secs_f64())]
    Timeout { timeout: Duration },

    /// Waiting on or reading from the running checker failed
    #[error("IO error while running checker: {reason}")]
    Io { reason: String },
}

pub type RunResult<T> = Result<T, RunError>;

/// Captured result of a completed checker process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutput {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl RunOutput {
    pub fn new(exit_code: Option<i32>, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    /// Combined diagnostic text: stdout, then stderr
    pub fn diagnostics(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => {
                let mut text = self.stdout.clone();
                if !text.ends_with('\n') {
                    text.push('\n');
                }
                text.push_str(&self.stderr);
                text
            }
        }
    }
}

/// Anything able to execute a materialized checker command
#[async_trait]
pub trait Checker: Send + Sync {
    async fn check(&self, command: &CommandSpec) -> RunResult<RunOutput>;

    fn name(&self) -> &str;
}

/// Runs the checker as a real subprocess
#[derive(Debug, Clone, Default)]
pub struct ProcessChecker;

impl ProcessChecker {
    pub fn new() -> Self {
        Self
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> std::io::Result<String> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Kills every process left in a checker's process group when dropped
#[derive(Debug)]
struct ProcessGroup {
    #[cfg_attr(not(unix), allow(dead_code))]
    pgid: Option<i32>,
}

impl ProcessGroup {
    /// The child leads its own group, so its pid is the group id
    fn of(child: &tokio::process::Child) -> Self {
        Self {
            pgid: child.id().and_then(|pid| i32::try_from(pid).ok()),
        }
    }

    #[cfg(unix)]
    fn kill(&mut self) {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Some(pgid) = self.pgid.take() {
            match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
                Ok(()) => debug!("Killed process group {}", pgid),
                Err(Errno::ESRCH) => {}
                Err(e) => warn!("Failed to kill process group {}: {}", pgid, e),
            }
        }
    }

    #[cfg(not(unix))]
    fn kill(&mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

fn build_command(spec: &CommandSpec) -> Command {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(&spec.env)
        .current_dir(&spec.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    cmd.process_group(0);

    cmd
}

#[async_trait]
impl Checker for ProcessChecker {
    async fn check(&self, spec: &CommandSpec) -> RunResult<RunOutput> {
        debug!(
            "Running `{}` in {}",
            spec.display_line(),
            spec.working_dir.display()
        );

        let start = Instant::now();
        let deadline = tokio::time::Instant::now() + spec.timeout;

        let mut child = build_command(spec).spawn().map_err(|e| RunError::Launch {
            program: spec.program.clone(),
            reason: e.to_string(),
        })?;
        let mut group = ProcessGroup::of(&child);

        let stdout = tokio::spawn(read_pipe(child.stdout.take()));
        let stderr = tokio::spawn(read_pipe(child.stderr.take()));

        let status = match timeout_at(deadline, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                stdout.abort();
                stderr.abort();
                return Err(RunError::Io {
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                warn!(
                    "Checker exceeded {:?} in {}, killing it",
                    spec.timeout,
                    spec.working_dir.display()
                );
                group.kill();
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill timed out checker: {}", e);
                }
                stdout.abort();
                stderr.abort();
                return Err(RunError::Timeout {
                    timeout: spec.timeout,
                });
            }
        };

        // A grandchild may inherit the pipes and keep them open past the
        // checker's exit; the same deadline bounds the reads.
        let (stdout, stderr) = match timeout_at(deadline, async { tokio::join!(stdout, stderr) }).await
        {
            Ok((Ok(Ok(stdout)), Ok(Ok(stderr)))) => (stdout, stderr),
            Ok((out, err)) => {
                let reason = [out, err]
                    .into_iter()
                    .find_map(|r| match r {
                        Ok(Ok(_)) => None,
                        Ok(Err(e)) => Some(e.to_string()),
                        Err(e) => Some(e.to_string()),
                    })
                    .unwrap_or_else(|| "output capture failed".to_string());
                return Err(RunError::Io { reason });
            }
            Err(_) => {
                warn!(
                    "Checker in {} exited but its output stayed open past {:?}, killing its process group",
                    spec.working_dir.display(),
                    spec.timeout
                );
                group.kill();
                return Err(RunError::Timeout {
                    timeout: spec.timeout,
                });
            }
        };

        Ok(RunOutput {
            exit_code: status.code(),
            stdout,
            stderr,
            elapsed: start.elapsed(),
        })
    }

    fn name(&self) -> &str {
        "process"
    }
}
