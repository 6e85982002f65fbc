//! Process execution.
//!
//! Stage commands run through a [`ProcessExecutor`]. The default
//! [`ShellExecutor`] runs each command with `sh -c` in a cleared environment:
//! only the variables in the [`Invocation`] are visible to the process.
//!
//! stdout and stderr go to anonymous temp files rather than pipes, so a
//! chatty compiler never holds more than the kept tail in memory.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::consts::DEFAULT_OUTPUT_LIMIT;

/// Time a cancelled process group gets between `SIGTERM` and `SIGKILL`.
pub const KILL_GRACE: Duration = Duration::from_secs(5);

const TRUNCATED: &str = "[... truncated ...]\n";

/// A command line, its working directory and its complete environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
  pub command: String,
  pub cwd: PathBuf,
  pub env: BTreeMap<String, String>,
}

/// Exit status and captured output of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
  /// Exit code, `None` when terminated by a signal.
  pub status: Option<i32>,
  pub success: bool,
  pub stdout: String,
  pub stderr: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProcessError {
  #[error("failed to spawn '{program}': {message}")]
  Spawn { program: String, message: String },

  #[error("process cancelled")]
  Cancelled,
}

/// Runs one invocation to completion.
///
/// Implementations must stop the process and return
/// [`ProcessError::Cancelled`] once `cancel` fires.
#[async_trait]
pub trait ProcessExecutor: Send + Sync {
  async fn run(&self, invocation: &Invocation, cancel: &CancellationToken) -> Result<ProcessOutput, ProcessError>;
}

/// Executes commands through a POSIX shell.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
  shell: Option<String>,
  output_limit: usize,
  kill_grace: Duration,
}

impl Default for ShellExecutor {
  fn default() -> Self {
    Self::new(None)
  }
}

impl ShellExecutor {
  pub fn new(shell: Option<String>) -> Self {
    Self {
      shell,
      output_limit: DEFAULT_OUTPUT_LIMIT,
      kill_grace: KILL_GRACE,
    }
  }

  /// Keep at most `limit` bytes from the end of each output stream.
  pub fn with_output_limit(mut self, limit: usize) -> Self {
    self.output_limit = limit;
    self
  }

  pub fn with_kill_grace(mut self, grace: Duration) -> Self {
    self.kill_grace = grace;
    self
  }
}

#[async_trait]
impl ProcessExecutor for ShellExecutor {
  async fn run(&self, invocation: &Invocation, cancel: &CancellationToken) -> Result<ProcessOutput, ProcessError> {
    let (shell_cmd, shell_args) = get_shell(self.shell.as_deref());
    let spawn_err = |message: String| ProcessError::Spawn {
      program: shell_cmd.clone(),
      message,
    };

    let stdout = tempfile::tempfile().map_err(|e| spawn_err(e.to_string()))?;
    let stderr = tempfile::tempfile().map_err(|e| spawn_err(e.to_string()))?;
    let child_stdout = stdout.try_clone().map_err(|e| spawn_err(e.to_string()))?;
    let child_stderr = stderr.try_clone().map_err(|e| spawn_err(e.to_string()))?;

    let mut command = Command::new(&shell_cmd);
    command
      .args(&shell_args)
      .arg(&invocation.command)
      .current_dir(&invocation.cwd)
      .env_clear()
      .envs(&invocation.env)
      .stdin(Stdio::null())
      .stdout(Stdio::from(child_stdout))
      .stderr(Stdio::from(child_stderr))
      .kill_on_drop(true);

    // Own process group, so cancellation reaches the whole build tree.
    #[cfg(unix)]
    command.process_group(0);

    debug!(shell = %shell_cmd, cwd = ?invocation.cwd, "spawning process");

    let mut child = command.spawn().map_err(|e| spawn_err(e.to_string()))?;

    let finished = tokio::select! {
      status = child.wait() => Some(status),
      _ = cancel.cancelled() => None,
    };
    let Some(status) = finished else {
      self.stop(&mut child).await;
      return Err(ProcessError::Cancelled);
    };
    let status = status.map_err(|e| spawn_err(e.to_string()))?;

    Ok(ProcessOutput {
      status: status.code(),
      success: status.success(),
      stdout: read_tail(stdout, self.output_limit).await,
      stderr: read_tail(stderr, self.output_limit).await,
    })
  }
}

impl ShellExecutor {
  /// `SIGTERM` the process group, then `SIGKILL` it if it outlives the grace
  /// period.
  async fn stop(&self, child: &mut Child) {
    let Some(pid) = child.id() else {
      return;
    };
    signal_group(pid, GroupSignal::Term);
    if tokio::time::timeout(self.kill_grace, child.wait()).await.is_ok() {
      return;
    }
    warn!(pid, grace = ?self.kill_grace, "process ignored SIGTERM, killing");
    signal_group(pid, GroupSignal::Kill);
    if let Err(e) = child.kill().await {
      debug!(pid, error = %e, "kill after SIGKILL to group");
    }
  }
}

/// Last `limit` bytes of a captured output file.
async fn read_tail(file: File, limit: usize) -> String {
  let mut file = tokio::fs::File::from_std(file);
  let len = match file.metadata().await {
    Ok(meta) => meta.len(),
    Err(e) => {
      warn!(error = %e, "unreadable process output");
      return String::new();
    }
  };
  let start = len.saturating_sub(limit as u64);

  let mut bytes = Vec::new();
  let read = async {
    file.seek(SeekFrom::Start(start)).await?;
    file.read_to_end(&mut bytes).await
  };
  if let Err(e) = read.await {
    warn!(error = %e, "unreadable process output");
    return String::new();
  }

  if start == 0 {
    return String::from_utf8_lossy(&bytes).into_owned();
  }
  // Skip a partial UTF-8 sequence cut by the seek.
  let skip = bytes.iter().take(3).take_while(|b| (**b & 0xC0) == 0x80).count();
  format!("{TRUNCATED}{}", String::from_utf8_lossy(&bytes[skip..]))
}

#[derive(Debug, Clone, Copy)]
enum GroupSignal {
  Term,
  Kill,
}

#[cfg(unix)]
fn signal_group(raw: u32, signal: GroupSignal) {
  use rustix::process::{Pid, Signal, kill_process_group};

  let Some(pid) = i32::try_from(raw).ok().and_then(Pid::from_raw) else {
    return;
  };
  let signal = match signal {
    GroupSignal::Term => Signal::TERM,
    GroupSignal::Kill => Signal::KILL,
  };
  if let Err(e) = kill_process_group(pid, signal) {
    warn!(pid = raw, error = %e, "failed to signal process group");
  }
}

#[cfg(not(unix))]
fn signal_group(_pid: u32, _signal: GroupSignal) {}

/// Get the shell command and argument.
///
/// Always `/bin/sh` by default rather than `$SHELL`: interactive shells may
/// source profile files that modify the environment.
fn get_shell(override_shell: Option<&str>) -> (String, Vec<String>) {
  match override_shell {
    Some(shell) => (shell.to_string(), vec!["-c".to_string()]),
    None => ("/bin/sh".to_string(), vec!["-c".to_string()]),
  }
}

/// Keep at most `limit` bytes from the end of `text`, on a char boundary.
pub fn tail(text: &str, limit: usize) -> String {
  if text.len() <= limit || (text.starts_with(TRUNCATED) && text.len() <= limit + TRUNCATED.len()) {
    return text.to_string();
  }
  let mut start = text.len() - limit;
  while !text.is_char_boundary(start) {
    start += 1;
  }
  format!("{TRUNCATED}{}", &text[start..])
}
