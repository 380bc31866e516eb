//! Child process execution for the inference program
//!
//! A non-zero exit code is a normal [`InvocationResult`] for the caller to
//! inspect. Only failing to start the process, hitting the timeout, or being
//! cancelled is a [`LaunchError`]. There is no retry at this level.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use yue_common::config::InferenceConfig;

/// The inference program could not be run to completion
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Executable missing, not executable, or bad working directory
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Collecting the child's output failed
    #[error("failed waiting for inference process: {0}")]
    Wait(#[source] std::io::Error),

    /// Wall-clock bound exceeded; the child was killed
    #[error("inference timed out after {}s", .0.as_secs())]
    TimedOut(Duration),

    /// Cancelled by the caller; the child was killed
    #[error("inference cancelled")]
    Cancelled,
}

/// Outcome of one completed child process
#[derive(Debug, Clone)]
pub struct InvocationResult {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl InvocationResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Launches the configured inference program
#[derive(Debug, Clone)]
pub struct InvocationRunner {
    program: PathBuf,
    leading_args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl InvocationRunner {
    pub fn new(program: impl Into<PathBuf>, leading_args: Vec<String>, working_dir: Option<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args,
            working_dir,
        }
    }

    pub fn from_config(config: &InferenceConfig) -> Self {
        Self::new(
            config.program.clone(),
            config.program_args.clone(),
            config.working_dir.clone(),
        )
    }

    /// Full command line as a single shell-quoted string, for diagnostics
    pub fn command_line(&self, args: &[String]) -> String {
        std::iter::once(self.program.to_string_lossy().into_owned())
            .chain(self.leading_args.iter().cloned())
            .chain(args.iter().cloned())
            .map(|arg| shell_quote(&arg))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run the program with `args`, capturing stdout and stderr in full
    ///
    /// The child is killed if `timeout` elapses or `cancel` fires.
    pub async fn run(
        &self,
        args: &[String],
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<InvocationResult, LaunchError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.leading_args)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let started = Instant::now();
        let child = command.spawn().map_err(|source| LaunchError::Spawn {
            program: self.program.display().to_string(),
            source,
        })?;
        tracing::debug!(pid = child.id(), "Inference process started");

        // Dropping the pending wait drops the child, which kills it
        let output = tokio::select! {
            result = child.wait_with_output() => result.map_err(LaunchError::Wait)?,
            _ = deadline(timeout) => {
                return Err(LaunchError::TimedOut(timeout.unwrap_or_default()));
            }
            _ = cancel.cancelled() => return Err(LaunchError::Cancelled),
        };

        Ok(InvocationResult {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration: started.elapsed(),
        })
    }
}

async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending::<()>().await,
    }
}

/// Quote an argument so the rendered command line can be pasted into a shell
fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=,+@%".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
