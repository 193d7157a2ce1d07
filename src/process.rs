//! External process execution.
//!
//! Every shell-out in the pipeline goes through [`CommandRunner`]. A command
//! that cannot be started, or that outlives its timeout, is reported as a
//! regular [`ProcessOutput`] with [`NOT_STARTED_EXIT_CODE`] and the cause in
//! `stderr`, so callers handle it exactly like a non-zero exit.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::CommandSpec;

/// Exit code reported when the process never ran to completion.
pub const NOT_STARTED_EXIT_CODE: i32 = -1;

/// Captured result of one external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Result for a command that could not be started or was cut short.
    #[must_use]
    pub fn not_started(reason: impl Into<String>) -> Self {
        Self {
            exit_code: NOT_STARTED_EXIT_CODE,
            stdout: String::new(),
            stderr: reason.into(),
        }
    }
}

/// Runs external commands on behalf of the pipeline.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` in `working_dir`, capturing both streams fully.
    async fn run(&self, command: &CommandSpec, working_dir: &Path) -> ProcessOutput;
}

#[async_trait]
impl<T: CommandRunner + ?Sized> CommandRunner for Arc<T> {
    async fn run(&self, command: &CommandSpec, working_dir: &Path) -> ProcessOutput {
        (**self).run(command, working_dir).await
    }
}

/// [`CommandRunner`] backed by real child processes.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, command: &CommandSpec, working_dir: &Path) -> ProcessOutput {
        let start = Instant::now();
        debug!(
            command = %command.display(),
            dir = %working_dir.display(),
            "Running command"
        );

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the future on timeout or shutdown must not leave the
            // child running.
            .kill_on_drop(true);

        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => {
                let exit_code = output.status.code().unwrap_or(NOT_STARTED_EXIT_CODE);
                debug!(
                    command = %command.program,
                    exit_code,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Command finished"
                );
                ProcessOutput {
                    exit_code,
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                }
            }
            Ok(Err(e)) => {
                warn!(command = %command.program, error = %e, "Failed to start command");
                ProcessOutput::not_started(format!(
                    "Failed to start '{}': {e}",
                    command.display()
                ))
            }
            Err(_elapsed) => {
                warn!(
                    command = %command.program,
                    timeout_secs = self.timeout.as_secs(),
                    "Command timed out and was killed"
                );
                ProcessOutput::not_started(format!(
                    "'{}' timed out after {}s",
                    command.display(),
                    self.timeout.as_secs()
                ))
            }
        }
    }
}
