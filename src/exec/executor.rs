// src/exec/executor.rs

//! Retry loop and background spawning on top of single attempts.

use std::process::Stdio;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::attempt::{build_command, spawn_foreground, supervise};
use super::options::{ExecuteOptions, ExecuteOutput};
use crate::errors::SubprocessError;
use crate::process::ProcessManager;

/// Spawns commands and hands detached ones to a [`ProcessManager`].
#[derive(Debug, Clone, Default)]
pub struct Executor {
    processes: ProcessManager,
}

impl Executor {
    pub fn new(processes: ProcessManager) -> Self {
        Self { processes }
    }

    pub fn processes(&self) -> &ProcessManager {
        &self.processes
    }

    /// Run `opts.command` until it succeeds or retries are exhausted.
    ///
    /// Every attempt is a fresh process. The diagnostic log of all attempts is
    /// accumulated and attached to the error on final failure. A spawn failure
    /// is reported immediately without retrying.
    pub async fn execute(&self, opts: ExecuteOptions) -> Result<ExecuteOutput, SubprocessError> {
        if opts.background {
            return self.spawn_background(&opts);
        }

        let command_line = opts.command_line();
        let total = opts.retries.saturating_add(1);
        let mut logs = String::new();

        for attempt in 0..total {
            info!(command = %command_line, attempt, "running command");

            let child = spawn_foreground(&opts)
                .map_err(|err| failure(&opts, "Failed to start command", format!("{logs}{err}")))?;

            let outcome = supervise(child, &opts, attempt).await.map_err(|err| {
                failure(&opts, "Failed to read command output", format!("{logs}{err}"))
            })?;

            logs.push_str(&outcome.log);
            if !logs.is_empty() && !logs.ends_with('\n') {
                logs.push('\n');
            }

            if opts.succeeded(&outcome.output) {
                debug!(command = %command_line, attempt, "command succeeded");
                return Ok(outcome.output);
            }

            warn!(
                command = %command_line,
                attempt,
                exit_code = ?outcome.output.exit_code,
                remaining = total - attempt - 1,
                "command did not succeed"
            );

            if let Some(callback) = &opts.retry_callback {
                callback(attempt + 1, &outcome.output);
            }

            if attempt + 1 < total {
                sleep(opts.retry_delay).await;
            }
        }

        let attempts = if total == 1 { "attempt" } else { "attempts" };
        Err(failure(
            &opts,
            &format!("Command failed after {total} {attempts}"),
            logs,
        ))
    }

    fn spawn_background(&self, opts: &ExecuteOptions) -> Result<ExecuteOutput, SubprocessError> {
        let command_line = opts.command_line();

        let mut child = build_command(opts)
            .and_then(|mut cmd| {
                cmd.stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .kill_on_drop(false);
                cmd.spawn()
            })
            .map_err(|err| failure(opts, "Failed to start background command", err.to_string()))?;

        let Some(pid) = child.id() else {
            return Err(failure(opts, "Background command exited immediately", String::new()));
        };

        self.processes
            .register(pid, command_line.clone(), opts.background_description.clone());
        info!(pid, command = %command_line, "started background process");

        // Reap on exit so the registry never keeps a dead pid.
        let processes = self.processes.clone();
        tokio::spawn(async move {
            let status = child.wait().await;
            debug!(pid, ?status, "background process exited");
            processes.deregister(pid);
        });

        Ok(ExecuteOutput {
            pid: Some(pid),
            ..ExecuteOutput::default()
        })
    }
}

fn failure(opts: &ExecuteOptions, default_message: &str, logs: String) -> SubprocessError {
    SubprocessError::new(
        opts.error_message.as_deref().unwrap_or(default_message),
        opts.command_line(),
        opts.working_dir.clone(),
        logs,
    )
}
