// src/exec/options.rs

//! Inputs and outputs of a single `execute` call.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::types::LogLayout;

/// Invoked once per output line with the 0-based attempt index.
pub type LineCallback = Arc<dyn Fn(&str, u32) + Send + Sync>;
/// Decides whether a finished attempt counts as success.
pub type SuccessPredicate = Arc<dyn Fn(&ExecuteOutput) -> bool + Send + Sync>;
/// Invoked after every unsuccessful attempt with the number of attempts
/// made so far (1 after the first).
pub type RetryCallback = Arc<dyn Fn(u32, &ExecuteOutput) + Send + Sync>;

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Result of a successful run. In background mode only `pid` is meaningful.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecuteOutput {
    /// Captured stdout, trimmed.
    pub stdout: String,
    /// Captured stderr, trimmed.
    pub stderr: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub pid: Option<u32>,
}

impl ExecuteOutput {
    pub fn exited_ok(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// What the child sees on stdin.
#[derive(Debug, Clone, Default)]
pub enum Stdin {
    #[default]
    Null,
    Inherit,
    /// Written in full, then the pipe is closed.
    Bytes(Arc<[u8]>),
}

/// Everything `execute` needs to spawn and supervise one command.
///
/// Built with chained setters:
///
/// ```ignore
/// let opts = ExecuteOptions::new(["git", "status"])
///     .working_dir("/repo")
///     .retries(2)
///     .retry_delay(Duration::from_millis(500));
/// ```
#[derive(Clone)]
pub struct ExecuteOptions {
    pub command: Vec<String>,
    pub working_dir: PathBuf,
    /// Overrides on top of the inherited environment; `None` removes a variable.
    pub env: BTreeMap<String, Option<String>>,
    pub retries: u32,
    pub retry_delay: Duration,
    pub is_success: Option<SuccessPredicate>,
    pub on_stdout_line: Option<LineCallback>,
    pub on_stderr_line: Option<LineCallback>,
    pub retry_callback: Option<RetryCallback>,
    pub stdin: Stdin,
    pub background: bool,
    pub background_description: Option<String>,
    pub error_message: Option<String>,
    pub log_layout: LogLayout,
}

impl ExecuteOptions {
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            working_dir: PathBuf::from("."),
            env: BTreeMap::new(),
            retries: 0,
            retry_delay: DEFAULT_RETRY_DELAY,
            is_success: None,
            on_stdout_line: None,
            on_stderr_line: None,
            retry_callback: None,
            stdin: Stdin::Null,
            background: false,
            background_description: None,
            error_message: None,
            log_layout: LogLayout::Interleaved,
        }
    }

    /// Run `script` through the platform shell (`sh -c` / `cmd /C`).
    pub fn shell(script: impl Into<String>) -> Self {
        let script = script.into();
        if cfg!(windows) {
            Self::new(["cmd".to_string(), "/C".to_string(), script])
        } else {
            Self::new(["sh".to_string(), "-c".to_string(), script])
        }
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), Some(value.into()));
        self
    }

    pub fn env_remove(mut self, key: impl Into<String>) -> Self {
        self.env.insert(key.into(), None);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn is_success(mut self, f: impl Fn(&ExecuteOutput) -> bool + Send + Sync + 'static) -> Self {
        self.is_success = Some(Arc::new(f));
        self
    }

    pub fn on_stdout_line(mut self, f: impl Fn(&str, u32) + Send + Sync + 'static) -> Self {
        self.on_stdout_line = Some(Arc::new(f));
        self
    }

    pub fn on_stderr_line(mut self, f: impl Fn(&str, u32) + Send + Sync + 'static) -> Self {
        self.on_stderr_line = Some(Arc::new(f));
        self
    }

    pub fn retry_callback(mut self, f: impl Fn(u32, &ExecuteOutput) + Send + Sync + 'static) -> Self {
        self.retry_callback = Some(Arc::new(f));
        self
    }

    pub fn stdin(mut self, stdin: Stdin) -> Self {
        self.stdin = stdin;
        self
    }

    /// Detach: return right after spawning and track the pid for cleanup.
    pub fn background(mut self, description: Option<String>) -> Self {
        self.background = true;
        self.background_description = description;
        self
    }

    pub fn error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn log_layout(mut self, layout: LogLayout) -> Self {
        self.log_layout = layout;
        self
    }

    /// Command rendered for logs and error messages.
    pub fn command_line(&self) -> String {
        self.command
            .iter()
            .map(|arg| {
                if arg.is_empty() || arg.contains(char::is_whitespace) {
                    format!("{arg:?}")
                } else {
                    arg.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub(crate) fn succeeded(&self, output: &ExecuteOutput) -> bool {
        match &self.is_success {
            Some(pred) => pred(output),
            None => output.exited_ok(),
        }
    }
}

impl fmt::Debug for ExecuteOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecuteOptions")
            .field("command", &self.command)
            .field("working_dir", &self.working_dir)
            .field("env", &self.env)
            .field("retries", &self.retries)
            .field("retry_delay", &self.retry_delay)
            .field("custom_success", &self.is_success.is_some())
            .field("stdin", &self.stdin)
            .field("background", &self.background)
            .field("log_layout", &self.log_layout)
            .finish_non_exhaustive()
    }
}
