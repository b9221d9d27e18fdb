// src/errors.rs

//! Crate-wide error types and helpers.

use std::any::Any;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// Malformed input to a kill request (negative or out-of-range pid).
    #[error("Invalid process ID: {0} (expected a non-negative 32-bit integer)")]
    InvalidPid(i64),

    #[error(transparent)]
    Subprocess(#[from] SubprocessError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, EngineError>;

/// A subprocess could not be spawned, or never reported success.
///
/// Carries enough context (command line, working directory and the merged
/// output of every attempt) that callers never need to look at raw OS codes.
#[derive(Error, Debug, Clone)]
#[error("{message} (command: `{command}`)")]
pub struct SubprocessError {
    pub message: String,
    pub command: String,
    pub working_dir: PathBuf,
    pub logs: String,
}

impl SubprocessError {
    pub fn new(
        message: impl Into<String>,
        command: impl Into<String>,
        working_dir: impl Into<PathBuf>,
        logs: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            command: command.into(),
            working_dir: working_dir.into(),
            logs: logs.into(),
        }
    }

    /// Multi-line report including the accumulated subprocess logs.
    pub fn detailed_message(&self) -> String {
        format!(
            "Command: {}\nWorkingDirectory: {}\nSubprocess Logs:\n\n{}",
            self.command,
            self.working_dir.display(),
            self.logs
        )
    }
}

/// A pipeline step failed; rollbacks have already run.
#[derive(Error)]
#[error("{message}: {source}")]
pub struct PipelineError {
    pub message: String,
    pub pipeline: String,
    pub step: String,
    #[source]
    pub source: anyhow::Error,
    pub(crate) restored: Option<Arc<dyn Any + Send + Sync>>,
}

impl PipelineError {
    pub(crate) fn new(
        message: impl Into<String>,
        pipeline: impl Into<String>,
        step: impl Into<String>,
        source: anyhow::Error,
        restored: Option<Arc<dyn Any + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            pipeline: pipeline.into(),
            step: step.into(),
            source,
            restored,
        }
    }

    /// The context as it was right before the failing step started.
    ///
    /// `C` is the context type the failing step received. Returns `None` when
    /// the type does not match or no step had started.
    pub fn restored_context<C: Any + Send + Sync>(&self) -> Option<Arc<C>> {
        self.restored
            .as_ref()
            .and_then(|snapshot| Arc::clone(snapshot).downcast::<C>().ok())
    }

    /// Walk down nested pipeline failures to the innermost step failure.
    pub fn root_step(&self) -> &str {
        match self.source.downcast_ref::<EngineError>() {
            Some(EngineError::Pipeline(inner)) => inner.root_step(),
            _ => match self.source.downcast_ref::<PipelineError>() {
                Some(inner) => inner.root_step(),
                None => &self.step,
            },
        }
    }
}

impl fmt::Debug for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineError")
            .field("message", &self.message)
            .field("pipeline", &self.pipeline)
            .field("step", &self.step)
            .field("source", &self.source)
            .field("restored", &self.restored.is_some())
            .finish()
    }
}

impl EngineError {
    /// Full human-readable report: the top-level message followed by
    /// subprocess diagnostics when a subprocess failure is in the chain.
    pub fn report(&self) -> String {
        let mut out = self.to_string();
        let mut current: Option<&(dyn std::error::Error + 'static)> = Some(self);
        while let Some(err) = current {
            if let Some(detail) = subprocess_detail(err) {
                out.push_str("\n\n");
                out.push_str(&detail);
                break;
            }
            current = err.source();
        }
        out
    }
}

fn subprocess_detail(err: &(dyn std::error::Error + 'static)) -> Option<String> {
    if let Some(sub) = err.downcast_ref::<SubprocessError>() {
        return Some(sub.detailed_message());
    }
    match err.downcast_ref::<EngineError>() {
        Some(EngineError::Subprocess(sub)) => Some(sub.detailed_message()),
        _ => None,
    }
}
