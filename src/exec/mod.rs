// src/exec/mod.rs

//! Subprocess execution.
//!
//! - [`options`] holds [`ExecuteOptions`] / [`ExecuteOutput`].
//! - [`attempt`] spawns one process and fans its stdout / stderr out into
//!   capture, diagnostic-log and line-callback readers.
//! - [`executor`] owns the retry loop and background spawning; detached
//!   processes are registered with the injected
//!   [`ProcessManager`](crate::process::ProcessManager).

pub(crate) mod attempt;
pub mod executor;
pub mod options;

pub use executor::Executor;
pub use options::{
    DEFAULT_RETRY_DELAY, ExecuteOptions, ExecuteOutput, LineCallback, RetryCallback, Stdin,
    SuccessPredicate,
};

use crate::errors::SubprocessError;
use crate::process::ProcessManager;

/// Shorthand for `Executor::new(processes.clone()).execute(opts)`.
pub async fn execute(
    processes: &ProcessManager,
    opts: ExecuteOptions,
) -> Result<ExecuteOutput, SubprocessError> {
    Executor::new(processes.clone()).execute(opts).await
}
