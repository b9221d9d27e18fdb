// src/process/backend.rs

//! Pluggable OS process backend.
//!
//! Everything the tree-kill logic needs from the operating system goes
//! through [`ProcessBackend`]: listing immediate children, delivering a
//! signal to one process, and checking liveness. One implementation exists
//! per OS family and [`platform_backend`] picks it once at startup. Tests can
//! supply their own implementation that simulates a process table.

use std::fmt::Debug;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;

use crate::types::KillSignal;

/// Boxed future returned by backend operations.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of delivering a signal to a single process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    Delivered,
    /// The process no longer exists (`ESRCH`). Not an error.
    NotFound,
    /// The OS refused (`EPERM`), typically a pid that exited and was reused.
    PermissionDenied,
}

pub trait ProcessBackend: Send + Sync + Debug {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Immediate children of `pid`. An unknown pid yields an empty list.
    fn children(&self, pid: u32) -> BackendFuture<'_, io::Result<Vec<u32>>>;

    /// Deliver `signal` to exactly one process.
    fn signal(&self, pid: u32, signal: KillSignal) -> BackendFuture<'_, io::Result<SignalOutcome>>;

    /// Whether `pid` is still running. Zombies count as exited.
    ///
    /// Polled repeatedly while a kill settles, so implementations that shell
    /// out must do so through `tokio::process`.
    fn is_alive(&self, pid: u32) -> BackendFuture<'_, bool>;

    /// True when the OS can terminate a whole tree in one call, in which case
    /// [`ProcessBackend::kill_tree`] is used instead of manual enumeration.
    fn kills_tree_natively(&self) -> bool {
        false
    }

    /// Terminate `pid` and all of its descendants in a single OS call.
    fn kill_tree(
        &self,
        pid: u32,
        signal: KillSignal,
    ) -> BackendFuture<'_, io::Result<SignalOutcome>> {
        self.signal(pid, signal)
    }
}

#[cfg(target_os = "linux")]
pub fn platform_backend() -> Arc<dyn ProcessBackend> {
    Arc::new(super::linux::ProcfsBackend::default())
}

#[cfg(any(
    target_os = "macos",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
))]
pub fn platform_backend() -> Arc<dyn ProcessBackend> {
    Arc::new(super::unix::PgrepBackend)
}

#[cfg(all(
    unix,
    not(any(
        target_os = "linux",
        target_os = "macos",
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd",
        target_os = "dragonfly"
    ))
))]
pub fn platform_backend() -> Arc<dyn ProcessBackend> {
    Arc::new(super::unix::PsBackend)
}

#[cfg(windows)]
pub fn platform_backend() -> Arc<dyn ProcessBackend> {
    Arc::new(super::windows::TaskkillBackend)
}
