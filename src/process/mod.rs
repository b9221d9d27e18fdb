// src/process/mod.rs

//! Process-tree lifecycle: OS backends, tree discovery, and the background
//! process registry.

pub mod backend;
pub mod manager;
pub mod tree;

#[cfg(target_os = "linux")]
pub mod linux;
#[cfg(unix)]
pub mod unix;
#[cfg(windows)]
pub mod windows;

pub use backend::{BackendFuture, ProcessBackend, SignalOutcome, platform_backend};
pub use manager::{BackgroundProcess, KillOptions, ManagerSettings, ProcessManager};
pub use tree::{CRITICAL_PIDS, collect_tree, is_critical, signal_tree};
