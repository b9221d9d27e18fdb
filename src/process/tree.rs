// src/process/tree.rs

//! Process-tree discovery and signalling.
//!
//! Trees are recomputed on every request; children may appear between two
//! kill attempts, so nothing is cached.

use std::collections::HashSet;
use std::io;

use tracing::{debug, trace, warn};

use super::backend::{ProcessBackend, SignalOutcome};
use crate::types::KillSignal;

/// Kernel / init pids that must never receive a signal.
pub const CRITICAL_PIDS: [u32; 3] = [0, 1, 2];

pub fn is_critical(pid: u32) -> bool {
    CRITICAL_PIDS.contains(&pid)
}

/// Root plus every transitive child, in discovery order (root first).
///
/// A failing child listing is logged and treated as "no children" for that
/// node; the rest of the tree is still collected.
pub async fn collect_tree(backend: &dyn ProcessBackend, root: u32) -> Vec<u32> {
    if is_critical(root) {
        return Vec::new();
    }

    let mut discovered = vec![root];
    let mut seen = HashSet::from([root]);
    let mut worklist = vec![root];

    while let Some(pid) = worklist.pop() {
        let children = match backend.children(pid).await {
            Ok(children) => children,
            Err(err) => {
                debug!(pid, backend = backend.name(), error = %err, "failed to list child processes");
                continue;
            }
        };

        for child in children {
            if is_critical(child) {
                trace!(pid = child, "skipping critical pid during enumeration");
                continue;
            }
            if seen.insert(child) {
                discovered.push(child);
                worklist.push(child);
            }
        }
    }

    discovered
}

/// Signal `root` (and, with `include_children`, all of its descendants).
///
/// Processes are signalled newest first. "Not found" and permission races are
/// tolerated; the first unexpected OS error is returned after every pid has
/// been attempted.
pub async fn signal_tree(
    backend: &dyn ProcessBackend,
    root: u32,
    signal: KillSignal,
    include_children: bool,
) -> io::Result<()> {
    if include_children && backend.kills_tree_natively() {
        let outcome = backend.kill_tree(root, signal).await?;
        debug!(pid = root, %signal, ?outcome, "signalled process tree natively");
        return Ok(());
    }

    let pids = if include_children {
        collect_tree(backend, root).await
    } else {
        vec![root]
    };
    debug!(pid = root, %signal, tree = ?pids, "signalling process tree");

    let mut first_error = None;
    for &pid in pids.iter().rev() {
        match backend.signal(pid, signal).await {
            Ok(SignalOutcome::Delivered) => trace!(pid, %signal, "signal delivered"),
            Ok(SignalOutcome::NotFound) => trace!(pid, "process already gone"),
            Ok(SignalOutcome::PermissionDenied) => {
                warn!(pid, %signal, "permission denied while signalling process")
            }
            Err(err) => {
                warn!(pid, %signal, error = %err, "failed to signal process");
                first_error.get_or_insert(err);
            }
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
