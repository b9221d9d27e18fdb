// src/process/linux.rs

//! Linux backend: child discovery by scanning `/proc/<pid>/stat`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::trace;

use super::backend::{BackendFuture, ProcessBackend, SignalOutcome};
use super::unix::{process_exists, send_signal};
use crate::types::KillSignal;

/// Parent-indexed process listing straight from procfs.
///
/// No external tool is spawned, so this works in minimal containers that
/// ship without `ps`.
#[derive(Debug, Clone)]
pub struct ProcfsBackend {
    root: PathBuf,
}

impl Default for ProcfsBackend {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/proc"),
        }
    }
}

/// The fields of `/proc/<pid>/stat` this backend cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatLine {
    pub state: char,
    pub ppid: u32,
}

/// Parse a `/proc/<pid>/stat` line.
///
/// The command name (field 2) is wrapped in parentheses and may itself
/// contain spaces or parentheses, so parsing resumes after the *last* `)`.
pub fn parse_stat(contents: &str) -> Option<StatLine> {
    let after_comm = &contents[contents.rfind(')')? + 1..];
    let mut fields = after_comm.split_whitespace();
    let state = fields.next()?.chars().next()?;
    let ppid = fields.next()?.parse().ok()?;
    Some(StatLine { state, ppid })
}

impl ProcfsBackend {
    /// Use a different procfs mount (tests point this at a fixture tree).
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn read_stat(&self, pid: u32) -> Option<StatLine> {
        let contents = fs::read_to_string(self.root.join(pid.to_string()).join("stat")).ok()?;
        parse_stat(&contents)
    }

    fn scan_children(root: &Path, parent: u32) -> io::Result<Vec<u32>> {
        let mut children = Vec::new();
        for entry in fs::read_dir(root)? {
            let Ok(entry) = entry else { continue };
            let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) else {
                continue;
            };
            // Processes can vanish between readdir and read; skip them.
            let Ok(contents) = fs::read_to_string(entry.path().join("stat")) else {
                continue;
            };
            if parse_stat(&contents).is_some_and(|stat| stat.ppid == parent) {
                children.push(pid);
            }
        }
        children.sort_unstable();
        Ok(children)
    }
}

impl ProcessBackend for ProcfsBackend {
    fn name(&self) -> &'static str {
        "procfs"
    }

    fn children(&self, pid: u32) -> BackendFuture<'_, io::Result<Vec<u32>>> {
        Box::pin(async move {
            // procfs is memory-backed; reads never wait on a disk.
            let children = Self::scan_children(&self.root, pid)?;
            trace!(pid, ?children, "listed children via procfs");
            Ok(children)
        })
    }

    fn signal(&self, pid: u32, signal: KillSignal) -> BackendFuture<'_, io::Result<SignalOutcome>> {
        Box::pin(async move { send_signal(pid, signal) })
    }

    fn is_alive(&self, pid: u32) -> BackendFuture<'_, bool> {
        Box::pin(async move {
            match self.read_stat(pid) {
                // Zombie or dead: exited, only waiting to be reaped.
                Some(stat) => stat.state != 'Z' && stat.state != 'X',
                // No readable stat entry: gone, unless procfs is mounted with
                // `hidepid` and the process belongs to another user.
                None => self.root == Path::new("/proc") && process_exists(pid),
            }
        })
    }
}
