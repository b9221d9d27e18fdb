// src/process/unix.rs

//! Unix signal delivery plus the `pgrep` and `ps` based backends.

use std::io;
use std::process::Stdio;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::process::Command;
use tracing::debug;

use super::backend::{BackendFuture, ProcessBackend, SignalOutcome};
use crate::types::KillSignal;

fn to_pid(pid: u32) -> io::Result<Pid> {
    i32::try_from(pid)
        .map(Pid::from_raw)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("pid {pid} out of range")))
}

/// Send `signal` to one process, classifying the expected races.
pub fn send_signal(pid: u32, signal: KillSignal) -> io::Result<SignalOutcome> {
    let sig = match signal {
        KillSignal::Term => Signal::SIGTERM,
        KillSignal::Kill => Signal::SIGKILL,
    };
    match kill(to_pid(pid)?, sig) {
        Ok(()) => Ok(SignalOutcome::Delivered),
        Err(Errno::ESRCH) => Ok(SignalOutcome::NotFound),
        Err(Errno::EPERM) => Ok(SignalOutcome::PermissionDenied),
        Err(errno) => Err(io::Error::from(errno)),
    }
}

/// Signal-0 check: does a process with this pid exist at all (zombies included)?
pub fn process_exists(pid: u32) -> bool {
    let Ok(pid) = to_pid(pid) else {
        return false;
    };
    match kill(pid, None) {
        Ok(()) => true,
        // Exists, but owned by someone else.
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Liveness via `ps -o stat= -p <pid>`; a `Z` state is treated as exited.
async fn alive_per_ps(pid: u32) -> bool {
    if !process_exists(pid) {
        return false;
    }
    let out = Command::new("ps")
        .args(["-o", "stat=", "-p", &pid.to_string()])
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await;
    match out {
        Ok(out) => !String::from_utf8_lossy(&out.stdout).trim_start().starts_with('Z'),
        Err(_) => true,
    }
}

async fn run_listing(program: &str, args: &[String]) -> io::Result<Option<String>> {
    let out = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await?;

    match out.status.code() {
        Some(0) => Ok(Some(String::from_utf8_lossy(&out.stdout).into_owned())),
        // Exit code 1 means "no processes matched".
        Some(1) => Ok(None),
        code => Err(io::Error::other(format!(
            "{program} exited with {code:?}: {}",
            String::from_utf8_lossy(&out.stderr).trim()
        ))),
    }
}

fn parse_pid_lines(stdout: &str) -> Vec<u32> {
    stdout
        .lines()
        .filter_map(|line| line.trim().parse::<u32>().ok())
        .collect()
}

/// macOS / BSD: `pgrep -P <pid>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgrepBackend;

impl ProcessBackend for PgrepBackend {
    fn name(&self) -> &'static str {
        "pgrep"
    }

    fn children(&self, pid: u32) -> BackendFuture<'_, io::Result<Vec<u32>>> {
        Box::pin(async move {
            let args = vec!["-P".to_string(), pid.to_string()];
            let stdout = run_listing("pgrep", &args).await?;
            Ok(stdout.map(|s| parse_pid_lines(&s)).unwrap_or_default())
        })
    }

    fn signal(&self, pid: u32, signal: KillSignal) -> BackendFuture<'_, io::Result<SignalOutcome>> {
        Box::pin(async move { send_signal(pid, signal) })
    }

    fn is_alive(&self, pid: u32) -> BackendFuture<'_, bool> {
        Box::pin(alive_per_ps(pid))
    }
}

/// Portable fallback: one `ps -A -o pid= -o ppid=` listing per query.
#[derive(Debug, Clone, Copy, Default)]
pub struct PsBackend;

/// Parse `pid ppid` pairs and keep the ones whose parent is `parent`.
pub fn children_from_ps_table(table: &str, parent: u32) -> Vec<u32> {
    table
        .lines()
        .filter_map(|line| {
            let mut cols = line.split_whitespace();
            let pid = cols.next()?.parse::<u32>().ok()?;
            let ppid = cols.next()?.parse::<u32>().ok()?;
            (ppid == parent).then_some(pid)
        })
        .collect()
}

impl ProcessBackend for PsBackend {
    fn name(&self) -> &'static str {
        "ps"
    }

    fn children(&self, pid: u32) -> BackendFuture<'_, io::Result<Vec<u32>>> {
        Box::pin(async move {
            let args = ["-A", "-o", "pid=", "-o", "ppid="].map(String::from).to_vec();
            let table = run_listing("ps", &args).await?.unwrap_or_default();
            let children = children_from_ps_table(&table, pid);
            debug!(pid, count = children.len(), "listed children via ps");
            Ok(children)
        })
    }

    fn signal(&self, pid: u32, signal: KillSignal) -> BackendFuture<'_, io::Result<SignalOutcome>> {
        Box::pin(async move { send_signal(pid, signal) })
    }

    fn is_alive(&self, pid: u32) -> BackendFuture<'_, bool> {
        Box::pin(alive_per_ps(pid))
    }
}
