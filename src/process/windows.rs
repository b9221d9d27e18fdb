// src/process/windows.rs

//! Windows backend: `taskkill` terminates whole trees in one call.

use std::io;
use std::process::Stdio;

use tokio::process::Command;

use super::backend::{BackendFuture, ProcessBackend, SignalOutcome};
use crate::types::KillSignal;

/// `taskkill` exit code for "process not found".
const TASKKILL_NOT_FOUND: i32 = 128;

#[derive(Debug, Clone, Copy, Default)]
pub struct TaskkillBackend;

fn taskkill_args(pid: u32, signal: KillSignal, tree: bool) -> Vec<String> {
    let mut args = vec!["/pid".to_string(), pid.to_string()];
    if tree {
        args.push("/T".to_string());
    }
    if signal == KillSignal::Kill {
        args.push("/F".to_string());
    }
    args
}

fn classify(program: &str, status: std::process::ExitStatus) -> io::Result<SignalOutcome> {
    match status.code() {
        Some(0) => Ok(SignalOutcome::Delivered),
        Some(TASKKILL_NOT_FOUND) => Ok(SignalOutcome::NotFound),
        code => Err(io::Error::other(format!("{program} exited with {code:?}"))),
    }
}

async fn taskkill(pid: u32, signal: KillSignal, tree: bool) -> io::Result<SignalOutcome> {
    let status = Command::new("taskkill")
        .args(taskkill_args(pid, signal, tree))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;
    classify("taskkill", status)
}

impl ProcessBackend for TaskkillBackend {
    fn name(&self) -> &'static str {
        "taskkill"
    }

    fn children(&self, _pid: u32) -> BackendFuture<'_, io::Result<Vec<u32>>> {
        // Never consulted: trees are killed natively.
        Box::pin(async { Ok(Vec::new()) })
    }

    fn signal(&self, pid: u32, signal: KillSignal) -> BackendFuture<'_, io::Result<SignalOutcome>> {
        Box::pin(taskkill(pid, signal, false))
    }

    fn is_alive(&self, pid: u32) -> BackendFuture<'_, bool> {
        Box::pin(async move {
            let filter = format!("PID eq {pid}");
            let out = Command::new("tasklist")
                .args(["/FI", &filter, "/NH", "/FO", "CSV"])
                .stdin(Stdio::null())
                .stderr(Stdio::null())
                .output()
                .await;
            match out {
                Ok(out) => String::from_utf8_lossy(&out.stdout).contains(&format!("\"{pid}\"")),
                Err(_) => false,
            }
        })
    }

    fn kills_tree_natively(&self) -> bool {
        true
    }

    fn kill_tree(
        &self,
        pid: u32,
        signal: KillSignal,
    ) -> BackendFuture<'_, io::Result<SignalOutcome>> {
        Box::pin(taskkill(pid, signal, true))
    }
}
