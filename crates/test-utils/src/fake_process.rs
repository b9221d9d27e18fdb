use std::collections::BTreeMap;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use taskrail::process::{BackendFuture, ProcessBackend, SignalOutcome};
use taskrail::types::KillSignal;

#[derive(Debug, Clone, Copy)]
struct FakeProcess {
    parent: u32,
    alive: bool,
    ignores_term: bool,
    ignores_kill: bool,
}

#[derive(Debug, Default)]
struct Table {
    processes: BTreeMap<u32, FakeProcess>,
    signals: Vec<(u32, KillSignal)>,
}

/// In-memory process table implementing [`ProcessBackend`].
///
/// - records every signal sent, in order
/// - `SIGTERM` / `SIGKILL` mark a process exited unless it was spawned as
///   stubborn (ignores `SIGTERM`) or unkillable (ignores both)
/// - optional native tree kill, to exercise the `taskkill /T` code path
/// - optional liveness latency, standing in for a `ps` round trip
#[derive(Debug, Clone, Default)]
pub struct FakeProcessTable {
    table: Arc<Mutex<Table>>,
    native_tree_kill: bool,
    liveness_latency: Duration,
}

impl FakeProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_native_tree_kill() -> Self {
        Self {
            native_tree_kill: true,
            ..Self::default()
        }
    }

    /// Every liveness check sleeps for `latency` before answering.
    pub fn with_liveness_latency(latency: Duration) -> Self {
        Self {
            liveness_latency: latency,
            ..Self::default()
        }
    }

    fn insert(&self, pid: u32, parent: u32, ignores_term: bool, ignores_kill: bool) -> &Self {
        self.table.lock().unwrap().processes.insert(
            pid,
            FakeProcess {
                parent,
                alive: true,
                ignores_term,
                ignores_kill,
            },
        );
        self
    }

    pub fn spawn(&self, pid: u32, parent: u32) -> &Self {
        self.insert(pid, parent, false, false)
    }

    /// A process that survives `SIGTERM`.
    pub fn spawn_stubborn(&self, pid: u32, parent: u32) -> &Self {
        self.insert(pid, parent, true, false)
    }

    /// A process that survives every signal.
    pub fn spawn_unkillable(&self, pid: u32, parent: u32) -> &Self {
        self.insert(pid, parent, true, true)
    }

    /// Mark `pid` as exited on its own.
    pub fn exit(&self, pid: u32) {
        if let Some(p) = self.table.lock().unwrap().processes.get_mut(&pid) {
            p.alive = false;
        }
    }

    pub fn is_running(&self, pid: u32) -> bool {
        self.table
            .lock()
            .unwrap()
            .processes
            .get(&pid)
            .is_some_and(|p| p.alive)
    }

    pub fn signals(&self) -> Vec<(u32, KillSignal)> {
        self.table.lock().unwrap().signals.clone()
    }

    pub fn signalled_pids(&self) -> Vec<u32> {
        self.signals().into_iter().map(|(pid, _)| pid).collect()
    }

    fn deliver(&self, pid: u32, signal: KillSignal) -> SignalOutcome {
        let mut table = self.table.lock().unwrap();
        table.signals.push((pid, signal));
        match table.processes.get_mut(&pid) {
            Some(p) if p.alive => {
                let survives = match signal {
                    KillSignal::Term => p.ignores_term,
                    KillSignal::Kill => p.ignores_kill,
                };
                if !survives {
                    p.alive = false;
                }
                SignalOutcome::Delivered
            }
            _ => SignalOutcome::NotFound,
        }
    }

    fn live_children(&self, pid: u32) -> Vec<u32> {
        self.table
            .lock()
            .unwrap()
            .processes
            .iter()
            .filter(|(_, p)| p.alive && p.parent == pid)
            .map(|(child, _)| *child)
            .collect()
    }
}

impl ProcessBackend for FakeProcessTable {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn children(&self, pid: u32) -> BackendFuture<'_, io::Result<Vec<u32>>> {
        let children = self.live_children(pid);
        Box::pin(async move { Ok(children) })
    }

    fn signal(&self, pid: u32, signal: KillSignal) -> BackendFuture<'_, io::Result<SignalOutcome>> {
        let outcome = self.deliver(pid, signal);
        Box::pin(async move { Ok(outcome) })
    }

    fn is_alive(&self, pid: u32) -> BackendFuture<'_, bool> {
        Box::pin(async move {
            if !self.liveness_latency.is_zero() {
                tokio::time::sleep(self.liveness_latency).await;
            }
            self.is_running(pid)
        })
    }

    fn kills_tree_natively(&self) -> bool {
        self.native_tree_kill
    }

    fn kill_tree(&self, pid: u32, signal: KillSignal) -> BackendFuture<'_, io::Result<SignalOutcome>> {
        Box::pin(async move {
            let mut pending = vec![pid];
            let mut order = Vec::new();
            while let Some(next) = pending.pop() {
                order.push(next);
                pending.extend(self.live_children(next));
            }
            let root = self.deliver(pid, signal);
            for child in order.into_iter().skip(1) {
                self.deliver(child, signal);
            }
            Ok(root)
        })
    }
}
