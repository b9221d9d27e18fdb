// src/process/manager.rs

//! Background-process registry and graceful tree termination.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tracing::{debug, info, warn};

use super::backend::{ProcessBackend, platform_backend};
use super::tree::{is_critical, signal_tree};
use crate::errors::{EngineError, Result};
use crate::types::KillSignal;

/// A process spawned in background mode and still tracked for cleanup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackgroundProcess {
    pub pid: u32,
    pub command: String,
    pub description: Option<String>,
}

impl BackgroundProcess {
    fn label(&self) -> &str {
        self.description.as_deref().unwrap_or(&self.command)
    }
}

/// Per-request options for [`ProcessManager::kill_tree`].
#[derive(Debug, Clone, Copy)]
pub struct KillOptions {
    pub signal: KillSignal,
    /// How long to wait for the root to exit before escalating to `SIGKILL`.
    pub graceful_timeout: Duration,
    pub kill_children: bool,
}

impl Default for KillOptions {
    fn default() -> Self {
        Self {
            signal: KillSignal::Term,
            graceful_timeout: Duration::from_secs(5),
            kill_children: true,
        }
    }
}

/// Manager-wide timing.
#[derive(Debug, Clone, Copy)]
pub struct ManagerSettings {
    /// Liveness polling interval while waiting for a root to exit.
    pub poll_interval: Duration,
    /// Extra time after escalation before tracking is dropped regardless.
    pub settle_timeout: Duration,
    /// Graceful timeout used by [`ProcessManager::kill_all`].
    pub graceful_timeout: Duration,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            settle_timeout: Duration::from_secs(1),
            graceful_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug)]
struct Inner {
    backend: Arc<dyn ProcessBackend>,
    settings: ManagerSettings,
    registry: Mutex<Vec<BackgroundProcess>>,
}

/// Explicitly constructed process lifecycle service.
///
/// Cloning is cheap and every clone shares one registry, so the same manager
/// can be handed to each executor and to the shutdown path.
#[derive(Debug, Clone)]
pub struct ProcessManager {
    inner: Arc<Inner>,
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new(ManagerSettings::default())
    }
}

impl ProcessManager {
    /// Manager over the backend for the current platform.
    pub fn new(settings: ManagerSettings) -> Self {
        Self::with_backend(platform_backend(), settings)
    }

    pub fn with_backend(backend: Arc<dyn ProcessBackend>, settings: ManagerSettings) -> Self {
        debug!(backend = backend.name(), "process manager initialised");
        Self {
            inner: Arc::new(Inner {
                backend,
                settings,
                registry: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn backend(&self) -> &Arc<dyn ProcessBackend> {
        &self.inner.backend
    }

    pub fn settings(&self) -> ManagerSettings {
        self.inner.settings
    }

    fn registry(&self) -> MutexGuard<'_, Vec<BackgroundProcess>> {
        // Entries are plain data; a panic mid-update cannot leave them torn.
        self.inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Start tracking `pid`. A stale entry with the same pid is replaced.
    pub fn register(&self, pid: u32, command: impl Into<String>, description: Option<String>) {
        let entry = BackgroundProcess {
            pid,
            command: command.into(),
            description,
        };
        debug!(pid, command = %entry.command, "registering background process");

        let mut registry = self.registry();
        registry.retain(|p| p.pid != pid);
        registry.push(entry);
    }

    pub fn deregister(&self, pid: u32) -> Option<BackgroundProcess> {
        let mut registry = self.registry();
        let idx = registry.iter().position(|p| p.pid == pid)?;
        debug!(pid, "deregistering background process");
        Some(registry.remove(idx))
    }

    /// Snapshot of the registry; later changes are not reflected.
    pub fn list(&self) -> Vec<BackgroundProcess> {
        self.registry().clone()
    }

    pub fn find(&self, pid: u32) -> Option<BackgroundProcess> {
        self.registry().iter().find(|p| p.pid == pid).cloned()
    }

    pub fn count(&self) -> usize {
        self.registry().len()
    }

    /// Forget every entry without signalling anything.
    pub fn clear(&self) {
        self.registry().clear();
    }

    /// Drop entries whose process has already exited; returns them.
    pub async fn prune(&self) -> Vec<BackgroundProcess> {
        let backend = self.inner.backend.as_ref();
        let tracked = self.list();
        let liveness = join_all(tracked.iter().map(|p| backend.is_alive(p.pid))).await;

        let dead: Vec<BackgroundProcess> = tracked
            .into_iter()
            .zip(liveness)
            .filter_map(|(p, alive)| (!alive).then_some(p))
            .collect();

        let mut registry = self.registry();
        registry.retain(|p| !dead.iter().any(|d| d.pid == p.pid));
        for p in &dead {
            debug!(pid = p.pid, "pruned exited background process");
        }
        dead
    }

    /// Terminate `pid` (and by default its descendants), escalating to
    /// `SIGKILL` after `graceful_timeout`.
    ///
    /// Resolves once the root has exited, or once the settle deadline passes.
    /// "Not found" at any stage is success. The pid is deregistered on every
    /// path past validation.
    pub async fn kill_tree(&self, pid: i64, options: KillOptions) -> Result<()> {
        let pid = u32::try_from(pid)
            .ok()
            .filter(|p| i32::try_from(*p).is_ok())
            .ok_or(EngineError::InvalidPid(pid))?;

        if is_critical(pid) {
            warn!(pid, "refusing to signal critical system process");
            return Ok(());
        }

        let result = self.terminate(pid, options).await;
        self.deregister(pid);
        result
    }

    async fn terminate(&self, pid: u32, options: KillOptions) -> Result<()> {
        let backend = self.inner.backend.as_ref();

        if !backend.is_alive(pid).await {
            debug!(pid, "process already exited");
            return Ok(());
        }

        let label = self
            .find(pid)
            .map(|p| p.label().to_string())
            .unwrap_or_default();
        info!(pid, process = %label, signal = %options.signal, "terminating process tree");

        signal_tree(backend, pid, options.signal, options.kill_children).await?;
        self.await_exit(pid, options).await;
        Ok(())
    }

    async fn await_exit(&self, pid: u32, options: KillOptions) {
        let backend = self.inner.backend.as_ref();
        let settings = self.inner.settings;

        let escalation = sleep(options.graceful_timeout);
        let give_up = sleep(options.graceful_timeout + settings.settle_timeout);
        tokio::pin!(escalation, give_up);

        let mut poll = interval(settings.poll_interval.max(Duration::from_millis(1)));
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut escalated = options.signal == KillSignal::Kill;

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    if !backend.is_alive(pid).await {
                        debug!(pid, "process exited");
                        return;
                    }
                }
                _ = &mut escalation, if !escalated => {
                    escalated = true;
                    warn!(pid, timeout = ?options.graceful_timeout, "process still running; escalating to SIGKILL");
                    if let Err(err) = signal_tree(backend, pid, KillSignal::Kill, options.kill_children).await {
                        warn!(pid, error = %err, "failed to escalate to SIGKILL");
                    }
                }
                _ = &mut give_up => {
                    warn!(pid, "process did not exit after SIGKILL; no longer tracking it");
                    return;
                }
            }
        }
    }

    /// Kill every tracked process in parallel, then clear the registry.
    ///
    /// Individual failures are logged; returns how many processes were
    /// attempted.
    pub async fn kill_all(&self) -> usize {
        let tracked = self.list();
        if tracked.is_empty() {
            debug!("no background processes to clean up");
            return 0;
        }

        info!(count = tracked.len(), "killing background processes");
        for p in &tracked {
            info!(pid = p.pid, process = %p.label(), "  - background process");
        }

        let options = KillOptions {
            graceful_timeout: self.inner.settings.graceful_timeout,
            ..KillOptions::default()
        };
        let results = join_all(
            tracked
                .iter()
                .map(|p| self.kill_tree(i64::from(p.pid), options)),
        )
        .await;

        for (p, result) in tracked.iter().zip(results) {
            if let Err(err) = result {
                warn!(pid = p.pid, error = %err, "failed to kill background process");
            }
        }

        self.clear();
        tracked.len()
    }
}
