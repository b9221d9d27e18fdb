// src/pipeline/journal.rs

//! Snapshot stack consulted when a pipeline has to unwind.

use std::any::Any;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{info, warn};

use super::step::StepHandle;

pub(crate) type ErasedSnapshot = Arc<dyn Any + Send + Sync>;
pub(crate) type PendingRollback = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// Pre-step snapshot paired with the step's rollback, if it has one.
pub(crate) struct Compensation {
    step: Arc<str>,
    snapshot: ErasedSnapshot,
    rollback: Option<PendingRollback>,
}

impl Compensation {
    pub(crate) fn new(step: Arc<str>, snapshot: ErasedSnapshot, rollback: Option<PendingRollback>) -> Self {
        Self {
            step,
            snapshot,
            rollback,
        }
    }
}

pub(crate) struct Journal {
    pipeline: Arc<str>,
    entries: Vec<Compensation>,
}

impl Journal {
    pub(crate) fn new(pipeline: Arc<str>) -> Self {
        Self {
            pipeline,
            entries: Vec::new(),
        }
    }

    pub(crate) fn handle(&self, step: &Arc<str>, attempt: u32) -> StepHandle {
        StepHandle::new(Arc::clone(&self.pipeline), Arc::clone(step), attempt)
    }

    pub(crate) fn pipeline(&self) -> &Arc<str> {
        &self.pipeline
    }

    pub(crate) fn push(&mut self, entry: Compensation) {
        self.entries.push(entry);
    }

    /// Snapshot taken before the most recent step started.
    pub(crate) fn last_snapshot(&self) -> Option<ErasedSnapshot> {
        self.entries.last().map(|entry| Arc::clone(&entry.snapshot))
    }

    /// Run every rollback, newest first.
    ///
    /// Rollback errors are logged and never stop the remaining handlers.
    pub(crate) async fn unwind(&mut self) {
        while let Some(entry) = self.entries.pop() {
            let Some(rollback) = entry.rollback else {
                continue;
            };

            info!(pipeline = %self.pipeline, step = %entry.step, "rolling back step");
            if let Err(err) = rollback().await {
                warn!(
                    pipeline = %self.pipeline,
                    step = %entry.step,
                    error = %format!("{err:#}"),
                    "rollback failed; continuing"
                );
            }
        }
    }
}
