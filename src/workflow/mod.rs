// src/workflow/mod.rs

//! Declarative workflows: a validated [`WorkflowFile`] mapped onto a
//! [`Pipeline`] whose steps run shell commands through an [`Executor`].
//!
//! - Command steps merge a [`StepRecord`] into the [`WorkflowContext`].
//! - Group steps become subsequences.
//! - `rollback` commands run against the pre-step context.
//! - Earlier outputs reach later commands as `TASKRAIL_<NAME>_STDOUT`.

mod context;
mod plan;

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use context::{StepRecord, WorkflowContext, output_env_var};

use crate::config::{Condition, Settings, StepConfig, StepKind, WorkflowFile};
use crate::errors::PipelineError;
use crate::exec::Executor;
use crate::pipeline::Pipeline;
use crate::process::ManagerSettings;

use plan::{Planner, Scope, add_steps};

#[derive(Debug)]
pub struct Workflow {
    file: WorkflowFile,
    base_dir: PathBuf,
    executor: Executor,
}

impl Workflow {
    /// `base_dir` anchors relative working directories, normally the
    /// directory holding the workflow file.
    pub fn new(file: WorkflowFile, base_dir: impl Into<PathBuf>, executor: Executor) -> Self {
        Self {
            file,
            base_dir: base_dir.into(),
            executor,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.file.config
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Build the pipeline for this workflow.
    pub fn pipeline(&self) -> Pipeline<WorkflowContext, WorkflowContext> {
        let planner = Arc::new(Planner {
            executor: self.executor.clone(),
            default_retries: self.file.default.retries,
            default_retry_delay: self.file.config.retry_delay,
        });
        let scope = Scope::root(&self.file, &self.base_dir);

        let mut pipeline = Pipeline::new("workflow");
        if let Some(message) = &self.file.config.error_message {
            pipeline = pipeline.with_error_message(message.clone());
        }
        add_steps(pipeline, &self.file.steps, &scope, &planner)
    }

    pub async fn run(&self) -> Result<WorkflowContext, PipelineError> {
        self.pipeline().run(WorkflowContext::default()).await
    }

    /// Human-readable step tree, as printed by `--dry-run`.
    pub fn describe(&self) -> String {
        describe(&self.file)
    }
}

/// Process-manager timing taken from `[config]`.
pub fn manager_settings(settings: &Settings) -> ManagerSettings {
    ManagerSettings {
        poll_interval: settings.poll_interval,
        settle_timeout: settings.settle_timeout,
        graceful_timeout: settings.graceful_timeout,
    }
}

/// Directory that relative paths in the workflow file resolve against.
pub fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

pub fn describe(file: &WorkflowFile) -> String {
    let total: usize = file.steps.iter().map(StepConfig::count).sum();
    let mut out = String::new();
    let _ = writeln!(out, "taskrail dry-run");
    if let Some(message) = &file.config.error_message {
        let _ = writeln!(out, "  config.error_message = {message}");
    }
    let _ = writeln!(out, "  config.graceful_timeout = {:?}", file.config.graceful_timeout);
    let _ = writeln!(out, "  config.retry_delay = {:?}", file.config.retry_delay);
    let _ = writeln!(out);
    let _ = writeln!(out, "steps ({total}):");
    for step in &file.steps {
        describe_step(&mut out, step, 1);
    }
    out
}

fn describe_step(out: &mut String, step: &StepConfig, depth: usize) {
    let pad = "  ".repeat(depth);
    let _ = writeln!(out, "{pad}- {}", step.name);

    match &step.condition {
        Some(Condition::EnvSet(var)) => {
            let _ = writeln!(out, "{pad}    if_env: {var}");
        }
        Some(Condition::StepRan(other)) => {
            let _ = writeln!(out, "{pad}    if_ran: {other}");
        }
        None => {}
    }
    if let Some(dir) = &step.working_dir {
        let _ = writeln!(out, "{pad}    working_dir: {}", dir.display());
    }
    if let Some(rollback) = &step.rollback {
        let _ = writeln!(out, "{pad}    rollback: {rollback}");
    }

    match &step.kind {
        StepKind::Command(command) => {
            let _ = writeln!(out, "{pad}    cmd: {}", command.cmd);
            if let Some(retries) = command.retries {
                let _ = writeln!(out, "{pad}    retries: {retries}");
            }
            if let Some(pattern) = &command.success_pattern {
                let _ = writeln!(out, "{pad}    success_pattern: {}", pattern.as_str());
            }
            if command.background {
                let _ = writeln!(out, "{pad}    background: true");
            }
        }
        StepKind::Group(children) => {
            for child in children {
                describe_step(out, child, depth + 2);
            }
        }
    }
}
