// src/workflow/plan.rs

//! Turning validated step configs into pipeline steps.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tracing::info;

use super::context::{StepRecord, WorkflowContext};
use crate::config::{CommandStep, StepConfig, StepKind, WorkflowFile};
use crate::exec::{ExecuteOptions, Executor};
use crate::pipeline::{Pipeline, StepHandle, StepOptions};
use crate::types::LogLayout;

type WorkflowPipeline = Pipeline<WorkflowContext, WorkflowContext>;

/// Working directory and environment inherited down the step tree.
#[derive(Debug, Clone)]
pub(crate) struct Scope {
    working_dir: PathBuf,
    env: BTreeMap<String, String>,
}

impl Scope {
    pub(crate) fn root(file: &WorkflowFile, base_dir: &Path) -> Self {
        let working_dir = match &file.default.working_dir {
            Some(dir) => base_dir.join(dir),
            None => base_dir.to_path_buf(),
        };
        Self {
            working_dir,
            env: file.default.env.clone(),
        }
    }

    fn enter(&self, step: &StepConfig) -> Self {
        let mut env = self.env.clone();
        env.extend(step.env.clone());
        Self {
            working_dir: match &step.working_dir {
                Some(dir) => self.working_dir.join(dir),
                None => self.working_dir.clone(),
            },
            env,
        }
    }

    fn shell(&self, cmd: &str, ctx: &WorkflowContext) -> ExecuteOptions {
        let mut opts = ExecuteOptions::shell(cmd).working_dir(&self.working_dir);
        for (key, value) in ctx.output_env().chain(self.env.clone()) {
            opts = opts.env(key, value);
        }
        opts
    }
}

/// Shared state every generated step closure holds on to.
#[derive(Debug)]
pub(crate) struct Planner {
    pub(crate) executor: Executor,
    pub(crate) default_retries: u32,
    pub(crate) default_retry_delay: Duration,
}

#[derive(Debug)]
struct CommandPlan {
    name: String,
    cmd: String,
    scope: Scope,
    retries: u32,
    retry_delay: Duration,
    success_pattern: Option<Regex>,
    background: bool,
    description: Option<String>,
    log_layout: LogLayout,
}

impl CommandPlan {
    fn options(&self, ctx: &WorkflowContext) -> ExecuteOptions {
        let name = self.name.clone();
        let mut opts = self
            .scope
            .shell(&self.cmd, ctx)
            .error_message(format!("Step '{}' failed", self.name))
            .log_layout(self.log_layout);

        if self.background {
            return opts.background(self.description.clone().or_else(|| Some(self.name.clone())));
        }

        opts = opts
            .retries(self.retries)
            .retry_delay(self.retry_delay)
            .on_stdout_line({
                let name = name.clone();
                move |line, attempt| info!(step = %name, attempt, "{line}")
            })
            .on_stderr_line(move |line, attempt| info!(step = %name, attempt, stream = "stderr", "{line}"));

        if let Some(pattern) = self.success_pattern.clone() {
            opts = opts.is_success(move |out| pattern.is_match(&out.stdout));
        }
        opts
    }
}

async fn run_command(
    planner: Arc<Planner>,
    plan: Arc<CommandPlan>,
    ctx: Arc<WorkflowContext>,
    handle: StepHandle,
) -> anyhow::Result<StepRecord> {
    let out = planner.executor.execute(plan.options(&ctx)).await?;

    if plan.background {
        handle.output(format!("started in background (pid {:?})", out.pid));
    } else {
        handle.output(format!("finished (exit code {:?})", out.exit_code));
    }

    Ok(StepRecord {
        name: plan.name.clone(),
        stdout: out.stdout,
        stderr: out.stderr,
        exit_code: out.exit_code,
        pid: out.pid,
        background: plan.background,
    })
}

/// Rollback for a step: run its `rollback` command against the pre-step
/// context.
fn rollback_options(
    planner: &Arc<Planner>,
    step: &StepConfig,
    scope: &Scope,
) -> StepOptions<WorkflowContext> {
    let Some(cmd) = step.rollback.clone() else {
        return StepOptions::new();
    };
    let planner = Arc::clone(planner);
    let scope = scope.clone();
    let name = step.name.clone();

    StepOptions::new().rollback(move |snapshot: Arc<WorkflowContext>, _handle| {
        let opts = scope
            .shell(&cmd, &snapshot)
            .error_message(format!("Rollback of step '{name}' failed"));
        let planner = Arc::clone(&planner);
        async move {
            planner.executor.execute(opts).await?;
            Ok(())
        }
    })
}

/// Append `steps` (recursively) to `pipeline`.
pub(crate) fn add_steps(
    mut pipeline: WorkflowPipeline,
    steps: &[StepConfig],
    scope: &Scope,
    planner: &Arc<Planner>,
) -> WorkflowPipeline {
    for step in steps {
        pipeline = add_step(pipeline, step, scope, planner);
    }
    pipeline
}

fn add_step(
    pipeline: WorkflowPipeline,
    step: &StepConfig,
    scope: &Scope,
    planner: &Arc<Planner>,
) -> WorkflowPipeline {
    let scope = scope.enter(step);
    let options = rollback_options(planner, step, &scope);

    match &step.kind {
        StepKind::Command(command) => {
            let plan = Arc::new(command_plan(planner, step, command, scope));
            let action = {
                let planner = Arc::clone(planner);
                move |ctx, handle| run_command(Arc::clone(&planner), Arc::clone(&plan), ctx, handle)
            };

            match step.condition.clone() {
                None => pipeline.add_step(step.name.clone(), action, options),
                Some(condition) => pipeline.add_conditional_step(
                    step.name.clone(),
                    move |ctx: &WorkflowContext| condition.holds(ctx),
                    action,
                    options,
                ),
            }
        }
        StepKind::Group(children) => {
            let children = Arc::new(children.clone());
            let planner = Arc::clone(planner);
            let build = move |_: &WorkflowContext, nested: WorkflowPipeline| add_steps(nested, &children, &scope, &planner);

            match step.condition.clone() {
                None => pipeline.add_subsequence(step.name.clone(), build, options),
                Some(condition) => pipeline.add_conditional_subsequence(
                    step.name.clone(),
                    move |ctx: &WorkflowContext| condition.holds(ctx),
                    build,
                    options,
                ),
            }
        }
    }
}

fn command_plan(planner: &Planner, step: &StepConfig, command: &CommandStep, scope: Scope) -> CommandPlan {
    CommandPlan {
        name: step.name.clone(),
        cmd: command.cmd.clone(),
        scope,
        retries: command.retries.unwrap_or(planner.default_retries),
        retry_delay: command.retry_delay.unwrap_or(planner.default_retry_delay),
        success_pattern: command.success_pattern.clone(),
        background: command.background,
        description: command.description.clone(),
        log_layout: command.log_layout,
    }
}
