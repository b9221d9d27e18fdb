// src/workflow/context.rs

//! The context threaded through a workflow run.

use std::collections::BTreeMap;

use crate::config::Condition;
use crate::pipeline::Merge;

/// What a command step produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub name: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub pid: Option<u32>,
    pub background: bool,
}

/// Outputs of every command step that has run so far, by step name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowContext {
    pub outputs: BTreeMap<String, StepRecord>,
}

impl WorkflowContext {
    pub fn ran(&self, step: &str) -> bool {
        self.outputs.contains_key(step)
    }

    pub fn output(&self, step: &str) -> Option<&StepRecord> {
        self.outputs.get(step)
    }

    /// Environment variables exposing earlier outputs to later commands.
    pub fn output_env(&self) -> impl Iterator<Item = (String, String)> + '_ {
        self.outputs
            .values()
            .filter(|record| !record.background)
            .map(|record| (output_env_var(&record.name), record.stdout.clone()))
    }
}

impl Merge<StepRecord> for WorkflowContext {
    type Output = WorkflowContext;

    fn merge(mut self, record: StepRecord) -> Self {
        self.outputs.insert(record.name.clone(), record);
        self
    }
}

impl Merge<Option<StepRecord>> for WorkflowContext {
    type Output = WorkflowContext;

    fn merge(self, record: Option<StepRecord>) -> Self {
        match record {
            Some(record) => self.merge(record),
            None => self,
        }
    }
}

/// `TASKRAIL_<NAME>_STDOUT`, with `NAME` upper-cased and every character
/// outside `[A-Z0-9]` replaced by `_`.
pub fn output_env_var(step: &str) -> String {
    let name: String = step
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("TASKRAIL_{name}_STDOUT")
}

impl Condition {
    pub fn holds(&self, ctx: &WorkflowContext) -> bool {
        match self {
            Condition::EnvSet(var) => std::env::var_os(var).is_some_and(|value| !value.is_empty()),
            Condition::StepRan(step) => ctx.ran(step),
        }
    }
}
