#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;

use taskrail::config::{ConfigSection, DefaultSection, RawConfigFile, RawStep, WorkflowFile};
use taskrail::types::LogLayout;

/// Builder for workflow files, so tests don't have to write TOML.
pub struct WorkflowBuilder {
    raw: RawConfigFile,
}

impl WorkflowBuilder {
    pub fn new() -> Self {
        Self {
            raw: RawConfigFile {
                config: ConfigSection {
                    retry_delay: "10ms".to_string(),
                    graceful_timeout: "500ms".to_string(),
                    poll_interval: "10ms".to_string(),
                    settle_timeout: "200ms".to_string(),
                    ..ConfigSection::default()
                },
                default: DefaultSection::default(),
                steps: Vec::new(),
            },
        }
    }

    pub fn step(mut self, step: StepBuilder) -> Self {
        self.raw.steps.push(step.build());
        self
    }

    pub fn error_message(mut self, message: &str) -> Self {
        self.raw.config.error_message = Some(message.to_string());
        self
    }

    pub fn default_env(mut self, key: &str, value: &str) -> Self {
        self.raw.default.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn default_retries(mut self, retries: u32) -> Self {
        self.raw.default.retries = retries;
        self
    }

    pub fn default_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.raw.default.working_dir = Some(dir.into());
        self
    }

    pub fn build_raw(self) -> RawConfigFile {
        self.raw
    }

    pub fn build(self) -> WorkflowFile {
        WorkflowFile::try_from(self.raw).expect("failed to build valid workflow from builder")
    }
}

impl Default for WorkflowBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for a single `[[step]]`.
pub struct StepBuilder {
    step: RawStep,
}

impl StepBuilder {
    fn blank(name: &str) -> Self {
        Self {
            step: RawStep {
                name: name.to_string(),
                cmd: None,
                working_dir: None,
                env: BTreeMap::new(),
                retries: None,
                retry_delay: None,
                success_pattern: None,
                rollback: None,
                if_env: None,
                if_ran: None,
                background: false,
                description: None,
                log_layout: LogLayout::default(),
                steps: Vec::new(),
            },
        }
    }

    pub fn command(name: &str, cmd: &str) -> Self {
        let mut b = Self::blank(name);
        b.step.cmd = Some(cmd.to_string());
        b
    }

    pub fn group(name: &str, children: Vec<StepBuilder>) -> Self {
        let mut b = Self::blank(name);
        b.step.steps = children.into_iter().map(StepBuilder::build).collect();
        b
    }

    pub fn rollback(mut self, cmd: &str) -> Self {
        self.step.rollback = Some(cmd.to_string());
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.step.retries = Some(retries);
        self
    }

    pub fn retry_delay(mut self, delay: &str) -> Self {
        self.step.retry_delay = Some(delay.to_string());
        self
    }

    pub fn success_pattern(mut self, pattern: &str) -> Self {
        self.step.success_pattern = Some(pattern.to_string());
        self
    }

    pub fn if_env(mut self, var: &str) -> Self {
        self.step.if_env = Some(var.to_string());
        self
    }

    pub fn if_ran(mut self, step: &str) -> Self {
        self.step.if_ran = Some(step.to_string());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.step.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.step.working_dir = Some(dir.into());
        self
    }

    pub fn background(mut self, description: Option<&str>) -> Self {
        self.step.background = true;
        self.step.description = description.map(str::to_string);
        self
    }

    pub fn build(self) -> RawStep {
        self.step
    }
}
