// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use crate::types::LogLayout;

/// Workflow file exactly as read from TOML.
///
/// ```toml
/// [config]
/// error_message = "Deploy failed"
/// graceful_timeout = "5s"
///
/// [default]
/// working_dir = "infra"
/// retries = 1
///
/// [[step]]
/// name = "plan"
/// cmd = "terraform plan -out plan.bin"
/// rollback = "rm -f plan.bin"
///
/// [[step]]
/// name = "services"
///
///   [[step.steps]]
///   name = "api"
///   cmd = "./start-api.sh"
///   background = true
/// ```
///
/// Turned into a [`WorkflowFile`] with `TryFrom`, which validates it.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    #[serde(default)]
    pub default: DefaultSection,

    #[serde(default, rename = "step")]
    pub steps: Vec<RawStep>,
}

/// `[config]` section. Durations are strings like `"250ms"` or `"5s"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigSection {
    /// Prefix of the error reported when the workflow fails.
    #[serde(default)]
    pub error_message: Option<String>,

    #[serde(default = "default_graceful_timeout")]
    pub graceful_timeout: String,

    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,

    #[serde(default = "default_settle_timeout")]
    pub settle_timeout: String,

    #[serde(default = "default_retry_delay")]
    pub retry_delay: String,

    #[serde(default = "default_true")]
    pub kill_background_on_exit: bool,
}

fn default_graceful_timeout() -> String {
    "5s".to_string()
}

fn default_poll_interval() -> String {
    "100ms".to_string()
}

fn default_settle_timeout() -> String {
    "1s".to_string()
}

fn default_retry_delay() -> String {
    "5s".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            error_message: None,
            graceful_timeout: default_graceful_timeout(),
            poll_interval: default_poll_interval(),
            settle_timeout: default_settle_timeout(),
            retry_delay: default_retry_delay(),
            kill_background_on_exit: true,
        }
    }
}

/// `[default]` section, inherited by every step.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct DefaultSection {
    /// Relative paths resolve against the workflow file's directory.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub retries: u32,
}

/// One `[[step]]` (or nested `[[step.steps]]`) table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawStep {
    pub name: String,

    /// Shell command. Exactly one of `cmd` / `steps` must be given.
    #[serde(default)]
    pub cmd: Option<String>,

    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Merged over `[default].env`.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub retries: Option<u32>,

    #[serde(default)]
    pub retry_delay: Option<String>,

    /// Regex that stdout must match for the command to count as successful,
    /// instead of exit code 0.
    #[serde(default)]
    pub success_pattern: Option<String>,

    /// Shell command run if this or a later step fails.
    #[serde(default)]
    pub rollback: Option<String>,

    /// Run only if this environment variable is set and non-empty.
    #[serde(default)]
    pub if_env: Option<String>,

    /// Run only if the named earlier step ran.
    #[serde(default)]
    pub if_ran: Option<String>,

    #[serde(default)]
    pub background: bool,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub log_layout: LogLayout,

    #[serde(default)]
    pub steps: Vec<RawStep>,
}

/// Validated workflow.
#[derive(Debug, Clone)]
pub struct WorkflowFile {
    pub config: Settings,
    pub default: DefaultSection,
    pub steps: Vec<StepConfig>,
}

/// `[config]` with durations parsed.
#[derive(Debug, Clone)]
pub struct Settings {
    pub error_message: Option<String>,
    pub graceful_timeout: Duration,
    pub poll_interval: Duration,
    pub settle_timeout: Duration,
    pub retry_delay: Duration,
    pub kill_background_on_exit: bool,
}

#[derive(Debug, Clone)]
pub struct StepConfig {
    pub name: String,
    pub kind: StepKind,
    pub working_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub rollback: Option<String>,
    pub condition: Option<Condition>,
}

#[derive(Debug, Clone)]
pub enum StepKind {
    Command(CommandStep),
    Group(Vec<StepConfig>),
}

#[derive(Debug, Clone)]
pub struct CommandStep {
    pub cmd: String,
    pub retries: Option<u32>,
    pub retry_delay: Option<Duration>,
    pub success_pattern: Option<Regex>,
    pub background: bool,
    /// Label recorded with the tracked process; background steps only.
    pub description: Option<String>,
    pub log_layout: LogLayout,
}

/// When a conditional step runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    EnvSet(String),
    StepRan(String),
}

impl WorkflowFile {
    /// Construct without validation. Prefer `WorkflowFile::try_from(raw)`.
    pub fn new_unchecked(config: Settings, default: DefaultSection, steps: Vec<StepConfig>) -> Self {
        Self {
            config,
            default,
            steps,
        }
    }
}

impl StepConfig {
    pub fn is_group(&self) -> bool {
        matches!(self.kind, StepKind::Group(_))
    }

    /// Number of steps in this subtree, including this one.
    pub fn count(&self) -> usize {
        match &self.kind {
            StepKind::Command(_) => 1,
            StepKind::Group(children) => 1 + children.iter().map(StepConfig::count).sum::<usize>(),
        }
    }
}
