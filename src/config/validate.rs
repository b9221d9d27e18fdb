// src/config/validate.rs

use std::collections::HashSet;
use std::time::Duration;

use regex::Regex;

use crate::config::model::{
    CommandStep, Condition, ConfigSection, RawConfigFile, RawStep, Settings, StepConfig, StepKind,
    WorkflowFile,
};
use crate::errors::{EngineError, Result};
use crate::types::parse_duration;

impl TryFrom<RawConfigFile> for WorkflowFile {
    type Error = EngineError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        ensure_has_steps(&raw)?;
        let settings = validate_settings(&raw.config)?;

        let mut names = StepNames::default();
        let steps = raw
            .steps
            .iter()
            .map(|step| validate_step(step, &mut names))
            .collect::<Result<Vec<_>>>()?;

        Ok(WorkflowFile::new_unchecked(settings, raw.default, steps))
    }
}

fn config_error(message: impl Into<String>) -> EngineError {
    EngineError::ConfigError(message.into())
}

fn ensure_has_steps(cfg: &RawConfigFile) -> Result<()> {
    if cfg.steps.is_empty() {
        return Err(config_error(
            "workflow must contain at least one [[step]] section",
        ));
    }
    Ok(())
}

fn duration(field: &str, value: &str) -> Result<Duration> {
    parse_duration(value).map_err(|e| config_error(format!("{field}: {e}")))
}

fn validate_settings(cfg: &ConfigSection) -> Result<Settings> {
    let poll_interval = duration("[config].poll_interval", &cfg.poll_interval)?;
    if poll_interval.is_zero() {
        return Err(config_error("[config].poll_interval must be greater than 0"));
    }

    Ok(Settings {
        error_message: cfg.error_message.clone(),
        graceful_timeout: duration("[config].graceful_timeout", &cfg.graceful_timeout)?,
        poll_interval,
        settle_timeout: duration("[config].settle_timeout", &cfg.settle_timeout)?,
        retry_delay: duration("[config].retry_delay", &cfg.retry_delay)?,
        kill_background_on_exit: cfg.kill_background_on_exit,
    })
}

/// Names declared so far, in declaration order, across the whole tree.
#[derive(Default)]
struct StepNames {
    all: HashSet<String>,
    commands: HashSet<String>,
}

fn validate_step(raw: &RawStep, names: &mut StepNames) -> Result<StepConfig> {
    let name = raw.name.trim();
    if name.is_empty() {
        return Err(config_error("step names must not be empty"));
    }
    if !names.all.insert(name.to_string()) {
        return Err(config_error(format!("duplicate step name '{name}'")));
    }

    let condition = validate_condition(raw, name, names)?;

    let kind = match (&raw.cmd, raw.steps.is_empty()) {
        (Some(_), false) => {
            return Err(config_error(format!(
                "step '{name}' has both `cmd` and nested `steps`; use one"
            )));
        }
        (None, true) => {
            return Err(config_error(format!(
                "step '{name}' needs either `cmd` or nested `steps`"
            )));
        }
        (Some(cmd), true) => {
            let command = validate_command(raw, name, cmd)?;
            names.commands.insert(name.to_string());
            StepKind::Command(command)
        }
        (None, false) => {
            reject_command_fields_on_group(raw, name)?;
            let children = raw
                .steps
                .iter()
                .map(|child| validate_step(child, names))
                .collect::<Result<Vec<_>>>()?;
            StepKind::Group(children)
        }
    };

    Ok(StepConfig {
        name: name.to_string(),
        kind,
        working_dir: raw.working_dir.clone(),
        env: raw.env.clone(),
        rollback: raw.rollback.clone(),
        condition,
    })
}

fn validate_condition(raw: &RawStep, name: &str, names: &StepNames) -> Result<Option<Condition>> {
    match (&raw.if_env, &raw.if_ran) {
        (Some(_), Some(_)) => Err(config_error(format!(
            "step '{name}' declares both `if_env` and `if_ran`"
        ))),
        (Some(var), None) if var.trim().is_empty() => Err(config_error(format!(
            "step '{name}' has an empty `if_env`"
        ))),
        (Some(var), None) => Ok(Some(Condition::EnvSet(var.trim().to_string()))),
        (None, Some(other)) => {
            if !names.commands.contains(other) {
                return Err(config_error(format!(
                    "step '{name}' has `if_ran = \"{other}\"`, which is not an earlier command step"
                )));
            }
            Ok(Some(Condition::StepRan(other.clone())))
        }
        (None, None) => Ok(None),
    }
}

fn validate_command(raw: &RawStep, name: &str, cmd: &str) -> Result<CommandStep> {
    if cmd.trim().is_empty() {
        return Err(config_error(format!("step '{name}' has an empty `cmd`")));
    }

    if !raw.background && raw.description.is_some() {
        return Err(config_error(format!(
            "step '{name}' declares `description`, which only applies to background steps"
        )));
    }

    if raw.background {
        let offending = [
            ("rollback", raw.rollback.is_some()),
            ("success_pattern", raw.success_pattern.is_some()),
            ("retries", raw.retries.is_some()),
        ];
        if let Some((field, _)) = offending.iter().find(|(_, set)| *set) {
            return Err(config_error(format!(
                "background step '{name}' cannot declare `{field}`"
            )));
        }
    }

    let success_pattern = raw
        .success_pattern
        .as_deref()
        .map(|pattern| {
            Regex::new(pattern).map_err(|e| {
                config_error(format!("step '{name}' has an invalid success_pattern: {e}"))
            })
        })
        .transpose()?;

    let retry_delay = raw
        .retry_delay
        .as_deref()
        .map(|value| duration(&format!("step '{name}' retry_delay"), value))
        .transpose()?;

    Ok(CommandStep {
        cmd: cmd.to_string(),
        retries: raw.retries,
        retry_delay,
        success_pattern,
        background: raw.background,
        description: raw.description.clone(),
        log_layout: raw.log_layout,
    })
}

fn reject_command_fields_on_group(raw: &RawStep, name: &str) -> Result<()> {
    let offending = [
        ("retries", raw.retries.is_some()),
        ("retry_delay", raw.retry_delay.is_some()),
        ("success_pattern", raw.success_pattern.is_some()),
        ("background", raw.background),
        ("description", raw.description.is_some()),
    ];
    match offending.iter().find(|(_, set)| *set) {
        Some((field, _)) => Err(config_error(format!(
            "group step '{name}' cannot declare `{field}`"
        ))),
        None => Ok(()),
    }
}
