// src/config/mod.rs

//! Workflow files: TOML model (`model.rs`), loading (`loader.rs`) and
//! validation into a typed [`WorkflowFile`] (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, parse_str};
pub use model::{
    CommandStep, Condition, ConfigSection, DefaultSection, RawConfigFile, RawStep, Settings,
    StepConfig, StepKind, WorkflowFile,
};
