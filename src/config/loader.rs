// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{RawConfigFile, WorkflowFile};
use crate::errors::Result;

/// Read and deserialize a workflow file without validating it.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let contents = fs::read_to_string(path.as_ref())?;
    parse_str(&contents)
}

pub fn parse_str(contents: &str) -> Result<RawConfigFile> {
    Ok(toml::from_str(contents)?)
}

/// Read, deserialize and validate a workflow file.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<WorkflowFile> {
    WorkflowFile::try_from(load_from_path(path)?)
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("Taskrail.toml")
}
