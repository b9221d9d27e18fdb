// src/cli.rs

//! Command-line flags for the `taskrail` binary.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `taskrail`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "taskrail",
    version,
    about = "Run multi-step workflows with rollback and process-tree cleanup.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the workflow file (TOML).
    #[arg(long, value_name = "PATH", default_value = "Taskrail.toml")]
    pub config: String,

    /// Parse + validate, print the step tree, but don't execute anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Verbosity. Falls back to `TASKRAIL_LOG`, then `info`.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Leave background processes running when the workflow ends.
    #[arg(long)]
    pub keep_background: bool,
}

/// Accepted values of `--log-level`.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Parse `std::env::args`, exiting with usage on error.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
