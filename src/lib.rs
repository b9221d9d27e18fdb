// src/lib.rs

pub mod cli;
pub mod config;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod pipeline;
pub mod process;
pub mod stream;
pub mod types;
pub mod workflow;

use std::path::PathBuf;

use anyhow::anyhow;
use tracing::{info, warn};

use crate::cli::CliArgs;
use crate::config::load_and_validate;
use crate::errors::{EngineError, Result};
use crate::exec::Executor;
use crate::process::ProcessManager;
use crate::workflow::{Workflow, config_root_dir, manager_settings};

/// High-level entry point used by `main.rs`.
///
/// Loads the workflow, runs it until it finishes or Ctrl-C arrives, then
/// kills tracked background processes unless asked to keep them.
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let file = load_and_validate(&config_path)?;

    if args.dry_run {
        print!("{}", workflow::describe(&file));
        return Ok(());
    }

    let processes = ProcessManager::new(manager_settings(&file.config));
    let kill_on_exit = file.config.kill_background_on_exit && !args.keep_background;
    let workflow = Workflow::new(
        file,
        config_root_dir(&config_path),
        Executor::new(processes.clone()),
    );

    let outcome = tokio::select! {
        result = workflow.run() => result.map_err(EngineError::from),
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => {
                warn!("interrupted; aborting workflow");
                Err(EngineError::Other(anyhow!("interrupted by Ctrl-C")))
            }
            Err(e) => Err(EngineError::IoError(e)),
        },
    };

    // Cleanup runs whether the workflow succeeded, failed or was interrupted.
    if kill_on_exit {
        processes.kill_all().await;
    } else if processes.count() > 0 {
        info!(count = processes.count(), "leaving background processes running");
    }

    let ctx = outcome?;
    info!(steps = ctx.outputs.len(), "workflow finished");
    Ok(())
}
