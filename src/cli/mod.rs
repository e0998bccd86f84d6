//! Command line interface for nightly-publish.
//!
//! Parses arguments, loads the release configuration and dispatches to the
//! subcommands in [`commands`].

mod args;
pub mod commands;
mod output;

pub use args::{Args, Command, MatrixArgs, MergeArgs, RepoArgs, RunArgs, RuntimeConfig};
pub use output::OutputManager;

use crate::config::ReleaseConfig;
use crate::error::{CliError, Result};
use tokio_util::sync::CancellationToken;

/// Main CLI entry point; returns the process exit code
pub async fn run(args: Args, cancel: CancellationToken) -> Result<i32> {
    args.validate()
        .map_err(|reason| CliError::InvalidArguments { reason })?;

    let runtime = RuntimeConfig::from(&args);
    let config = ReleaseConfig::load(args.config.as_deref())?;

    match &args.command {
        Command::Run(run) => commands::run_release(&config, run, &runtime, cancel).await,
        Command::Matrix(matrix) => commands::print_matrix(&config, matrix, &runtime),
        Command::ResolveTag(repo) => commands::print_previous_tag(repo, &runtime).await,
        Command::Merge(merge) => commands::merge_local(&config, merge, &runtime).await,
    }
}
