//! The `run` subcommand: a full release run.

use crate::cli::{RunArgs, RuntimeConfig};
use crate::config::ReleaseConfig;
use crate::error::{CliError, Result};
use crate::release::matrix::filter_jobs;
use crate::release::{
    BuildJob, CargoToolchain, DryRunStore, GitHubStore, GitTagSource, JobState, MemoryStore,
    Orchestrator, ReleaseContext, ReleaseStore, ReleaseTag, RunOptions, RunSummary, build_matrix,
};
use anyhow::Context;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Runs the pipeline and returns the exit code derived from the summary
pub async fn run_release(
    config: &ReleaseConfig,
    args: &RunArgs,
    runtime: &RuntimeConfig,
    cancel: CancellationToken,
) -> Result<i32> {
    let jobs = filter_jobs(build_matrix(config)?, &args.only)?;
    let repository = args.repository.clone().or_else(|| config.repository.clone());

    let mut options = RunOptions {
        keep_work_dir: args.keep_work_dir,
        sidecar_patterns: config.sidecar_patterns.clone(),
        ..RunOptions::default()
    };
    if let Some(jobs) = args.jobs {
        options.concurrency = jobs;
    }
    if let Some(work_dir) = &args.work_dir {
        options.work_root = work_dir.clone();
    }

    runtime.section(&format!(
        "Releasing {} {} for {} target(s)",
        config.project,
        config.channel,
        jobs.len()
    ))?;
    runtime.verbose_println(&format!("Work directory: {}", options.work_root.display()))?;

    let toolchain = Arc::new(CargoToolchain::new(&args.manifest_dir, &config.toolchain));

    let summary = match (&args.dry_run, repository) {
        (Some(out_dir), Some(repository)) => {
            runtime.progress(&format!(
                "Dry run: reading archives from {}, writing to {}",
                repository,
                out_dir.display()
            ))?;
            let store = DryRunStore::new(
                GitHubStore::new(&repository, args.token.as_deref())?,
                out_dir,
            );
            execute(config, args, toolchain, store, options, jobs, cancel).await?
        }
        (Some(out_dir), None) => {
            runtime.progress(&format!(
                "Dry run without a repository: archives start empty, written to {}",
                out_dir.display()
            ))?;
            let store = DryRunStore::new(MemoryStore::new(), out_dir);
            execute(config, args, toolchain, store, options, jobs, cancel).await?
        }
        (None, Some(repository)) => {
            if args.token.as_deref().is_none_or(|t| t.trim().is_empty()) {
                return Err(CliError::InvalidArguments {
                    reason: "publishing needs a token (--token or GITHUB_TOKEN)".to_string(),
                }
                .into());
            }
            let store = GitHubStore::new(&repository, args.token.as_deref())?;
            execute(config, args, toolchain, store, options, jobs, cancel).await?
        }
        (None, None) => {
            return Err(CliError::InvalidArguments {
                reason: "no release repository: pass --repository, set `repository` in the config, or use --dry-run".to_string(),
            }
            .into());
        }
    };

    print_summary(&summary, runtime)?;

    if let Some(path) = &args.report {
        tokio::fs::write(path, serde_json::to_vec_pretty(&summary)?)
            .await
            .with_context(|| format!("writing run report {}", path.display()))?;
        runtime.verbose_println(&format!("Run report written to {}", path.display()))?;
    }

    Ok(summary.exit_code())
}

async fn execute<S: ReleaseStore + 'static>(
    config: &ReleaseConfig,
    args: &RunArgs,
    toolchain: Arc<CargoToolchain>,
    store: S,
    options: RunOptions,
    jobs: Vec<BuildJob>,
    cancel: CancellationToken,
) -> Result<RunSummary> {
    let orchestrator = Orchestrator::new(
        &config.project,
        &config.channel,
        toolchain,
        Arc::new(store),
        options,
    )?;

    match &args.tag {
        Some(tag) => {
            let ctx = ReleaseContext::new(&config.project, &config.channel, ReleaseTag::new(tag));
            Ok(orchestrator.run_with_context(ctx, jobs, cancel).await)
        }
        None => {
            let tags = GitTagSource::new(&args.repo_path);
            Ok(orchestrator.run(&tags, jobs, cancel).await?)
        }
    }
}

fn print_summary(summary: &RunSummary, runtime: &RuntimeConfig) -> std::io::Result<()> {
    runtime.section(&format!("Release {} summary", summary.tag))?;
    for job in &summary.jobs {
        let detail = match (&job.state, &job.published) {
            (JobState::Published, Some(published)) => format!(
                "published {} ({} bytes{})",
                published.asset_name,
                published.size,
                if published.replaced { ", replaced" } else { "" }
            ),
            // Diagnostics can span many lines; the first one names the failure
            (state, _) => state.to_string().lines().next().unwrap_or_default().to_string(),
        };
        runtime.indent(&format!(
            "{:<32} {:>7.1}s  {}",
            job.job_id,
            job.duration_ms as f64 / 1000.0,
            detail
        ))?;
    }

    let message = format!(
        "{} published, {} failed, {} blocked",
        summary.published_count(),
        summary.failed_count(),
        summary.blocked_count()
    );
    if summary.is_success() {
        runtime.success(&message)
    } else {
        runtime.output().error(&message)
    }
}
