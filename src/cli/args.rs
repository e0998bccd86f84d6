//! Command line argument parsing and validation.

use crate::config::validate_repository;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Nightly multi-target release builder
#[derive(Parser, Debug)]
#[command(
    name = "nightly-publish",
    version,
    about = "Builds nightly binaries for every target and publishes them into the release archives",
    long_about = "Resolves the previous release tag, builds every binary variant of every target with a pinned
toolchain, packages them with a version report, merges each bundle into the platform's existing
release archive and uploads the result, replacing the asset of the same name.

Usage:
  nightly-publish run --repository owner/repo
  nightly-publish run --dry-run ./out --only x86_64-unknown-linux-gnu
  nightly-publish matrix
  nightly-publish merge --archive qsv-v1.2.0-x86_64-apple-darwin.zip --bundle-dir ./v1.2.0

Exit code 0 = every job published, 1 = at least one job did not publish,
2 = configuration or tag resolution error."
)]
pub struct Args {
    /// Release configuration file (default: ./nightly-release.toml if present)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Show debug output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only print errors and machine-readable output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build, package, merge and publish every job
    Run(RunArgs),

    /// Print the resolved build matrix as JSON
    Matrix(MatrixArgs),

    /// Print the previous release tag
    ResolveTag(RepoArgs),

    /// Merge a local bundle directory into a local archive
    Merge(MergeArgs),
}

#[derive(clap::Args, Debug, Default)]
pub struct RepoArgs {
    /// Repository whose tags are inspected
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub repo_path: PathBuf,
}

#[derive(clap::Args, Debug, Default)]
pub struct MatrixArgs {
    /// Only these platforms (comma separated target triples)
    #[arg(long, value_name = "TRIPLES", value_delimiter = ',')]
    pub only: Vec<String>,
}

#[derive(clap::Args, Debug, Default)]
pub struct RunArgs {
    /// Publish against this tag instead of resolving it from git history
    #[arg(long, value_name = "TAG")]
    pub tag: Option<String>,

    /// Release repository as owner/repo (overrides the config file)
    #[arg(long, value_name = "OWNER/REPO")]
    pub repository: Option<String>,

    /// Release store API token
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Maximum concurrent jobs (default: number of CPUs)
    #[arg(short, long, value_name = "N")]
    pub jobs: Option<usize>,

    /// Parent directory of the job work directories (default: a fresh temp dir)
    #[arg(long, value_name = "DIR")]
    pub work_dir: Option<PathBuf>,

    /// Keep job work directories after the run
    #[arg(long)]
    pub keep_work_dir: bool,

    /// Write merged archives to DIR/<tag>/ instead of uploading them
    #[arg(long, value_name = "DIR")]
    pub dry_run: Option<PathBuf>,

    /// Only these platforms (comma separated target triples)
    #[arg(long, value_name = "TRIPLES", value_delimiter = ',')]
    pub only: Vec<String>,

    /// Write the run summary as JSON
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Repository whose tags are inspected
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub repo_path: PathBuf,

    /// Directory of the Cargo project to build
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub manifest_dir: PathBuf,
}

#[derive(clap::Args, Debug)]
pub struct MergeArgs {
    /// Existing archive; a missing file starts from an empty archive
    #[arg(long, value_name = "ZIP")]
    pub archive: PathBuf,

    /// Directory whose top-level files are merged into the archive
    #[arg(long, value_name = "DIR")]
    pub bundle_dir: PathBuf,

    /// Where to write the merged archive (default: overwrite --archive)
    #[arg(short, long, value_name = "ZIP")]
    pub output: Option<PathBuf>,
}

impl Args {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate arguments for consistency
    pub fn validate(&self) -> Result<(), String> {
        if let Command::Run(run) = &self.command {
            if run.jobs == Some(0) {
                return Err("--jobs must be at least 1".to_string());
            }
            if let Some(tag) = &run.tag {
                if tag.trim().is_empty() {
                    return Err("--tag cannot be empty".to_string());
                }
            }
            if let Some(repository) = &run.repository {
                validate_repository(repository).map_err(|e| e.to_string())?;
            }
        }
        Ok(())
    }
}

/// Configuration derived from command line arguments
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    output: super::OutputManager,
}

impl From<&Args> for RuntimeConfig {
    fn from(args: &Args) -> Self {
        Self {
            output: super::OutputManager::new(args.verbose, args.quiet),
        }
    }
}

impl RuntimeConfig {
    /// Get a reference to the output manager
    pub fn output(&self) -> &super::OutputManager {
        &self.output
    }

    pub fn verbose_println(&self, message: &str) -> std::io::Result<()> {
        self.output.verbose(message)
    }

    pub fn success(&self, message: &str) -> std::io::Result<()> {
        self.output.success(message)
    }

    pub fn warn(&self, message: &str) -> std::io::Result<()> {
        self.output.warn(message)
    }

    pub fn progress(&self, message: &str) -> std::io::Result<()> {
        self.output.progress(message)
    }

    pub fn section(&self, title: &str) -> std::io::Result<()> {
        self.output.section(title)
    }

    pub fn indent(&self, message: &str) -> std::io::Result<()> {
        self.output.indent(message)
    }
}
