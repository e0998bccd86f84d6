//! Top-level error types for the nightly release CLI.
//!
//! Job-local failures live in [`crate::release::error`]; this module only covers
//! errors that abort a whole invocation.

use thiserror::Error;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, AppError>;

/// Main error type for everything that ends a run before or outside the job pool
#[derive(Error, Debug)]
pub enum AppError {
    /// CLI argument errors
    #[error("CLI error: {0}")]
    Cli(#[from] CliError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Release configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Build matrix errors
    #[error("Build matrix error: {0}")]
    Matrix(#[from] crate::release::error::MatrixError),

    /// Tag resolution failed, no job was started
    #[error("Tag resolution failed: {0}")]
    TagResolution(#[from] crate::release::error::TagResolutionError),

    /// Release store setup errors
    #[error("Release store error: {0}")]
    Store(#[from] crate::release::error::StoreError),

    /// Bundle packaging setup errors
    #[error("Packaging error: {0}")]
    Packaging(#[from] crate::release::error::PackagingError),

    /// Local archive errors (offline merge)
    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Local file errors with the operation that hit them
    #[error("{0:#}")]
    Anyhow(#[from] anyhow::Error),
}

/// CLI-specific errors
#[derive(Error, Debug)]
pub enum CliError {
    /// Invalid command line arguments
    #[error("Invalid arguments: {reason}")]
    InvalidArguments {
        /// Reason for the error
        reason: String,
    },
}

impl AppError {
    /// Process exit code for an error that aborted the run.
    ///
    /// Job failures are reported through the run summary (exit code 1);
    /// anything reaching this type stopped the run before or outside the jobs.
    pub fn exit_code(&self) -> i32 {
        2
    }
}
