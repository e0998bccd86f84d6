//! Error taxonomy for a release run.
//!
//! Only [`TagResolutionError`] (and configuration errors detected before the
//! pool starts) abort a run. Every other error here is local to one build job:
//! it ends that job and is reported in the run summary, while sibling jobs
//! keep going.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Tag resolution failed. Fatal for the whole run.
#[derive(Error, Debug)]
pub enum TagResolutionError {
    /// The repository has no tag strictly before HEAD
    #[error("no tag found before HEAD; a nightly run needs a previous release to build against")]
    NoTagFound,

    /// A git command failed
    #[error("git {command} failed: {reason}")]
    Git {
        /// Git subcommand that failed
        command: String,
        /// Stderr or spawn error
        reason: String,
    },

    /// The git executable could not be located
    #[error("git executable not found in PATH")]
    GitNotFound,
}

/// Configuration produced an invalid build matrix
#[derive(Error, Debug)]
pub enum MatrixError {
    /// Target triple not understood
    #[error("unsupported target triple '{triple}'")]
    UnknownTarget {
        /// The offending triple
        triple: String,
    },

    /// Two targets share a platform id
    #[error("target '{triple}' is listed more than once")]
    DuplicateTarget {
        /// The duplicated triple
        triple: String,
    },

    /// A target declares no binaries
    #[error("target '{triple}' declares no binaries")]
    NoBinaries {
        /// The target triple
        triple: String,
    },

    /// A binary name is used twice within one target
    #[error("binary '{binary}' is listed more than once for target '{triple}'")]
    DuplicateBinary {
        /// The target triple
        triple: String,
        /// The duplicated binary
        binary: String,
    },

    /// A feature set contains flags that are mutually exclusive
    #[error(
        "binary '{binary}' on '{triple}' enables mutually exclusive features: {}",
        conflicting.join(", ")
    )]
    ContradictoryFeatures {
        /// The target triple
        triple: String,
        /// The binary whose feature set is invalid
        binary: String,
        /// Flags of one exclusive group that were enabled together
        conflicting: Vec<String>,
    },

    /// `--only` named a platform that is not in the matrix
    #[error("platform '{0}' is not part of the build matrix")]
    UnknownPlatform(String),
}

/// Pre-build preparation failed; the job is blocked
#[derive(Error, Debug)]
pub enum PrepError {
    /// Prep command exited unsuccessfully
    #[error("prep step '{command}' for {job} failed (exit code {status:?}): {stderr}")]
    Failed {
        /// Job identity
        job: String,
        /// Command line that was run
        command: String,
        /// Exit code, if any
        status: Option<i32>,
        /// Captured stderr
        stderr: String,
    },

    /// Prep command could not be started
    #[error("prep step for {job} could not be started: {source}")]
    Spawn {
        /// Job identity
        job: String,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },
}

/// Building one binary failed; the job fails
#[derive(Error, Debug)]
pub enum BuildError {
    /// The toolchain reported an error
    #[error("building {binary} for {job} failed:\n{diagnostics}")]
    Toolchain {
        /// Job identity
        job: String,
        /// Binary being built
        binary: String,
        /// Raw toolchain diagnostics
        diagnostics: String,
    },

    /// Toolchain reported success but the binary is missing
    #[error("toolchain reported success for {binary} on {job} but {path} does not exist")]
    MissingArtifact {
        /// Job identity
        job: String,
        /// Binary being built
        binary: String,
        /// Expected artifact path
        path: PathBuf,
    },

    /// The toolchain exceeded its time limit
    #[error("building {binary} for {job} timed out after {minutes} minutes")]
    Timeout {
        /// Job identity
        job: String,
        /// Binary being built
        binary: String,
        /// Limit that was exceeded
        minutes: u64,
    },

    /// The toolchain could not be started
    #[error("could not start toolchain for {binary} on {job}: {source}")]
    Spawn {
        /// Job identity
        job: String,
        /// Binary being built
        binary: String,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },
}

/// Packaging failed. Packaging is local and deterministic, so this points at an
/// environment problem (disk, permissions) or a bug.
#[derive(Error, Debug)]
pub enum PackagingError {
    /// Filesystem operation failed
    #[error("{context} ({path}): {source}")]
    Io {
        /// What was being done
        context: &'static str,
        /// Path involved
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// A sidecar pattern is not a valid glob
    #[error("invalid sidecar pattern '{pattern}': {source}")]
    InvalidPattern {
        /// The pattern as configured
        pattern: String,
        /// Parse error
        #[source]
        source: glob::PatternError,
    },

    /// A public binary name collides with a sidecar pattern or another binary
    #[error("public name '{0}' would be stripped or overwritten in the bundle")]
    NameCollision(String),
}

/// Release store operation failed
#[derive(Error, Debug)]
pub enum StoreError {
    /// Credentials rejected or missing
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Transport-level failure
    #[error("network error: {0}")]
    Network(String),

    /// Store refused because of size or rate limits
    #[error("quota exceeded: {0}")]
    Quota(String),

    /// No release exists for the tag
    #[error("no release found for tag '{0}'")]
    MissingRelease(String),

    /// Store answered with an unexpected status
    #[error("release store returned {status}: {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Response body or message
        message: String,
    },

    /// Local IO (dry-run output, in-memory store)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Store configuration problem
    #[error("invalid release store configuration: {0}")]
    Config(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => StoreError::Api {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => StoreError::Network(err.to_string()),
        }
    }
}

/// Merging a bundle into the release archive failed; the remote asset is untouched
#[derive(Error, Debug)]
pub enum MergeError {
    /// Fetching the existing archive failed
    #[error("fetching existing archive {name} failed: {source}")]
    Fetch {
        /// Asset name
        name: String,
        /// Store error
        #[source]
        source: StoreError,
    },

    /// Existing archive is not a readable zip
    #[error("existing archive {name} is corrupt: {source}")]
    CorruptArchive {
        /// Asset name
        name: String,
        /// Zip error
        #[source]
        source: zip::result::ZipError,
    },

    /// A bundle file could not be read
    #[error("reading bundle file {path}: {source}")]
    BundleRead {
        /// File path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },
}

/// Uploading the merged archive failed after a successful local merge
#[derive(Error, Debug)]
pub enum PublishError {
    /// The archive could not be serialized
    #[error("encoding archive {name} failed: {source}")]
    Encode {
        /// Asset name
        name: String,
        /// Zip error
        #[source]
        source: zip::result::ZipError,
    },

    /// The store rejected the upload
    #[error("uploading {name} to release {tag} failed: {source}")]
    Upload {
        /// Asset name
        name: String,
        /// Release tag
        tag: String,
        /// Store error
        #[source]
        source: StoreError,
    },
}

/// Adds filesystem context to IO results, producing [`PackagingError`]s
pub trait ErrorExt<T> {
    /// Attach what was being done and the path involved
    fn fs_context(self, context: &'static str, path: &Path) -> Result<T, PackagingError>;
}

impl<T> ErrorExt<T> for std::io::Result<T> {
    fn fs_context(self, context: &'static str, path: &Path) -> Result<T, PackagingError> {
        self.map_err(|source| PackagingError::Io {
            context,
            path: path.to_path_buf(),
            source,
        })
    }
}
