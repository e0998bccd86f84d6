//! Toolchain invocation.
//!
//! The compiler is an external collaborator behind the [`Toolchain`] trait.
//! [`CargoToolchain`] is the production implementation; tests inject fakes.
//!
//! # Module Organization
//!
//! - [`cargo`] - `cargo +<channel> build` invocation
//! - [`checksum`] - SHA-256 of built artifacts and archives
//! - [`tool_detection`] - Locating `cargo`, `rustc` and `git`

mod cargo;
pub mod checksum;
pub mod tool_detection;

pub use cargo::CargoToolchain;

use super::error::{BuildError, PrepError};
use super::matrix::{BinarySpec, BuildJob};
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};

/// A binary produced by the toolchain for one job
#[derive(Debug, Clone, Serialize)]
pub struct BuiltArtifact {
    /// Cargo binary name
    pub binary_name: String,
    /// Platform id of the producing job
    pub platform_id: String,
    /// Size in bytes
    pub size: u64,
    /// Hex SHA-256 of the binary
    pub sha256: String,
    /// Location inside the job-scoped target directory
    pub path: PathBuf,
}

impl BuiltArtifact {
    /// Records an artifact that exists at `path`
    pub async fn from_path(
        job: &BuildJob,
        binary: &BinarySpec,
        path: PathBuf,
    ) -> Result<Self, BuildError> {
        let missing = || BuildError::MissingArtifact {
            job: job.id.clone(),
            binary: binary.name.clone(),
            path: path.clone(),
        };
        let metadata = tokio::fs::metadata(&path).await.map_err(|_| missing())?;
        if !metadata.is_file() {
            return Err(missing());
        }
        let sha256 = checksum::calculate_sha256(&path)
            .await
            .map_err(|_| missing())?;

        Ok(Self {
            binary_name: binary.name.clone(),
            platform_id: job.id.clone(),
            size: metadata.len(),
            sha256,
            path,
        })
    }
}

/// External compiler toolchain
pub trait Toolchain: Send + Sync {
    /// Runs the job's pre-build preparation step, if any
    fn prepare(&self, job: &BuildJob) -> impl Future<Output = Result<(), PrepError>> + Send;

    /// Builds one binary of a job into the job-scoped `target_dir`
    fn build(
        &self,
        job: &BuildJob,
        binary: &BinarySpec,
        target_dir: &Path,
    ) -> impl Future<Output = Result<BuiltArtifact, BuildError>> + Send;

    /// Human-readable toolchain version report for the job's channel
    fn version_report(
        &self,
        job: &BuildJob,
    ) -> impl Future<Output = Result<String, BuildError>> + Send;
}
