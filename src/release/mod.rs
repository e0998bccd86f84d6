//! Nightly release pipeline.
//!
//! A run resolves the previous release tag once, then drives every build job
//! through Build → Package → Merge → Publish on its own worker.
//!
//! # Module Organization
//!
//! - [`tag`] - Previous tag resolution from git history
//! - [`matrix`] - Build job enumeration from configuration
//! - [`builder`] - Toolchain invocation per binary
//! - [`packager`] - Bundle staging, sidecar stripping, renaming, version report
//! - [`archive`] - Release archive model and additive merge
//! - [`publisher`] - Overwriting upload of merged archives
//! - [`store`] - Release store backends
//! - [`orchestrator`] - Worker pool and run summary
//! - [`state`] - Per-job state machine

pub mod archive;
pub mod builder;
pub mod error;
pub mod matrix;
pub mod orchestrator;
pub mod packager;
pub mod publisher;
pub mod state;
pub mod store;
pub mod tag;
mod utils;

pub use archive::{ArchiveEntry, ArtifactMerger, ReleaseArchive};
pub use builder::{BuiltArtifact, CargoToolchain, Toolchain};
pub use matrix::{BinarySpec, BuildJob, FeatureSet, OsFamily, Variant, build_matrix};
pub use orchestrator::{JobReport, Orchestrator, RunOptions, RunSummary};
pub use packager::{Bundle, BundleFile, Packager};
pub use publisher::{PublishResult, Publisher};
pub use state::{JobState, Stage};
pub use store::{DryRunStore, GitHubStore, MemoryStore, ReleaseStore, UploadReceipt};
pub use tag::{GitTagSource, TagSource, resolve_previous_tag};

use serde::Serialize;
use std::fmt;

/// Immutable release tag, the publish namespace of a run
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ReleaseTag(String);

impl ReleaseTag {
    /// Wraps a tag name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Tag name as written in the repository
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parses the tag as a semantic version, accepting a leading `v`
    pub fn version(&self) -> Option<semver::Version> {
        let raw = self.0.strip_prefix('v').unwrap_or(&self.0);
        semver::Version::parse(raw).ok()
    }
}

impl fmt::Display for ReleaseTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Run-wide parameters threaded through every component.
///
/// The tag and channel are explicit here instead of ambient configuration so
/// that each stage names exactly what it publishes into.
#[derive(Debug, Clone, Serialize)]
pub struct ReleaseContext {
    /// Project name, prefix of archive and report names
    pub project: String,
    /// Release channel (e.g. `nightly`)
    pub channel: String,
    /// Tag the run publishes against
    pub tag: ReleaseTag,
}

impl ReleaseContext {
    /// Creates a context for one run
    pub fn new(project: impl Into<String>, channel: impl Into<String>, tag: ReleaseTag) -> Self {
        Self {
            project: project.into(),
            channel: channel.into(),
            tag,
        }
    }

    /// Release asset name for a platform: `{project}-{tag}-{platform_id}.zip`
    pub fn archive_name(&self, platform_id: &str) -> String {
        format!("{}-{}-{}.zip", self.project, self.tag, platform_id)
    }

    /// Suffix appended to every binary name, e.g. `_nightly`
    pub fn binary_suffix(&self) -> String {
        format!("_{}", self.channel)
    }

    /// File name of the toolchain version report
    pub fn version_report_name(&self) -> String {
        format!("{}_{}_rust_version_info.txt", self.project, self.channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_release_layout() {
        let ctx = ReleaseContext::new("qsv", "nightly", ReleaseTag::new("v1.2.0"));
        assert_eq!(
            ctx.archive_name("x86_64-unknown-linux-gnu"),
            "qsv-v1.2.0-x86_64-unknown-linux-gnu.zip"
        );
        assert_eq!(ctx.binary_suffix(), "_nightly");
        assert_eq!(
            ctx.version_report_name(),
            "qsv_nightly_rust_version_info.txt"
        );
    }

    #[test]
    fn tag_version_accepts_v_prefix() {
        assert_eq!(
            ReleaseTag::new("v1.2.0").version(),
            Some(semver::Version::new(1, 2, 0))
        );
        assert_eq!(ReleaseTag::new("0.9.1").version(), Some(semver::Version::new(0, 9, 1)));
        assert_eq!(ReleaseTag::new("nightly").version(), None);
    }
}
