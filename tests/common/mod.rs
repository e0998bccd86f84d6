//! Fakes shared by the integration tests.
#![allow(dead_code)]

use nightly_publish::config::{BinaryConfig, ReleaseConfig, TargetConfig};
use nightly_publish::release::archive::{ArchiveEntry, ReleaseArchive};
use nightly_publish::release::error::{BuildError, PrepError, TagResolutionError};
use nightly_publish::release::tag::{TagHistory, TagRef};
use nightly_publish::release::{
    BinarySpec, BuildJob, BuiltArtifact, RunOptions, TagSource, Toolchain, Variant,
};
use std::collections::HashSet;
use std::path::Path;

pub const VERSION_TEXT: &str = "rustc 1.89.0-nightly (fake 2025-06-01)\nhost: x86_64-unknown-linux-gnu";

/// Toolchain that writes small fake binaries plus a `.d` sidecar
#[derive(Debug, Default)]
pub struct FakeToolchain {
    pub failing_builds: HashSet<String>,
    pub failing_preps: HashSet<String>,
    pub panicking: HashSet<String>,
    pub hanging: HashSet<String>,
}

impl FakeToolchain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_build(mut self, job_id: &str) -> Self {
        self.failing_builds.insert(job_id.to_string());
        self
    }

    pub fn fail_prep(mut self, job_id: &str) -> Self {
        self.failing_preps.insert(job_id.to_string());
        self
    }

    pub fn panic_on(mut self, job_id: &str) -> Self {
        self.panicking.insert(job_id.to_string());
        self
    }

    pub fn hang_on(mut self, job_id: &str) -> Self {
        self.hanging.insert(job_id.to_string());
        self
    }
}

impl Toolchain for FakeToolchain {
    async fn prepare(&self, job: &BuildJob) -> Result<(), PrepError> {
        if self.failing_preps.contains(&job.id) {
            return Err(PrepError::Failed {
                job: job.id.clone(),
                command: "sudo apt-get install -y musl-tools".to_string(),
                status: Some(100),
                stderr: "E: Unable to locate package musl-tools".to_string(),
            });
        }
        Ok(())
    }

    async fn build(
        &self,
        job: &BuildJob,
        binary: &BinarySpec,
        target_dir: &Path,
    ) -> Result<BuiltArtifact, BuildError> {
        if self.panicking.contains(&job.id) {
            panic!("toolchain exploded on {}", job.id);
        }
        if self.hanging.contains(&job.id) {
            std::future::pending::<()>().await;
        }
        if self.failing_builds.contains(&job.id) {
            return Err(BuildError::Toolchain {
                job: job.id.clone(),
                binary: binary.name.clone(),
                diagnostics: "error[E0425]: cannot find value `x` in this scope".to_string(),
            });
        }

        let dir = target_dir.join(job.triple()).join("release");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join(format!("{}{}", binary.name, job.os.exe_extension()));
        tokio::fs::write(&path, format!("{}:{}", job.id, binary.name))
            .await
            .unwrap();
        tokio::fs::write(dir.join(format!("{}.d", binary.name)), "deps")
            .await
            .unwrap();
        BuiltArtifact::from_path(job, binary, path).await
    }

    async fn version_report(&self, _job: &BuildJob) -> Result<String, BuildError> {
        Ok(VERSION_TEXT.to_string())
    }
}

/// Tag source with a fixed history
#[derive(Debug, Clone, Default)]
pub struct FakeTags(pub TagHistory);

impl FakeTags {
    /// HEAD is one commit past `tag`
    pub fn previous(tag: &str) -> Self {
        Self(TagHistory {
            head: "c0ffee2".to_string(),
            tags: vec![TagRef {
                name: tag.to_string(),
                commit: "c0ffee1".to_string(),
            }],
        })
    }

    /// HEAD carries `head_tag`, one commit past `previous`
    pub fn head_tagged(head_tag: &str, previous: &str) -> Self {
        Self(TagHistory {
            head: "c0ffee2".to_string(),
            tags: vec![
                TagRef {
                    name: head_tag.to_string(),
                    commit: "c0ffee2".to_string(),
                },
                TagRef {
                    name: previous.to_string(),
                    commit: "c0ffee1".to_string(),
                },
            ],
        })
    }

    pub fn none() -> Self {
        Self(TagHistory {
            head: "c0ffee2".to_string(),
            tags: Vec::new(),
        })
    }
}

impl TagSource for FakeTags {
    async fn history(&self) -> Result<TagHistory, TagResolutionError> {
        Ok(self.0.clone())
    }
}

/// Single-target configuration with one binary
pub fn single_target_config(triple: &str, binary: &str) -> ReleaseConfig {
    ReleaseConfig {
        targets: vec![TargetConfig {
            triple: triple.to_string(),
            prep: None,
            binaries: vec![BinaryConfig {
                name: binary.to_string(),
                variant: Variant::Full,
                features: vec!["feature_capable".to_string()],
                default_features: true,
            }],
        }],
        ..ReleaseConfig::default()
    }
}

pub fn options(work_root: &Path) -> RunOptions {
    RunOptions {
        concurrency: 2,
        work_root: work_root.to_path_buf(),
        ..RunOptions::default()
    }
}

/// Zip bytes of an archive holding `entries`
pub fn zip_of(name: &str, entries: &[(&str, &[u8], u32)]) -> Vec<u8> {
    ReleaseArchive::empty(name)
        .merge(
            entries
                .iter()
                .map(|(n, data, mode)| (n.to_string(), ArchiveEntry::file(data.to_vec(), *mode))),
        )
        .to_zip_bytes()
        .unwrap()
}
