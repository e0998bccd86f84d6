//! Bundle assembly for one build job.
//!
//! Given the same artifacts and version text, two runs produce byte-identical
//! bundles except for the `generated:` line of the version report.

use super::{ReleaseContext, ReleaseTag};
use super::archive::ArchiveEntry;
use super::builder::BuiltArtifact;
use super::error::{ErrorExt, MergeError, PackagingError};
use super::matrix::{Arch, BuildJob};
use super::utils::fs;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Unix mode of executables in the bundle
pub const EXECUTABLE_MODE: u32 = 0o755;

/// Unix mode of plain files in the bundle
pub const FILE_MODE: u32 = 0o644;

/// First-line prefix of the version report; the only non-deterministic line
pub const GENERATED_PREFIX: &str = "generated: ";

/// One file of a sealed bundle
#[derive(Debug, Clone, Serialize)]
pub struct BundleFile {
    /// Public name, also the archive entry name
    pub name: String,
    /// Location in the staging directory
    pub path: PathBuf,
    /// Unix permission bits
    pub unix_mode: u32,
}

/// Packaged output of one build job, sealed once created
#[derive(Debug, Clone, Serialize)]
pub struct Bundle {
    tag: ReleaseTag,
    platform_id: String,
    arch: Arch,
    staging_dir: PathBuf,
    files: Vec<BundleFile>,
    version_report: String,
    stripped: Vec<String>,
}

impl Bundle {
    pub fn tag(&self) -> &ReleaseTag {
        &self.tag
    }

    pub fn platform_id(&self) -> &str {
        &self.platform_id
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Files sorted by name
    pub fn files(&self) -> &[BundleFile] {
        &self.files
    }

    /// Name of the version report file
    pub fn version_report(&self) -> &str {
        &self.version_report
    }

    /// Sidecar files removed from the staging directory
    pub fn stripped(&self) -> &[String] {
        &self.stripped
    }

    /// Reads every bundle file as an archive entry
    pub async fn entries(&self) -> Result<Vec<(String, ArchiveEntry)>, MergeError> {
        let mut entries = Vec::with_capacity(self.files.len());
        for file in &self.files {
            let data = tokio::fs::read(&file.path)
                .await
                .map_err(|source| MergeError::BundleRead {
                    path: file.path.clone(),
                    source,
                })?;
            entries.push((file.name.clone(), ArchiveEntry::file(data, file.unix_mode)));
        }
        Ok(entries)
    }
}

/// Stages, strips, renames and seals build artifacts
#[derive(Debug, Clone)]
pub struct Packager {
    sidecars: Vec<glob::Pattern>,
}

impl Packager {
    /// Creates a packager that strips files matching `sidecar_patterns`
    pub fn new(sidecar_patterns: &[String]) -> Result<Self, PackagingError> {
        let sidecars = sidecar_patterns
            .iter()
            .map(|p| {
                glob::Pattern::new(p).map_err(|source| PackagingError::InvalidPattern {
                    pattern: p.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { sidecars })
    }

    fn is_sidecar(&self, name: &str) -> bool {
        self.sidecars.iter().any(|p| p.matches(name))
    }

    /// Public file name of a binary: `<name>_<channel><exe extension>`
    pub fn public_name(ctx: &ReleaseContext, job: &BuildJob, binary_name: &str) -> String {
        format!(
            "{}{}{}",
            binary_name,
            ctx.binary_suffix(),
            job.os.exe_extension()
        )
    }

    /// Packages a job's artifacts into `<work_dir>/<tag>`.
    ///
    /// The staging directory is erased first so leftovers of an earlier run
    /// never leak into the bundle.
    pub async fn package(
        &self,
        ctx: &ReleaseContext,
        job: &BuildJob,
        artifacts: &[BuiltArtifact],
        version_text: &str,
        work_dir: &Path,
    ) -> Result<Bundle, PackagingError> {
        let staging_dir = work_dir.join(ctx.tag.as_str());
        fs::create_dir_all(&staging_dir, true)
            .await
            .fs_context("creating staging directory", &staging_dir)?;

        for artifact in artifacts {
            self.stage_artifact(artifact, &staging_dir).await?;
        }

        let stripped = self.strip_sidecars(&staging_dir).await?;
        if !stripped.is_empty() {
            log::debug!("[{}] Stripped sidecars: {}", job.id, stripped.join(", "));
        }

        let mut files = Vec::with_capacity(artifacts.len() + 1);
        let mut public_names = BTreeSet::new();
        for artifact in artifacts {
            let staged = staging_dir.join(file_name(&artifact.path));
            let public = Self::public_name(ctx, job, &artifact.binary_name);
            if self.is_sidecar(&public) || !public_names.insert(public.clone()) {
                return Err(PackagingError::NameCollision(public));
            }
            let target = staging_dir.join(&public);
            tokio::fs::rename(&staged, &target)
                .await
                .fs_context("renaming binary", &staged)?;
            files.push(BundleFile {
                name: public,
                path: target,
                unix_mode: EXECUTABLE_MODE,
            });
        }

        let report_name = ctx.version_report_name();
        if !public_names.insert(report_name.clone()) {
            return Err(PackagingError::NameCollision(report_name));
        }
        let report_path = staging_dir.join(&report_name);
        let report = render_version_report(ctx, job, &files, version_text);
        tokio::fs::write(&report_path, report)
            .await
            .fs_context("writing version report", &report_path)?;
        files.push(BundleFile {
            name: report_name.clone(),
            path: report_path,
            unix_mode: FILE_MODE,
        });

        files.sort_by(|a, b| a.name.cmp(&b.name));

        log::info!(
            "[{}] Packaged {} file(s) in {}",
            job.id,
            files.len(),
            staging_dir.display()
        );

        Ok(Bundle {
            tag: ctx.tag.clone(),
            platform_id: job.id.clone(),
            arch: job.arch,
            staging_dir,
            files,
            version_report: report_name,
            stripped,
        })
    }

    /// Copies the artifact and its same-stem siblings (`qsv.d`, `qsv.pdb`)
    async fn stage_artifact(
        &self,
        artifact: &BuiltArtifact,
        staging_dir: &Path,
    ) -> Result<(), PackagingError> {
        let name = file_name(&artifact.path);
        fs::copy_file(&artifact.path, &staging_dir.join(&name))
            .await
            .fs_context("copying artifact", &artifact.path)?;

        let Some(source_dir) = artifact.path.parent() else {
            return Ok(());
        };
        let sibling_prefix = format!("{}.", artifact.binary_name);
        let mut entries = tokio::fs::read_dir(source_dir)
            .await
            .fs_context("listing artifact directory", source_dir)?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .fs_context("listing artifact directory", source_dir)?
        {
            let sibling = entry.file_name().to_string_lossy().into_owned();
            if sibling == name || !sibling.starts_with(&sibling_prefix) {
                continue;
            }
            let is_file = entry
                .file_type()
                .await
                .fs_context("reading file type", &entry.path())?
                .is_file();
            if is_file {
                fs::copy_file(&entry.path(), &staging_dir.join(&sibling))
                    .await
                    .fs_context("copying sidecar", &entry.path())?;
            }
        }
        Ok(())
    }

    /// Removes sidecar files from the top level of the staging directory
    async fn strip_sidecars(&self, staging_dir: &Path) -> Result<Vec<String>, PackagingError> {
        let mut stripped = Vec::new();
        for entry in walkdir::WalkDir::new(staging_dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| PackagingError::Io {
                context: "scanning staging directory",
                path: staging_dir.to_path_buf(),
                source: e.into(),
            })?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().is_file() && self.is_sidecar(&name) {
                tokio::fs::remove_file(entry.path())
                    .await
                    .fs_context("removing sidecar", entry.path())?;
                stripped.push(name);
            }
        }
        Ok(stripped)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn render_version_report(
    ctx: &ReleaseContext,
    job: &BuildJob,
    files: &[BundleFile],
    version_text: &str,
) -> String {
    let binaries = files
        .iter()
        .map(|f| f.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "{}{}\nproject: {}\ntag: {}\ntarget: {}\ntoolchain: {}\nbinaries: {}\n\n{}\n",
        GENERATED_PREFIX,
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        ctx.project,
        ctx.tag,
        job.id,
        job.toolchain_channel,
        binaries,
        version_text.trim_end()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReleaseConfig;
    use crate::release::matrix::build_matrix;

    #[test]
    fn invalid_pattern_is_reported() {
        assert!(matches!(
            Packager::new(&["[".to_string()]),
            Err(PackagingError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn public_names_carry_suffix_and_extension() {
        let jobs = build_matrix(&ReleaseConfig::default()).unwrap();
        let ctx = ReleaseContext::new("qsv", "nightly", ReleaseTag::new("v1.2.0"));
        assert_eq!(Packager::public_name(&ctx, &jobs[0], "qsv"), "qsv_nightly");
        let windows = jobs.iter().find(|j| j.id.contains("windows")).unwrap();
        assert_eq!(
            Packager::public_name(&ctx, windows, "qsvlite"),
            "qsvlite_nightly.exe"
        );
    }
}
