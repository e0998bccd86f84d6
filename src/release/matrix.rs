//! Build matrix: static configuration to an ordered list of build jobs.

use super::error::MatrixError;
use crate::config::{ReleaseConfig, TargetConfig};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;

/// CPU architecture of a build target.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    /// x86_64 / AMD64 (64-bit)
    X86_64,
    /// x86 / i686 (32-bit)
    X86,
    /// AArch64 / ARM64 (64-bit)
    AArch64,
    /// ARM with hard-float (32-bit)
    Armhf,
    /// ARM with soft-float (32-bit)
    Armel,
    /// RISC-V (64-bit)
    Riscv64,
}

impl Arch {
    /// Detects the architecture from the first component of a target triple
    pub fn from_triple(triple: &str) -> Option<Self> {
        let cpu = triple.split('-').next()?;
        if cpu == "x86_64" {
            Some(Arch::X86_64)
        } else if matches!(cpu, "i586" | "i686") {
            Some(Arch::X86)
        } else if cpu == "aarch64" {
            Some(Arch::AArch64)
        } else if cpu.starts_with("arm") && triple.ends_with("hf") {
            Some(Arch::Armhf)
        } else if cpu.starts_with("arm") {
            Some(Arch::Armel)
        } else if cpu.starts_with("riscv64") {
            Some(Arch::Riscv64)
        } else {
            None
        }
    }
}

/// Operating system family of a build target
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    Linux,
    MacOs,
    Windows,
    FreeBsd,
}

impl OsFamily {
    /// Detects the OS family from a target triple
    pub fn from_triple(triple: &str) -> Option<Self> {
        if triple.contains("-windows") {
            Some(OsFamily::Windows)
        } else if triple.contains("-apple-darwin") {
            Some(OsFamily::MacOs)
        } else if triple.contains("-linux") {
            Some(OsFamily::Linux)
        } else if triple.contains("-freebsd") {
            Some(OsFamily::FreeBsd)
        } else {
            None
        }
    }

    /// Executable file extension including the dot, empty when none
    pub fn exe_extension(self) -> &'static str {
        match self {
            OsFamily::Windows => ".exe",
            _ => "",
        }
    }
}

/// Flavour of a binary within a job
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// Full-featured binary
    Full,
    /// Reduced "lite" binary
    Lite,
    /// Restricted datapusher binary
    DataPusher,
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Variant::Full => "full",
            Variant::Lite => "lite",
            Variant::DataPusher => "datapusher",
        })
    }
}

/// Sorted, de-duplicated set of cargo feature flags
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FeatureSet(BTreeSet<String>);

impl FeatureSet {
    /// Builds a feature set, dropping empty names
    pub fn new<I, S>(features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            features
                .into_iter()
                .map(Into::into)
                .map(|f: String| f.trim().to_string())
                .filter(|f| !f.is_empty())
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, feature: &str) -> bool {
        self.0.contains(feature)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Comma-separated form for `cargo --features`
    pub fn to_cargo_arg(&self) -> String {
        self.iter().collect::<Vec<_>>().join(",")
    }

    /// Returns the first exclusive group with more than one member enabled
    pub fn conflicts(&self, exclusive_groups: &[Vec<String>]) -> Option<Vec<String>> {
        exclusive_groups.iter().find_map(|group| {
            let enabled: Vec<String> = group
                .iter()
                .filter(|f| self.contains(f))
                .cloned()
                .collect();
            (enabled.len() > 1).then_some(enabled)
        })
    }
}

/// One binary to build within a job
#[derive(Clone, Debug, Serialize)]
pub struct BinarySpec {
    /// Cargo binary name
    pub name: String,
    /// Variant of the binary
    pub variant: Variant,
    /// Features passed to cargo
    pub features: FeatureSet,
    /// Whether default features stay enabled
    pub default_features: bool,
}

/// Command that must succeed before a job can build
#[derive(Clone, Debug, Serialize)]
pub struct PrepStep {
    /// Program and arguments
    pub command: Vec<String>,
}

impl PrepStep {
    /// Shell-like rendering for logs and errors
    pub fn display(&self) -> String {
        self.command.join(" ")
    }
}

/// One platform/architecture build job. Immutable for the run.
#[derive(Clone, Debug, Serialize)]
pub struct BuildJob {
    /// Platform id (the target triple); keys the release asset
    pub id: String,
    /// Operating system family
    pub os: OsFamily,
    /// CPU architecture
    pub arch: Arch,
    /// Binaries in build order
    pub binaries: Vec<BinarySpec>,
    /// Pinned toolchain channel
    pub toolchain_channel: String,
    /// Optional pre-build preparation
    pub prep: Option<PrepStep>,
}

impl BuildJob {
    /// Target triple passed to the toolchain
    pub fn triple(&self) -> &str {
        &self.id
    }

    /// Binary names in build order
    pub fn binary_names(&self) -> Vec<&str> {
        self.binaries.iter().map(|b| b.name.as_str()).collect()
    }
}

/// Expands configuration into build jobs, in configuration order
pub fn build_matrix(config: &ReleaseConfig) -> Result<Vec<BuildJob>, MatrixError> {
    let mut seen = HashSet::new();
    let mut jobs = Vec::with_capacity(config.targets.len());

    for target in &config.targets {
        if !seen.insert(target.triple.trim()) {
            return Err(MatrixError::DuplicateTarget {
                triple: target.triple.trim().to_string(),
            });
        }
        jobs.push(build_job(target, config)?);
    }

    log::debug!(
        "Build matrix: {}",
        jobs.iter().map(|j| j.id.as_str()).collect::<Vec<_>>().join(", ")
    );
    Ok(jobs)
}

/// Keeps only the listed platforms, preserving matrix order
pub fn filter_jobs(jobs: Vec<BuildJob>, only: &[String]) -> Result<Vec<BuildJob>, MatrixError> {
    if only.is_empty() {
        return Ok(jobs);
    }
    if let Some(unknown) = only.iter().find(|id| !jobs.iter().any(|j| &j.id == *id)) {
        return Err(MatrixError::UnknownPlatform(unknown.clone()));
    }
    Ok(jobs.into_iter().filter(|j| only.contains(&j.id)).collect())
}

fn build_job(target: &TargetConfig, config: &ReleaseConfig) -> Result<BuildJob, MatrixError> {
    let triple = target.triple.trim();
    let unknown = || MatrixError::UnknownTarget {
        triple: target.triple.clone(),
    };
    let arch = Arch::from_triple(triple).ok_or_else(unknown)?;
    let os = OsFamily::from_triple(triple).ok_or_else(unknown)?;

    if target.binaries.is_empty() {
        return Err(MatrixError::NoBinaries {
            triple: triple.to_string(),
        });
    }

    let mut names = HashSet::new();
    let mut binaries = Vec::with_capacity(target.binaries.len());
    for binary in &target.binaries {
        if !names.insert(binary.name.as_str()) {
            return Err(MatrixError::DuplicateBinary {
                triple: triple.to_string(),
                binary: binary.name.clone(),
            });
        }

        let features = FeatureSet::new(binary.features.iter().cloned());
        if let Some(conflicting) = features.conflicts(&config.exclusive_features) {
            return Err(MatrixError::ContradictoryFeatures {
                triple: triple.to_string(),
                binary: binary.name.clone(),
                conflicting,
            });
        }

        binaries.push(BinarySpec {
            name: binary.name.clone(),
            variant: binary.variant,
            features,
            default_features: binary.default_features,
        });
    }

    let prep = target
        .prep
        .as_ref()
        .filter(|cmd| !cmd.is_empty())
        .map(|cmd| PrepStep {
            command: cmd.clone(),
        });

    Ok(BuildJob {
        id: triple.to_string(),
        os,
        arch,
        binaries,
        toolchain_channel: config.toolchain.channel.clone(),
        prep,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BinaryConfig;

    #[test]
    fn default_matrix_has_five_jobs_in_order() {
        let jobs = build_matrix(&ReleaseConfig::default()).unwrap();
        let ids: Vec<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "x86_64-unknown-linux-gnu",
                "x86_64-unknown-linux-musl",
                "x86_64-pc-windows-msvc",
                "x86_64-apple-darwin",
                "aarch64-apple-darwin",
            ]
        );
        for job in &jobs {
            assert_eq!(job.binary_names(), vec!["qsv", "qsvlite", "qsvdp"]);
        }
    }

    #[test]
    fn musl_job_requires_prep() {
        let jobs = build_matrix(&ReleaseConfig::default()).unwrap();
        let musl = jobs.iter().find(|j| j.id.ends_with("musl")).unwrap();
        assert!(musl.prep.as_ref().unwrap().display().contains("musl-tools"));
        assert!(!musl.binaries[0].features.contains("python"));
        assert!(jobs.iter().filter(|j| j.prep.is_some()).count() == 1);
    }

    #[test]
    fn platforms_are_detected() {
        let jobs = build_matrix(&ReleaseConfig::default()).unwrap();
        assert_eq!(jobs[2].os, OsFamily::Windows);
        assert_eq!(jobs[2].os.exe_extension(), ".exe");
        assert_eq!(jobs[4].os, OsFamily::MacOs);
        assert_eq!(jobs[4].arch, Arch::AArch64);
    }

    #[test]
    fn contradictory_features_are_rejected() {
        let mut config = ReleaseConfig::default();
        config.targets[0].binaries[1] = BinaryConfig {
            name: "qsvlite".into(),
            variant: Variant::Lite,
            features: vec!["lite".into(), "datapusher_plus".into()],
            default_features: false,
        };
        match build_matrix(&config) {
            Err(MatrixError::ContradictoryFeatures { binary, conflicting, .. }) => {
                assert_eq!(binary, "qsvlite");
                assert_eq!(conflicting, vec!["lite", "datapusher_plus"]);
            }
            other => panic!("expected contradictory features, got {other:?}"),
        }
    }

    #[test]
    fn unknown_and_duplicate_targets_are_rejected() {
        let mut config = ReleaseConfig::default();
        config.targets[1].triple = "wasm32-unknown-unknown".into();
        assert!(matches!(
            build_matrix(&config),
            Err(MatrixError::UnknownTarget { .. })
        ));

        let mut config = ReleaseConfig::default();
        config.targets[1].triple = config.targets[0].triple.clone();
        assert!(matches!(
            build_matrix(&config),
            Err(MatrixError::DuplicateTarget { .. })
        ));
    }

    #[test]
    fn padded_triple_is_still_a_duplicate() {
        let mut config = ReleaseConfig::default();
        config.targets[1].triple = format!(" {}", config.targets[0].triple);
        match build_matrix(&config) {
            Err(MatrixError::DuplicateTarget { triple }) => {
                assert_eq!(triple, "x86_64-unknown-linux-gnu");
            }
            other => panic!("expected duplicate target, got {other:?}"),
        }
    }

    #[test]
    fn feature_set_is_sorted_and_deduplicated() {
        let set = FeatureSet::new(["lua", "apply", "lua", " "]);
        assert_eq!(set.to_cargo_arg(), "apply,lua");
    }

    #[test]
    fn filter_keeps_matrix_order() {
        let jobs = build_matrix(&ReleaseConfig::default()).unwrap();
        let only = vec![
            "aarch64-apple-darwin".to_string(),
            "x86_64-unknown-linux-gnu".to_string(),
        ];
        let filtered = filter_jobs(jobs.clone(), &only).unwrap();
        assert_eq!(filtered[0].id, "x86_64-unknown-linux-gnu");
        assert_eq!(filtered[1].id, "aarch64-apple-darwin");

        assert!(matches!(
            filter_jobs(jobs, &["sparc-sun-solaris".to_string()]),
            Err(MatrixError::UnknownPlatform(_))
        ));
    }
}
