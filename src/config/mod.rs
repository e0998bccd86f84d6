//! Release configuration loaded from `nightly-release.toml`.
//!
//! Every key is optional; a missing file or missing key falls back to the
//! built-in nightly matrix in [`defaults`].

pub mod defaults;

use crate::release::Variant;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default configuration file name, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "nightly-release.toml";

/// Toolchain channels that float and would make nightly builds irreproducible
const FLOATING_CHANNELS: &[&str] = &["nightly", "beta", "stable", "latest"];

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read {path}: {source}")]
    Read {
        /// Config path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// Config path
        path: PathBuf,
        /// TOML error
        #[source]
        source: toml::de::Error,
    },

    /// Toolchain channel is not pinned to a dated snapshot
    #[error(
        "toolchain channel '{0}' is not pinned; use a dated snapshot such as 'nightly-2025-06-01'"
    )]
    UnpinnedChannel(String),

    /// Any other invalid value
    #[error("{0}")]
    Invalid(String),
}

/// Top-level release configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReleaseConfig {
    /// Project name, prefix of archive names (`{project}-{tag}-{target}.zip`)
    #[serde(default = "defaults::project")]
    pub project: String,

    /// Release channel name, also the binary suffix (`qsv_nightly`)
    #[serde(default = "defaults::channel")]
    pub channel: String,

    /// Release store repository as `owner/repo`
    #[serde(default)]
    pub repository: Option<String>,

    /// Toolchain pin and build profile
    #[serde(default)]
    pub toolchain: ToolchainConfig,

    /// Glob patterns of toolchain sidecar files stripped from bundles
    #[serde(default = "defaults::sidecar_patterns")]
    pub sidecar_patterns: Vec<String>,

    /// Groups of feature flags that must never be enabled together
    #[serde(default = "defaults::exclusive_features")]
    pub exclusive_features: Vec<Vec<String>>,

    /// Build targets, in the order jobs are reported
    #[serde(default = "defaults::targets")]
    pub targets: Vec<TargetConfig>,
}

/// Toolchain settings shared by every job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolchainConfig {
    /// Pinned rustup channel, e.g. `nightly-2025-06-01`
    #[serde(default = "defaults::toolchain_channel")]
    pub channel: String,

    /// Cargo profile
    #[serde(default = "defaults::profile")]
    pub profile: String,

    /// Rebuild std with `panic_immediate_abort` to trim binary size
    #[serde(default = "defaults::enabled")]
    pub build_std: bool,

    /// Pass `--locked` to cargo
    #[serde(default = "defaults::enabled")]
    pub locked: bool,

    /// Per-binary build timeout
    #[serde(default = "defaults::timeout_minutes")]
    pub timeout_minutes: u64,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            channel: defaults::toolchain_channel(),
            profile: defaults::profile(),
            build_std: true,
            locked: true,
            timeout_minutes: defaults::timeout_minutes(),
        }
    }
}

/// One build target (one job)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
    /// Rust target triple, also the platform id
    pub triple: String,

    /// Command run before building (e.g. installing a cross toolchain)
    #[serde(default)]
    pub prep: Option<Vec<String>>,

    /// Binaries built for this target
    pub binaries: Vec<BinaryConfig>,
}

/// One binary built for a target
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BinaryConfig {
    /// Cargo binary name
    pub name: String,

    /// Which variant this binary is
    pub variant: Variant,

    /// Cargo features to enable
    #[serde(default)]
    pub features: Vec<String>,

    /// Keep the crate's default features
    #[serde(default = "defaults::enabled")]
    pub default_features: bool,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            project: defaults::project(),
            channel: defaults::channel(),
            repository: None,
            toolchain: ToolchainConfig::default(),
            sidecar_patterns: defaults::sidecar_patterns(),
            exclusive_features: defaults::exclusive_features(),
            targets: defaults::targets(),
        }
    }
}

impl ReleaseConfig {
    /// Loads configuration.
    ///
    /// An explicit path must exist. Without one, `nightly-release.toml` in the
    /// working directory is used when present, the built-in defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.is_file() {
                    Self::from_file(default_path)?
                } else {
                    log::debug!("No {} found, using built-in matrix", DEFAULT_CONFIG_FILE);
                    Self::default()
                }
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a config file without validating it
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        log::debug!("Loaded release configuration from {}", path.display());
        Ok(config)
    }

    /// Checks values that serde cannot express.
    ///
    /// Matrix-level rules (targets, feature conflicts) are checked when the
    /// matrix is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project.trim().is_empty() {
            return Err(ConfigError::Invalid("project must not be empty".into()));
        }

        if self.channel.trim().is_empty()
            || !self
                .channel
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ConfigError::Invalid(format!(
                "channel '{}' must be a non-empty identifier",
                self.channel
            )));
        }

        if FLOATING_CHANNELS.contains(&self.toolchain.channel.as_str()) {
            return Err(ConfigError::UnpinnedChannel(self.toolchain.channel.clone()));
        }

        if self.toolchain.timeout_minutes == 0 {
            return Err(ConfigError::Invalid(
                "toolchain.timeout_minutes must be greater than zero".into(),
            ));
        }

        if let Some(repository) = &self.repository {
            validate_repository(repository)?;
        }

        Ok(())
    }
}

/// Checks an `owner/repo` slug
pub fn validate_repository(repository: &str) -> Result<(), ConfigError> {
    let parts: Vec<&str> = repository.split('/').collect();
    if parts.len() != 2 || parts.iter().any(|p| p.trim().is_empty()) {
        return Err(ConfigError::Invalid(format!(
            "repository '{}' must have the form owner/repo",
            repository
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ReleaseConfig::default();
        config.validate().unwrap();
        assert_eq!(config.targets.len(), 5);
        assert_eq!(config.project, "qsv");
        assert_eq!(config.channel, "nightly");
    }

    #[test]
    fn floating_channel_is_rejected() {
        let mut config = ReleaseConfig::default();
        config.toolchain.channel = "nightly".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnpinnedChannel(_))
        ));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config: ReleaseConfig = toml::from_str(
            r#"
            project = "tool"
            repository = "acme/tool"

            [toolchain]
            channel = "nightly-2025-01-15"

            [[targets]]
            triple = "x86_64-unknown-linux-gnu"
            binaries = [{ name = "tool", variant = "full", features = ["fast"] }]
            "#,
        )
        .unwrap();

        config.validate().unwrap();
        assert_eq!(config.channel, "nightly");
        assert_eq!(config.toolchain.profile, "release");
        assert!(config.toolchain.build_std);
        assert_eq!(config.targets.len(), 1);
        assert!(config.targets[0].binaries[0].default_features);
        assert_eq!(config.sidecar_patterns, vec!["*.d".to_string()]);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let parsed: Result<ReleaseConfig, _> = toml::from_str("projet = \"typo\"");
        assert!(parsed.is_err());
    }

    #[test]
    fn repository_needs_owner_and_name() {
        assert!(validate_repository("jqnatividad/qsv").is_ok());
        assert!(validate_repository("qsv").is_err());
        assert!(validate_repository("a/b/c").is_err());
        assert!(validate_repository("/qsv").is_err());
    }
}
