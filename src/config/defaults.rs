//! Built-in nightly matrix and default values.

use super::{BinaryConfig, TargetConfig};
use crate::release::Variant;

pub fn project() -> String {
    "qsv".to_string()
}

pub fn channel() -> String {
    "nightly".to_string()
}

pub fn toolchain_channel() -> String {
    "nightly-2025-06-01".to_string()
}

pub fn profile() -> String {
    "release".to_string()
}

pub fn enabled() -> bool {
    true
}

pub fn timeout_minutes() -> u64 {
    60
}

pub fn sidecar_patterns() -> Vec<String> {
    vec!["*.d".to_string()]
}

/// `feature_capable`, `lite` and `datapusher_plus` each select a different
/// binary flavour and cannot be combined.
pub fn exclusive_features() -> Vec<Vec<String>> {
    vec![vec![
        "feature_capable".to_string(),
        "lite".to_string(),
        "datapusher_plus".to_string(),
    ]]
}

const FULL_FEATURES: &[&str] = &[
    "feature_capable",
    "apply",
    "fetch",
    "foreach",
    "generate",
    "lua",
    "python",
    "to",
    "self_update",
    "nightly",
];

/// Full-featured binary. `skip` drops features a platform cannot build.
fn full(skip: &[&str]) -> BinaryConfig {
    BinaryConfig {
        name: "qsv".to_string(),
        variant: Variant::Full,
        features: FULL_FEATURES
            .iter()
            .filter(|f| !skip.contains(f))
            .map(|f| f.to_string())
            .collect(),
        default_features: true,
    }
}

fn lite() -> BinaryConfig {
    BinaryConfig {
        name: "qsvlite".to_string(),
        variant: Variant::Lite,
        features: vec!["lite".into(), "self_update".into(), "nightly".into()],
        default_features: false,
    }
}

fn datapusher() -> BinaryConfig {
    BinaryConfig {
        name: "qsvdp".to_string(),
        variant: Variant::DataPusher,
        features: vec!["datapusher_plus".into(), "nightly".into()],
        default_features: false,
    }
}

fn target(triple: &str, prep: Option<&[&str]>, skip: &[&str]) -> TargetConfig {
    TargetConfig {
        triple: triple.to_string(),
        prep: prep.map(|cmd| cmd.iter().map(|s| s.to_string()).collect()),
        binaries: vec![full(skip), lite(), datapusher()],
    }
}

pub fn targets() -> Vec<TargetConfig> {
    vec![
        target("x86_64-unknown-linux-gnu", None, &[]),
        target(
            "x86_64-unknown-linux-musl",
            Some(&["sudo", "apt-get", "install", "-y", "musl-tools"]),
            &["python"],
        ),
        target("x86_64-pc-windows-msvc", None, &["foreach"]),
        target("x86_64-apple-darwin", None, &[]),
        target("aarch64-apple-darwin", None, &[]),
    ]
}
