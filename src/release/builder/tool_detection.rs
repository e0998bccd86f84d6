//! External tool detection.
//!
//! Lookups are cached so concurrent jobs do not each search `PATH`.

use std::path::PathBuf;
use std::sync::LazyLock;

fn locate(tool: &str) -> Option<PathBuf> {
    match which::which(tool) {
        Ok(path) => {
            log::debug!("Found {} at: {}", tool, path.display());
            Some(path)
        }
        Err(e) => {
            log::debug!("{} not found in PATH: {}", tool, e);
            None
        }
    }
}

/// Path to `cargo`, used for every build
pub static CARGO: LazyLock<Option<PathBuf>> = LazyLock::new(|| locate("cargo"));

/// Path to `rustc`, used for version reports
pub static RUSTC: LazyLock<Option<PathBuf>> = LazyLock::new(|| locate("rustc"));

/// Path to `git`, used for tag resolution
pub static GIT: LazyLock<Option<PathBuf>> = LazyLock::new(|| locate("git"));
