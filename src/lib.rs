//! Multi-target nightly release builder library
//!
//! This library provides the pieces of a nightly release run:
//! - Tag resolution against repository history
//! - Build matrix expansion (platform, architecture, feature sets)
//! - Toolchain invocation, packaging and archive merging
//! - Publication to a release store with overwrite semantics
//!
//! It can be used both as a CLI tool and as a library dependency.

pub mod cli;
pub mod config;
pub mod error;
pub mod release;

// Re-export commonly used types
pub use error::{AppError, CliError, Result};
