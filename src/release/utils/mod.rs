//! Filesystem helpers shared by the packager and the orchestrator.

pub mod fs;
