//! Offline merge of a bundle directory into a local archive.

use crate::cli::{MergeArgs, RuntimeConfig};
use crate::config::ReleaseConfig;
use crate::error::{CliError, Result};
use crate::release::archive::{ArchiveEntry, ReleaseArchive};
use crate::release::error::PackagingError;
use crate::release::packager::FILE_MODE;
use anyhow::Context;
use std::path::Path;

/// Merges the top-level files of `--bundle-dir` into `--archive`
pub async fn merge_local(
    config: &ReleaseConfig,
    args: &MergeArgs,
    runtime: &RuntimeConfig,
) -> Result<i32> {
    let name = args
        .archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| CliError::InvalidArguments {
            reason: format!("--archive {} has no file name", args.archive.display()),
        })?;

    let base = match tokio::fs::read(&args.archive).await {
        Ok(bytes) => ReleaseArchive::from_zip_bytes(name, &bytes)
            .with_context(|| format!("reading archive {}", args.archive.display()))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            runtime.warn(&format!(
                "{} does not exist, starting from an empty archive",
                args.archive.display()
            ))?;
            ReleaseArchive::empty(name)
        }
        Err(e) => Err(e).with_context(|| format!("reading archive {}", args.archive.display()))?,
    };

    let sidecars = config
        .sidecar_patterns
        .iter()
        .map(|p| {
            glob::Pattern::new(p).map_err(|source| PackagingError::InvalidPattern {
                pattern: p.clone(),
                source,
            })
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut entries = Vec::new();
    let bundle_context = || format!("reading bundle directory {}", args.bundle_dir.display());
    let mut dir = tokio::fs::read_dir(&args.bundle_dir)
        .await
        .with_context(bundle_context)?;
    while let Some(entry) = dir.next_entry().await.with_context(bundle_context)? {
        let metadata = entry.metadata().await.with_context(bundle_context)?;
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if !metadata.is_file() || sidecars.iter().any(|p| p.matches(&file_name)) {
            runtime.verbose_println(&format!("  skipping {}", file_name))?;
            continue;
        }
        let data = tokio::fs::read(entry.path())
            .await
            .with_context(|| format!("reading {}", entry.path().display()))?;
        entries.push((file_name, ArchiveEntry::file(data, entry_mode(&metadata))));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    for (file_name, _) in &entries {
        runtime.indent(&format!("+ {}", file_name))?;
    }
    let added = entries.len();
    let merged = base.merge(entries);

    let output = args.output.as_deref().unwrap_or(&args.archive);
    write_archive(output, &merged.to_zip_bytes()?)
        .await
        .with_context(|| format!("writing archive {}", output.display()))?;
    runtime.success(&format!(
        "Merged {} file(s) into {} ({} entries)",
        added,
        output.display(),
        merged.len()
    ))?;
    Ok(0)
}

async fn write_archive(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, data).await
}

#[cfg(unix)]
fn entry_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    if metadata.permissions().mode() & 0o111 != 0 {
        crate::release::packager::EXECUTABLE_MODE
    } else {
        FILE_MODE
    }
}

#[cfg(not(unix))]
fn entry_mode(_metadata: &std::fs::Metadata) -> u32 {
    FILE_MODE
}
