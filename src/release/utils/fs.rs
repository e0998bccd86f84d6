//! Idempotent directory and file operations.

use std::{io, path::Path};
use tokio::fs;

/// Creates all directories of the path, erasing it first if specified.
pub async fn create_dir_all(path: &Path, erase: bool) -> io::Result<()> {
    if erase {
        remove_dir_all(path).await?;
    }

    // create_dir_all is already idempotent - succeeds even if dir exists
    fs::create_dir_all(path).await
}

/// Removes the directory and its contents if it exists.
pub async fn remove_dir_all(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Copies a regular file, creating the destination's parent directories.
///
/// Fails if the source is not a regular file.
pub async fn copy_file(from: &Path, to: &Path) -> io::Result<()> {
    let metadata = fs::metadata(from).await?;
    if !metadata.is_file() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a file", from.display()),
        ));
    }
    if let Some(dest_dir) = to.parent() {
        fs::create_dir_all(dest_dir).await?;
    }
    fs::copy(from, to).await?;
    Ok(())
}
