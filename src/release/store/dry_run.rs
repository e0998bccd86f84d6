//! Store wrapper that reads from a real store but writes locally.

use super::{ReleaseStore, UploadReceipt};
use crate::release::error::StoreError;
use bytes::Bytes;
use std::path::PathBuf;

/// Delegates reads to `inner` and writes uploads to `<out_dir>/<tag>/<name>`.
///
/// Lets an operator inspect exactly what a run would publish.
#[derive(Debug)]
pub struct DryRunStore<S> {
    inner: S,
    out_dir: PathBuf,
}

impl<S> DryRunStore<S> {
    pub fn new(inner: S, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            out_dir: out_dir.into(),
        }
    }
}

impl<S: ReleaseStore> ReleaseStore for DryRunStore<S> {
    async fn fetch_asset(&self, tag: &str, name: &str) -> Result<Option<Bytes>, StoreError> {
        self.inner.fetch_asset(tag, name).await
    }

    async fn fetch_latest_asset(&self, name: &str) -> Result<Option<Bytes>, StoreError> {
        self.inner.fetch_latest_asset(name).await
    }

    async fn upload_asset(
        &self,
        tag: &str,
        name: &str,
        data: Bytes,
    ) -> Result<UploadReceipt, StoreError> {
        let dir = self.out_dir.join(tag);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(name);
        let replaced = tokio::fs::try_exists(&path).await?;
        tokio::fs::write(&path, &data).await?;
        log::info!("Dry run: wrote {} ({} bytes)", path.display(), data.len());

        Ok(UploadReceipt {
            location: Some(path.display().to_string()),
            replaced,
        })
    }
}
