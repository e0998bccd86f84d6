//! Release store backends.
//!
//! The pipeline reads named assets from a tagged or the latest published
//! release, and uploads a named asset to a tagged release, replacing any asset
//! of the same name.

mod dry_run;
mod github;
mod memory;

pub use dry_run::DryRunStore;
pub use github::GitHubStore;
pub use memory::MemoryStore;

use super::error::StoreError;
use bytes::Bytes;
use serde::Serialize;
use std::future::Future;

/// What the store reports back after an upload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UploadReceipt {
    /// Where the asset can be downloaded, when the store knows
    pub location: Option<String>,
    /// Whether an asset of the same name was replaced
    pub replaced: bool,
}

/// Remote store holding release assets
pub trait ReleaseStore: Send + Sync {
    /// Reads asset `name` from the release tagged `tag`.
    ///
    /// `Ok(None)` when there is no such release or no such asset.
    fn fetch_asset(
        &self,
        tag: &str,
        name: &str,
    ) -> impl Future<Output = Result<Option<Bytes>, StoreError>> + Send;

    /// Reads asset `name` from the latest published release.
    ///
    /// `Ok(None)` when there is no published release or no such asset.
    fn fetch_latest_asset(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<Bytes>, StoreError>> + Send;

    /// Uploads asset `name` to the release tagged `tag`, overwriting any
    /// asset of the same name
    fn upload_asset(
        &self,
        tag: &str,
        name: &str,
        data: Bytes,
    ) -> impl Future<Output = Result<UploadReceipt, StoreError>> + Send;
}
