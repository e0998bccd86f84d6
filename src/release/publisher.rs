//! Uploads merged archives to the release store.

use super::ReleaseContext;
use super::archive::ReleaseArchive;
use super::builder::checksum::sha256_bytes;
use super::error::PublishError;
use super::store::ReleaseStore;
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;

/// Outcome of a successful publication
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishResult {
    /// Release tag the asset is attached to
    pub tag: String,
    /// Asset name
    pub asset_name: String,
    /// Archive size in bytes
    pub size: u64,
    /// Hex SHA-256 of the uploaded archive
    pub sha256: String,
    /// Download location reported by the store
    pub location: Option<String>,
    /// Whether an earlier asset of the same name was replaced
    pub replaced: bool,
}

/// Publishes release archives with overwrite semantics
#[derive(Debug)]
pub struct Publisher<S> {
    store: Arc<S>,
}

impl<S: ReleaseStore> Publisher<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Uploads `archive` as a named asset of the release tagged `ctx.tag`
    pub async fn publish(
        &self,
        ctx: &ReleaseContext,
        platform_id: &str,
        archive: &ReleaseArchive,
    ) -> Result<PublishResult, PublishError> {
        let name = archive.name().to_string();
        let data = archive
            .to_zip_bytes()
            .map_err(|source| PublishError::Encode {
                name: name.clone(),
                source,
            })?;
        let sha256 = sha256_bytes(&data);
        let size = data.len() as u64;

        log::info!(
            "[{}] Uploading {} ({} bytes) to release {}",
            platform_id,
            name,
            size,
            ctx.tag
        );

        let receipt = self
            .store
            .upload_asset(ctx.tag.as_str(), &name, Bytes::from(data))
            .await
            .map_err(|source| PublishError::Upload {
                name: name.clone(),
                tag: ctx.tag.to_string(),
                source,
            })?;

        Ok(PublishResult {
            tag: ctx.tag.to_string(),
            asset_name: name,
            size,
            sha256,
            location: receipt.location,
            replaced: receipt.replaced,
        })
    }
}
