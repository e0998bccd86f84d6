//! In-process release store.

use super::{ReleaseStore, UploadReceipt};
use crate::release::error::StoreError;
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct State {
    releases: BTreeMap<String, BTreeMap<String, Bytes>>,
    latest: Option<String>,
    failing_uploads: BTreeSet<String>,
    uploads: usize,
}

/// Release store kept in memory.
///
/// Releases must be created before assets can be uploaded to them, like on a
/// hosted store. The most recently created release is the latest one.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means another test thread panicked mid-update
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Creates a release and marks it as the latest
    pub fn create_release(&self, tag: &str) {
        let mut state = self.state();
        state.releases.entry(tag.to_string()).or_default();
        state.latest = Some(tag.to_string());
    }

    /// Places an asset directly, bypassing upload bookkeeping
    pub fn insert_asset(&self, tag: &str, name: &str, data: impl Into<Bytes>) {
        self.state()
            .releases
            .entry(tag.to_string())
            .or_default()
            .insert(name.to_string(), data.into());
    }

    /// Makes every upload of asset `name` fail with a quota error
    pub fn fail_uploads_of(&self, name: &str) {
        self.state().failing_uploads.insert(name.to_string());
    }

    pub fn asset(&self, tag: &str, name: &str) -> Option<Bytes> {
        self.state()
            .releases
            .get(tag)
            .and_then(|assets| assets.get(name))
            .cloned()
    }

    /// Asset names of a release, sorted
    pub fn asset_names(&self, tag: &str) -> Vec<String> {
        self.state()
            .releases
            .get(tag)
            .map(|assets| assets.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of successful uploads so far
    pub fn upload_count(&self) -> usize {
        self.state().uploads
    }
}

impl ReleaseStore for MemoryStore {
    async fn fetch_asset(&self, tag: &str, name: &str) -> Result<Option<Bytes>, StoreError> {
        Ok(self.asset(tag, name))
    }

    async fn fetch_latest_asset(&self, name: &str) -> Result<Option<Bytes>, StoreError> {
        let state = self.state();
        Ok(state
            .latest
            .as_ref()
            .and_then(|tag| state.releases.get(tag))
            .and_then(|assets| assets.get(name))
            .cloned())
    }

    async fn upload_asset(
        &self,
        tag: &str,
        name: &str,
        data: Bytes,
    ) -> Result<UploadReceipt, StoreError> {
        let mut state = self.state();
        if state.failing_uploads.contains(name) {
            return Err(StoreError::Quota(format!("upload of {} rejected", name)));
        }
        let assets = state
            .releases
            .get_mut(tag)
            .ok_or_else(|| StoreError::MissingRelease(tag.to_string()))?;
        let replaced = assets.insert(name.to_string(), data).is_some();
        state.uploads += 1;

        Ok(UploadReceipt {
            location: Some(format!("memory://{}/{}", tag, name)),
            replaced,
        })
    }
}
