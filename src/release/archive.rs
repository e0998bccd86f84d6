//! Release archive model and additive merge.
//!
//! An archive is a map of entry name to bytes. Merging a bundle overwrites the
//! entries it names and keeps everything else, so nightly binaries are layered
//! onto the stable release's platform zip. Entries read from an existing zip
//! and left alone by the merge are copied raw, keeping their compression,
//! timestamps and file type. Entries added by a merge are written canonically
//! (fixed timestamp, Deflate level 9), which makes a repeated merge produce
//! the same bytes.

use super::ReleaseContext;
use super::error::MergeError;
use super::packager::{Bundle, FILE_MODE};
use super::store::ReleaseStore;
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Cursor, Read, Write};
use std::sync::Arc;
use zip::result::ZipResult;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

/// Highest Deflate level supported by the archive writer
pub const MAX_COMPRESSION_LEVEL: i64 = 9;

/// Unix mode for directory entries
const DIR_MODE: u32 = 0o755;

/// One named entry of a release archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Uncompressed contents; empty for directories
    pub data: Vec<u8>,
    /// Unix permission bits
    pub unix_mode: u32,
}

impl ArchiveEntry {
    /// A regular file entry
    pub fn file(data: impl Into<Vec<u8>>, unix_mode: u32) -> Self {
        Self {
            data: data.into(),
            unix_mode: unix_mode & 0o777,
        }
    }
}

/// A release asset archive held in memory
#[derive(Debug, Clone)]
pub struct ReleaseArchive {
    name: String,
    entries: BTreeMap<String, ArchiveEntry>,
    /// Zip the archive was read from
    source: Option<Bytes>,
    /// Entries still identical to their copy in `source`
    untouched: BTreeSet<String>,
}

/// Archives compare by name and entry contents, not by how they were read
impl PartialEq for ReleaseArchive {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.entries == other.entries
    }
}

impl Eq for ReleaseArchive {}

impl ReleaseArchive {
    /// An archive with no entries
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: BTreeMap::new(),
            source: None,
            untouched: BTreeSet::new(),
        }
    }

    /// Reads a zip archive. Directory entries keep their trailing `/`.
    pub fn from_zip_bytes(name: impl Into<String>, bytes: &[u8]) -> ZipResult<Self> {
        let mut zip = ZipArchive::new(Cursor::new(bytes))?;
        let mut entries = BTreeMap::new();

        for index in 0..zip.len() {
            let mut file = zip.by_index(index)?;
            let entry_name = file.name()?.to_string();
            let default_mode = if file.is_dir() { DIR_MODE } else { FILE_MODE };
            let unix_mode = file.unix_mode().map(|m| m & 0o777).unwrap_or(default_mode);

            // Declared sizes come from an untrusted header
            let mut data = Vec::new();
            if !file.is_dir() {
                file.read_to_end(&mut data)?;
            }
            entries.insert(entry_name, ArchiveEntry { data, unix_mode });
        }

        let untouched = entries.keys().cloned().collect();
        Ok(Self {
            name: name.into(),
            entries,
            source: Some(Bytes::copy_from_slice(bytes)),
            untouched,
        })
    }

    /// Writes the archive in name order.
    ///
    /// Untouched entries of the source zip are copied without recompression.
    pub fn to_zip_bytes(&self) -> ZipResult<Vec<u8>> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let mut source = match &self.source {
            Some(bytes) if !self.untouched.is_empty() => {
                Some(ZipArchive::new(Cursor::new(bytes.as_ref()))?)
            }
            _ => None,
        };

        for (entry_name, entry) in &self.entries {
            if let Some(prior) = source.as_mut().filter(|_| self.untouched.contains(entry_name)) {
                let index = prior
                    .index_for_name(entry_name)
                    .ok_or(zip::result::ZipError::FileNotFound)?;
                zip.raw_copy_file(prior.by_index_raw(index)?)?;
                continue;
            }

            let options = SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .compression_level(Some(MAX_COMPRESSION_LEVEL))
                .last_modified_time(DateTime::default())
                .unix_permissions(entry.unix_mode)
                .large_file(entry.data.len() as u64 >= u64::from(u32::MAX));

            if entry_name.ends_with('/') {
                zip.add_directory(entry_name.as_str(), options)?;
            } else {
                zip.start_file(entry_name.as_str(), options)?;
                zip.write_all(&entry.data)?;
            }
        }

        Ok(zip.finish()?.into_inner())
    }

    /// Adds or overwrites the given entries; all other entries are kept
    pub fn merge<I>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = (String, ArchiveEntry)>,
    {
        for (entry_name, entry) in entries {
            self.untouched.remove(&entry_name);
            self.entries.insert(entry_name, entry);
        }
        self
    }

    /// Asset name of the archive
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry(&self, name: &str) -> Option<&ArchiveEntry> {
        self.entries.get(name)
    }

    /// Entry names in archive order
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Fetches the published archive for a platform and merges a bundle into it
#[derive(Debug)]
pub struct ArtifactMerger<S> {
    store: Arc<S>,
}

impl<S: ReleaseStore> ArtifactMerger<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Merges `bundle` into `{project}-{tag}-{platform_id}.zip`, starting
    /// empty when no release carries it.
    ///
    /// The archive is read from the release tagged `tag`, which is where it is
    /// published back to; the latest release is only consulted when that
    /// release lacks the asset.
    pub async fn merge(
        &self,
        ctx: &ReleaseContext,
        platform_id: &str,
        bundle: &Bundle,
    ) -> Result<ReleaseArchive, MergeError> {
        let name = ctx.archive_name(platform_id);
        let fetch_error = |source| MergeError::Fetch {
            name: name.clone(),
            source,
        };

        let existing = match self
            .store
            .fetch_asset(ctx.tag.as_str(), &name)
            .await
            .map_err(fetch_error)?
        {
            Some(bytes) => Some(bytes),
            None => {
                log::debug!(
                    "[{}] Release {} has no {}, trying the latest release",
                    platform_id,
                    ctx.tag,
                    name
                );
                self.store
                    .fetch_latest_asset(&name)
                    .await
                    .map_err(fetch_error)?
            }
        };

        let base = match existing {
            Some(bytes) => {
                let archive = ReleaseArchive::from_zip_bytes(name.clone(), &bytes).map_err(
                    |source| MergeError::CorruptArchive {
                        name: name.clone(),
                        source,
                    },
                )?;
                log::info!(
                    "[{}] Merging into existing {} ({} entries)",
                    platform_id,
                    name,
                    archive.len()
                );
                archive
            }
            None => {
                log::info!(
                    "[{}] No published {} found, starting from an empty archive",
                    platform_id,
                    name
                );
                ReleaseArchive::empty(name)
            }
        };

        Ok(base.merge(bundle.entries().await?))
    }
}
