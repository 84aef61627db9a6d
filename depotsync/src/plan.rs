//! Download planning.
//!
//! A [`DownloadPlan`] combines the chunk locator and the size accountant:
//! which chunks to fetch, from where, and how many bytes that is.

use std::collections::{HashMap, HashSet};

use thiserror::Error;
use tracing::{info, warn};

use crate::locator::{
    build_epic_chunk_url_map, extract_chunk_hashes, main_bin_url, ByteRange, ChunkLocator,
};
use crate::manifest::{Chunk, FileEntry, Manifest, ManifestFormat};
use crate::size::{
    calculate_total_size, calculate_uncompressed_size, calculate_unique_download_size,
    format_bytes,
};

/// Result type for planning operations.
pub type PlanResult<T> = Result<T, PlanError>;

/// Errors that abort planning before any bytes are fetched.
#[derive(Debug, Error)]
pub enum PlanError {
    /// No URL could be built for one or more required chunks.
    #[error("no download URL for {} chunk(s): {}", .missing.len(), preview(.missing))]
    UnresolvableChunk { missing: Vec<String> },

    /// The target volume cannot hold the download.
    #[error("insufficient disk space: {required} bytes required, {available} available")]
    InsufficientDiskSpace { required: u64, available: u64 },

    /// A generation 1 file has no offset into its depot blob.
    #[error("{path}: no offset into main.bin")]
    MissingBlobOffset { path: String },
}

fn preview(hashes: &[String]) -> String {
    const SHOWN: usize = 5;
    let mut out = hashes
        .iter()
        .take(SHOWN)
        .cloned()
        .collect::<Vec<_>>()
        .join(", ");
    if hashes.len() > SHOWN {
        out.push_str(&format!(", ... ({} more)", hashes.len() - SHOWN));
    }
    out
}

/// Everything needed to hand a download to a transport.
#[derive(Debug, Clone)]
pub struct DownloadPlan {
    /// Files to install, in manifest order.
    pub files: Vec<FileEntry>,
    /// Distinct chunk ids in first-seen order.
    pub chunk_hashes: Vec<String>,
    /// Chunk id to download URL.
    pub urls: HashMap<String, String>,
    /// Chunk id to byte range of the URL, for generation 1 blobs.
    pub ranges: HashMap<String, ByteRange>,
    /// Download estimate, one count per chunk reference.
    pub download_size: u64,
    /// Bytes fetched when every distinct chunk is downloaded once.
    pub unique_download_size: u64,
    /// Bytes once installed.
    pub installed_size: u64,
}

impl DownloadPlan {
    /// Plan the download of `files` from `manifest` using `base_urls`.
    ///
    /// Binary and legacy JSON manifests use versioned chunk paths; chunked
    /// depot manifests use hash-sharded URLs. Generation 1 depots fetch every
    /// file as a byte range of `<base>/main.bin`.
    ///
    /// # Errors
    ///
    /// [`PlanError::UnresolvableChunk`] when any chunk has no URL, including
    /// the case of an empty `base_urls`; [`PlanError::MissingBlobOffset`]
    /// for a generation 1 file without an offset.
    pub fn build<'a, F>(
        manifest: &Manifest,
        files: F,
        locator: &ChunkLocator,
        base_urls: &[String],
    ) -> PlanResult<Self>
    where
        F: IntoIterator<Item = &'a FileEntry>,
    {
        let files: Vec<FileEntry> = files.into_iter().cloned().collect();
        let chunk_hashes = extract_chunk_hashes(&files);

        let (urls, ranges) = match manifest.format {
            ManifestFormat::Binary | ManifestFormat::EpicJson => {
                let chunks: Vec<&Chunk> = required_chunks(manifest, &files);
                let urls = build_epic_chunk_url_map(locator, manifest, chunks, base_urls);
                (urls, HashMap::new())
            }
            ManifestFormat::GogGen1 => blob_ranges(&files, base_urls)?,
            ManifestFormat::GogGen2 => (
                locator.build_chunk_url_map(&chunk_hashes, base_urls),
                HashMap::new(),
            ),
        };

        let mut plan = Self::from_parts(manifest, files, chunk_hashes, urls)?;
        plan.ranges = ranges;
        Ok(plan)
    }

    /// Plan with URLs resolved elsewhere (for example per product).
    pub fn from_parts(
        manifest: &Manifest,
        files: Vec<FileEntry>,
        chunk_hashes: Vec<String>,
        urls: HashMap<String, String>,
    ) -> PlanResult<Self> {
        let missing: Vec<String> = chunk_hashes
            .iter()
            .filter(|h| !urls.contains_key(*h))
            .cloned()
            .collect();
        if !missing.is_empty() {
            warn!(
                missing = missing.len(),
                requested = chunk_hashes.len(),
                "Unresolvable chunks"
            );
            return Err(PlanError::UnresolvableChunk { missing });
        }

        let download_size = calculate_total_size(&files, &manifest.chunks);
        let unique_download_size = calculate_unique_download_size(&files, &manifest.chunks);
        let installed_size = calculate_uncompressed_size(&files);
        info!(
            files = files.len(),
            chunks = chunk_hashes.len(),
            download = %format_bytes(download_size),
            installed = %format_bytes(installed_size),
            "Download plan ready"
        );

        Ok(Self {
            files,
            chunk_hashes,
            urls,
            ranges: HashMap::new(),
            download_size,
            unique_download_size,
            installed_size,
        })
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_hashes.len()
    }
}

/// `main.bin` URL and byte range for every generation 1 file with content.
///
/// The blob always comes from the first base URL.
fn blob_ranges(
    files: &[FileEntry],
    base_urls: &[String],
) -> PlanResult<(HashMap<String, String>, HashMap<String, ByteRange>)> {
    let mut urls = HashMap::new();
    let mut ranges = HashMap::new();
    let Some(blob) = base_urls.first().map(|base| main_bin_url(base)) else {
        return Ok((urls, ranges));
    };

    for file in files {
        let Some(part) = file.chunk_parts().first() else {
            continue;
        };
        let offset = file
            .legacy_source()
            .and_then(|source| source.offset)
            .ok_or_else(|| PlanError::MissingBlobOffset {
                path: file.path().to_string(),
            })?;
        if let Some(range) = ByteRange::new(offset, file.size()) {
            let key = part.guid.to_string();
            urls.insert(key.clone(), blob.clone());
            ranges.insert(key, range);
        }
    }
    Ok((urls, ranges))
}

/// Catalog entries referenced by `files`, deduplicated, in first-seen order.
pub fn required_chunks<'m, 'a, F>(manifest: &'m Manifest, files: F) -> Vec<&'m Chunk>
where
    F: IntoIterator<Item = &'a FileEntry>,
{
    let mut seen = HashSet::new();
    files
        .into_iter()
        .flat_map(|f| f.chunk_parts())
        .filter(|part| seen.insert(part.guid))
        .filter_map(|part| manifest.chunks.get(&part.guid))
        .collect()
}

/// Primary content hash used to detect modified files.
fn content_key(file: &FileEntry) -> Option<&str> {
    let hashes = file.hashes();
    hashes
        .sha256
        .as_deref()
        .or(hashes.sha1.as_deref())
        .or(hashes.md5.as_deref())
}

/// File-level difference between two manifests.
#[derive(Debug, Clone, Default)]
pub struct ManifestComparison {
    pub added: Vec<FileEntry>,
    pub removed: Vec<FileEntry>,
    /// `(old, new)` pairs whose content hash changed.
    pub modified: Vec<(FileEntry, FileEntry)>,
    pub unchanged: Vec<FileEntry>,
}

impl ManifestComparison {
    pub fn has_changes(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty() || !self.modified.is_empty()
    }

    pub fn total_changed_files(&self) -> usize {
        self.added.len() + self.removed.len() + self.modified.len()
    }

    pub fn added_size(&self) -> u64 {
        self.added.iter().map(FileEntry::size).sum()
    }

    pub fn removed_size(&self) -> u64 {
        self.removed.iter().map(FileEntry::size).sum()
    }

    /// Files of the new manifest that must be downloaded.
    pub fn changed_files(&self) -> impl Iterator<Item = &FileEntry> {
        self.added.iter().chain(self.modified.iter().map(|(_, new)| new))
    }
}

/// Compare `old` and `new` by path and primary content hash.
pub fn compare_manifests(old: &Manifest, new: &Manifest) -> ManifestComparison {
    let old_files: HashMap<&str, &FileEntry> = old.files.iter().map(|f| (f.path(), f)).collect();
    let new_paths: HashSet<&str> = new.files.iter().map(|f| f.path()).collect();

    let mut comparison = ManifestComparison::default();
    for file in &new.files {
        match old_files.get(file.path()) {
            None => comparison.added.push(file.clone()),
            Some(previous) if content_key(previous) != content_key(file) || previous.size() != file.size() => {
                comparison.modified.push(((*previous).clone(), file.clone()));
            }
            Some(_) => comparison.unchanged.push(file.clone()),
        }
    }
    for file in &old.files {
        if !new_paths.contains(file.path()) {
            comparison.removed.push(file.clone());
        }
    }

    info!(
        added = comparison.added.len(),
        removed = comparison.removed.len(),
        modified = comparison.modified.len(),
        unchanged = comparison.unchanged.len(),
        "Compared manifests"
    );
    comparison
}

/// Files of `new` to fetch when updating from `old`.
pub fn delta_files(old: &Manifest, new: &Manifest) -> Vec<FileEntry> {
    compare_manifests(old, new).changed_files().cloned().collect()
}
