//! Download and install size accounting.

use std::collections::HashSet;

use crate::manifest::{ChunkCatalog, FileEntry};
use crate::plan::{PlanError, PlanResult};

/// Download estimate for `files`: every chunk reference counted, at its
/// compressed size when known.
///
/// A chunk shared by several files counts once per reference. Chunks missing
/// from the catalog contribute nothing.
pub fn calculate_total_size<'a, F>(files: F, catalog: &ChunkCatalog) -> u64
where
    F: IntoIterator<Item = &'a FileEntry>,
{
    files
        .into_iter()
        .flat_map(|f| f.chunk_parts())
        .filter_map(|part| catalog.get(&part.guid))
        .map(|chunk| chunk.download_size())
        .sum()
}

/// Bytes actually fetched when each distinct chunk is downloaded once.
pub fn calculate_unique_download_size<'a, F>(files: F, catalog: &ChunkCatalog) -> u64
where
    F: IntoIterator<Item = &'a FileEntry>,
{
    let mut seen = HashSet::new();
    files
        .into_iter()
        .flat_map(|f| f.chunk_parts())
        .filter(|part| seen.insert(part.guid))
        .filter_map(|part| catalog.get(&part.guid))
        .map(|chunk| chunk.download_size())
        .sum()
}

/// Bytes `files` occupy once installed.
pub fn calculate_uncompressed_size<'a, F>(files: F) -> u64
where
    F: IntoIterator<Item = &'a FileEntry>,
{
    files
        .into_iter()
        .flat_map(|f| f.chunk_parts())
        .map(|part| part.size)
        .sum()
}

/// Format a byte count with binary units, e.g. `1.50 MB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", size, UNITS[unit])
}

/// Check a size estimate against the space the caller measured.
///
/// # Errors
///
/// Returns [`PlanError::InsufficientDiskSpace`] when `required > available`.
pub fn ensure_disk_space(required: u64, available: u64) -> PlanResult<()> {
    if required > available {
        return Err(PlanError::InsufficientDiskSpace {
            required,
            available,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{Chunk, Guid};

    fn chunk(n: u32, size: u64, compressed: Option<u64>) -> Chunk {
        Chunk {
            guid: Guid::from_words([n, 0, 0, 0]),
            hash: 0,
            sha_hash: None,
            md5: None,
            group_num: 0,
            window_size: size as u32,
            size,
            compressed_size: compressed,
        }
    }

    #[test]
    fn test_shared_chunk_counted_per_reference() {
        let a = Guid::from_words([1, 0, 0, 0]);
        let b = Guid::from_words([2, 0, 0, 0]);
        let catalog = ChunkCatalog::new(vec![chunk(1, 100, Some(40)), chunk(2, 50, None)]).unwrap();
        let files = vec![
            FileEntry::builder("x").push_part(a, 0, 100).build().unwrap(),
            FileEntry::builder("y")
                .push_part(a, 0, 100)
                .push_part(b, 0, 50)
                .build()
                .unwrap(),
        ];

        assert_eq!(calculate_total_size(&files, &catalog), 40 + 40 + 50);
        assert_eq!(calculate_unique_download_size(&files, &catalog), 40 + 50);
        assert_eq!(calculate_uncompressed_size(&files), 250);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5.00 GB");
    }

    #[test]
    fn test_ensure_disk_space() {
        assert!(ensure_disk_space(10, 10).is_ok());
        assert!(matches!(
            ensure_disk_space(11, 10),
            Err(PlanError::InsufficientDiskSpace {
                required: 11,
                available: 10
            })
        ));
    }
}
