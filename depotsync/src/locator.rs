//! Content-addressed chunk URLs.
//!
//! Chunked JSON depots address a chunk by its compressed MD5, sharded into
//! two directory levels: `base/aa/bb/aabbccdd...`. Binary manifests address
//! chunks by group, rolling hash and guid under a version-specific directory.
//! Generation 1 depots keep every file in one `main.bin` blob, fetched by
//! byte range.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::manifest::{Chunk, FileEntry, Manifest, ManifestResult};

/// How a base URL is picked for each chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UrlSelection {
    /// Always the first (highest priority) base URL.
    #[default]
    First,
    /// Rotate through the base URLs.
    RoundRobin,
}

/// Maps chunk hashes to download URLs.
#[derive(Debug, Default)]
pub struct ChunkLocator {
    selection: UrlSelection,
    cursor: AtomicUsize,
}

impl ChunkLocator {
    pub fn new(selection: UrlSelection) -> Self {
        Self {
            selection,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn selection(&self) -> UrlSelection {
        self.selection
    }

    fn pick<'a>(&self, base_urls: &'a [String]) -> Option<&'a str> {
        if base_urls.is_empty() {
            return None;
        }
        let index = match self.selection {
            UrlSelection::First => 0,
            UrlSelection::RoundRobin => self.cursor.fetch_add(1, Ordering::Relaxed) % base_urls.len(),
        };
        Some(base_urls[index].as_str())
    }

    /// Build `hash -> url` for every hash. An empty `base_urls` yields an
    /// empty map, which callers must treat as unresolvable.
    pub fn build_chunk_url_map(
        &self,
        hashes: &[String],
        base_urls: &[String],
    ) -> HashMap<String, String> {
        if base_urls.is_empty() {
            warn!("No base CDN URLs provided");
            return HashMap::new();
        }

        let map: HashMap<String, String> = hashes
            .iter()
            .filter_map(|hash| {
                self.pick(base_urls)
                    .map(|base| (hash.clone(), sharded_url(base, hash)))
            })
            .collect();
        debug!(chunks = map.len(), bases = base_urls.len(), "Built chunk URL map");
        map
    }

    /// Build `hash -> url` using each chunk's product's base URLs. Chunks
    /// with no product or no URLs for their product are omitted.
    pub fn build_chunk_url_map_with_products(
        &self,
        hashes: &[String],
        chunk_to_product: &HashMap<String, String>,
        product_urls: &HashMap<String, Vec<String>>,
    ) -> HashMap<String, String> {
        let mut map = HashMap::with_capacity(hashes.len());
        for hash in hashes {
            let Some(product_id) = chunk_to_product.get(hash) else {
                warn!(chunk = %hash, "No product for chunk");
                continue;
            };
            let Some(base) = product_urls.get(product_id).and_then(|urls| self.pick(urls)) else {
                warn!(chunk = %hash, product_id = %product_id, "No URLs for product");
                continue;
            };
            map.insert(hash.clone(), sharded_url(base, hash));
        }
        debug!(
            chunks = map.len(),
            products = product_urls.len(),
            "Built per-product chunk URL map"
        );
        map
    }
}

/// Name of the generation 1 depot blob.
pub const MAIN_BIN: &str = "main.bin";

/// `base/main.bin`.
pub fn main_bin_url(base: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), MAIN_BIN)
}

/// Inclusive byte range inside a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Range of `len` bytes at `offset`; `None` for an empty range.
    pub fn new(offset: u64, len: u64) -> Option<Self> {
        let end = offset.checked_add(len.checked_sub(1)?)?;
        Some(Self { start: offset, end })
    }

    /// Value for an HTTP `Range` header, e.g. `bytes=1024-2047`.
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// `base/aa/bb/hash`, or `base/hash` for hashes shorter than four characters.
pub fn sharded_url(base: &str, hash: &str) -> String {
    match (hash.get(0..2), hash.get(2..4)) {
        (Some(first), Some(second)) if hash.len() >= 4 => {
            format!("{}/{}/{}/{}", base, first, second, hash)
        }
        _ => format!("{}/{}", base, hash),
    }
}

/// Build `hash -> url` with [`UrlSelection::First`].
pub fn build_chunk_url_map(hashes: &[String], base_urls: &[String]) -> HashMap<String, String> {
    ChunkLocator::default().build_chunk_url_map(hashes, base_urls)
}

/// Per-product variant of [`build_chunk_url_map`].
pub fn build_chunk_url_map_with_products(
    hashes: &[String],
    chunk_to_product: &HashMap<String, String>,
    product_urls: &HashMap<String, Vec<String>>,
) -> HashMap<String, String> {
    ChunkLocator::default().build_chunk_url_map_with_products(hashes, chunk_to_product, product_urls)
}

/// Distinct chunk hashes referenced by `files`, in first-seen order.
pub fn extract_chunk_hashes<'a, F>(files: F) -> Vec<String>
where
    F: IntoIterator<Item = &'a FileEntry>,
{
    let mut seen = HashSet::new();
    let mut ordered = Vec::new();
    let mut file_count = 0usize;
    for file in files {
        file_count += 1;
        for part in file.chunk_parts() {
            if seen.insert(part.guid) {
                ordered.push(part.guid.to_string());
            }
        }
    }
    debug!(chunks = ordered.len(), files = file_count, "Extracted unique chunks");
    ordered
}

/// Owning product of every chunk, first file wins.
pub fn chunk_product_map<'a, F>(files: F, base_product_id: &str) -> HashMap<String, String>
where
    F: IntoIterator<Item = &'a FileEntry>,
{
    let mut map = HashMap::new();
    for file in files {
        let product = file.product_id().unwrap_or(base_product_id);
        for part in file.chunk_parts() {
            map.entry(part.guid.to_string())
                .or_insert_with(|| product.to_string());
        }
    }
    map
}

/// Chunk directory for a binary manifest version.
pub fn epic_chunk_dir(version: u32) -> &'static str {
    match version {
        v if v >= 15 => "ChunksV4",
        v if v >= 6 => "ChunksV3",
        v if v >= 3 => "ChunksV2",
        _ => "Chunks",
    }
}

/// Relative chunk path: `{dir}/{group:02}/{HASH:016X}_{GUID}.chunk`.
pub fn epic_chunk_path(version: u32, chunk: &Chunk) -> String {
    format!(
        "{}/{:02}/{:016X}_{}.chunk",
        epic_chunk_dir(version),
        chunk.group_num,
        chunk.hash,
        chunk.guid.to_upper_hex()
    )
}

/// Build `guid -> url` for binary-manifest chunks.
pub fn build_epic_chunk_url_map<'a, C>(
    locator: &ChunkLocator,
    manifest: &Manifest,
    chunks: C,
    base_urls: &[String],
) -> HashMap<String, String>
where
    C: IntoIterator<Item = &'a Chunk>,
{
    let mut map = HashMap::new();
    for chunk in chunks {
        let Some(base) = locator.pick(base_urls) else {
            warn!("No base CDN URLs provided");
            return HashMap::new();
        };
        map.insert(
            chunk.guid.to_string(),
            format!(
                "{}/{}",
                base.trim_end_matches('/'),
                epic_chunk_path(manifest.version, chunk)
            ),
        );
    }
    map
}

#[derive(Debug, Deserialize)]
struct SecureLinks {
    #[serde(default)]
    urls: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct SecureLink {
    #[serde(default)]
    url_format: String,
    #[serde(default)]
    parameters: Option<serde_json::Map<String, Value>>,
}

/// Expand a secure-link response into base URLs by substituting every
/// `{key}` of `url_format` with its parameter value.
pub fn parse_secure_links(data: &[u8]) -> ManifestResult<Vec<String>> {
    let links: SecureLinks = serde_json::from_slice(data)?;
    let mut urls = Vec::new();
    for entry in links.urls {
        let Ok(link) = serde_json::from_value::<SecureLink>(entry) else {
            continue;
        };
        let Some(parameters) = link.parameters else {
            continue;
        };
        if link.url_format.is_empty() {
            continue;
        }
        let mut url = link.url_format;
        for (key, value) in parameters {
            let value = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            url = url.replace(&format!("{{{}}}", key), &value);
        }
        let url = url.replace("\\/", "/");
        if !url.is_empty() {
            urls.push(url);
        }
    }
    Ok(urls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Guid;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_sharded_url() {
        let map = build_chunk_url_map(&strings(&["aabbccdd"]), &strings(&["http://x"]));
        assert_eq!(map["aabbccdd"], "http://x/aa/bb/aabbccdd");
    }

    #[test]
    fn test_short_hash_is_not_sharded() {
        let map = build_chunk_url_map(&strings(&["abc"]), &strings(&["http://x"]));
        assert_eq!(map["abc"], "http://x/abc");
    }

    #[test]
    fn test_empty_base_urls_yield_empty_map() {
        assert!(build_chunk_url_map(&strings(&["aabbccdd"]), &[]).is_empty());
    }

    #[test]
    fn test_first_selection_always_uses_first_base() {
        let map = build_chunk_url_map(&strings(&["aaaa", "bbbb"]), &strings(&["http://a", "http://b"]));
        assert!(map.values().all(|u| u.starts_with("http://a/")));
    }

    #[test]
    fn test_round_robin_rotates() {
        let locator = ChunkLocator::new(UrlSelection::RoundRobin);
        let map = locator.build_chunk_url_map(
            &strings(&["aaaa", "bbbb"]),
            &strings(&["http://a", "http://b"]),
        );
        assert_eq!(map["aaaa"], "http://a/aa/aa/aaaa");
        assert_eq!(map["bbbb"], "http://b/bb/bb/bbbb");
    }

    #[test]
    fn test_per_product_map_omits_unknown_products() {
        let chunk_to_product: HashMap<String, String> = [
            ("aaaa".to_string(), "base".to_string()),
            ("bbbb".to_string(), "dlc".to_string()),
        ]
        .into_iter()
        .collect();
        let product_urls: HashMap<String, Vec<String>> =
            [("base".to_string(), strings(&["http://base"]))].into_iter().collect();

        let map = build_chunk_url_map_with_products(
            &strings(&["aaaa", "bbbb", "cccc"]),
            &chunk_to_product,
            &product_urls,
        );
        assert_eq!(map.len(), 1);
        assert_eq!(map["aaaa"], "http://base/aa/aa/aaaa");
    }

    #[test]
    fn test_extract_chunk_hashes_dedups_in_order() {
        let a = Guid::from_words([0xa, 0, 0, 0]);
        let b = Guid::from_words([0xb, 0, 0, 0]);
        let c = Guid::from_words([0xc, 0, 0, 0]);
        let files = vec![
            FileEntry::builder("one")
                .push_part(a, 0, 1)
                .push_part(b, 0, 1)
                .build()
                .unwrap(),
            FileEntry::builder("two")
                .push_part(a, 0, 1)
                .push_part(c, 0, 1)
                .build()
                .unwrap(),
        ];
        let hashes = extract_chunk_hashes(&files);
        assert_eq!(hashes, vec![a.to_string(), b.to_string(), c.to_string()]);
    }

    #[test]
    fn test_epic_chunk_path() {
        let chunk = Chunk {
            guid: Guid::from_words([0xaabbccdd, 0x00112233, 0x44556677, 0x8899eeff]),
            hash: 0x0123_4567_89ab_cdef,
            sha_hash: None,
            md5: None,
            group_num: 7,
            window_size: 1024,
            size: 1024,
            compressed_size: None,
        };
        assert_eq!(
            epic_chunk_path(18, &chunk),
            "ChunksV4/07/0123456789ABCDEF_AABBCCDD00112233445566778899EEFF.chunk"
        );
        assert_eq!(epic_chunk_dir(6), "ChunksV3");
        assert_eq!(epic_chunk_dir(3), "ChunksV2");
        assert_eq!(epic_chunk_dir(2), "Chunks");
    }

    #[test]
    fn test_parse_secure_links() {
        let json = br#"{"urls": [
            {"url_format": "{base_url}\\/token={token}{path}", "parameters": {"base_url": "https://cdn.example", "token": "abc", "path": "/content/1"}},
            {"url_format": "", "parameters": {}},
            {"url_format": "https://no-params"}
        ]}"#;
        let urls = parse_secure_links(json).unwrap();
        assert_eq!(urls, vec!["https://cdn.example/token=abc/content/1"]);
    }

    #[test]
    fn test_blob_range_header() {
        assert_eq!(main_bin_url("https://cdn/x/"), "https://cdn/x/main.bin");
        let range = ByteRange::new(1024, 10).unwrap();
        assert_eq!(range.header_value(), "bytes=1024-1033");
        assert_eq!(ByteRange::new(1024, 0), None);
    }
}
