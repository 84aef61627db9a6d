//! JSON depot manifests (build generations 1 and 2).
//!
//! Generation 2 depots list typed items whose files reference
//! content-addressed chunks by compressed MD5. Generation 1 depots list whole
//! files only; each file becomes one implicit chunk the size of the file.

use md5::{Digest, Md5};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::error::{ManifestError, ManifestResult};
use super::guid::Guid;
use super::model::{
    Chunk, ChunkCatalog, CustomFields, FileEntry, FileFlags, FileHashes, LegacySource, Manifest,
    ManifestFormat, ManifestMeta, SUPPORT_TAG,
};

/// Newest generation 2 depot manifest version understood.
pub const MAX_DEPOT_VERSION: u32 = 2;

const EXECUTABLE_FLAG: &str = "executable";

/// Accept ids that are sent either as strings or as bare numbers.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

pub(crate) fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

// ---------------------------------------------------------------------------
// Generation 2
// ---------------------------------------------------------------------------

/// `{"version": 2, "depot": {"items": [...]}}`
#[derive(Debug, Clone, Deserialize)]
pub struct DepotManifestV2 {
    #[serde(default)]
    pub version: Option<u32>,
    pub depot: DepotItemsV2,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DepotItemsV2 {
    #[serde(default)]
    pub items: Vec<DepotItem>,
}

/// One entry of a generation 2 depot.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum DepotItem {
    DepotFile(DepotFile),
    DepotLink(DepotLink),
    DepotDirectory(DepotDirectory),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepotFile {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub chunks: Vec<FileChunk>,
    #[serde(default)]
    pub md5: Option<String>,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub product_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChunk {
    pub compressed_md5: String,
    #[serde(default)]
    pub md5: String,
    pub size: u64,
    #[serde(default)]
    pub compressed_size: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DepotLink {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub target: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DepotDirectory {
    #[serde(default)]
    pub path: String,
}

impl DepotManifestV2 {
    /// Normalize into the canonical model, deduplicating the chunk catalog.
    pub fn normalize(self) -> ManifestResult<Manifest> {
        let version = self.version.unwrap_or(MAX_DEPOT_VERSION);
        if version > MAX_DEPOT_VERSION {
            return Err(ManifestError::UnsupportedVersion {
                found: version,
                supported: MAX_DEPOT_VERSION,
            });
        }

        let mut chunks = Vec::new();
        let mut files = Vec::new();
        for item in self.depot.items {
            match item {
                DepotItem::DepotFile(file) => files.push(normalize_file(file, &mut chunks)?),
                DepotItem::DepotLink(link) => files.push(
                    FileEntry::builder(link.path)
                        .symlink_target(link.target)
                        .build()?,
                ),
                DepotItem::DepotDirectory(_) | DepotItem::Unknown => {}
            }
        }

        Ok(Manifest {
            format: ManifestFormat::GogGen2,
            version,
            header_size: 0,
            is_compressed: false,
            meta: ManifestMeta::default(),
            chunks: ChunkCatalog::dedup(chunks),
            files,
            custom_fields: CustomFields::default(),
        })
    }
}

fn normalize_file(file: DepotFile, chunks: &mut Vec<Chunk>) -> ManifestResult<FileEntry> {
    let flags = FileFlags {
        executable: file.flags.iter().any(|f| f == EXECUTABLE_FLAG),
        ..FileFlags::default()
    };
    let mut builder = FileEntry::builder(file.path.as_str())
        .hashes(FileHashes {
            sha1: None,
            md5: file.md5.and_then(FileHashes::non_empty),
            sha256: file.sha256.and_then(FileHashes::non_empty),
        })
        .flags(flags)
        .install_tags(file.flags)
        .product_id(file.product_id);

    for chunk in file.chunks {
        let guid = Guid::from_hex(&chunk.compressed_md5)?;
        let size = u32::try_from(chunk.size).map_err(|_| {
            ManifestError::malformed(format!(
                "{}: chunk {} is larger than 4 GiB",
                file.path, chunk.compressed_md5
            ))
        })?;
        builder = builder.push_part(guid, 0, u64::from(size));
        chunks.push(Chunk {
            guid,
            hash: 0,
            sha_hash: None,
            md5: FileHashes::non_empty(chunk.md5),
            group_num: 0,
            window_size: size,
            size: chunk.size,
            compressed_size: chunk.compressed_size,
        });
    }
    builder.build()
}

// ---------------------------------------------------------------------------
// Generation 1
// ---------------------------------------------------------------------------

/// `{"depot": {"files": [...]}}`
#[derive(Debug, Clone, Deserialize)]
pub struct DepotManifestV1 {
    pub depot: DepotFilesV1,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DepotFilesV1 {
    #[serde(default)]
    pub files: Vec<V1DepotFile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct V1DepotFile {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(default)]
    pub support: bool,
    #[serde(default)]
    pub directory: Option<Value>,
}

impl DepotManifestV1 {
    /// Normalize into the canonical model with one implicit chunk per file.
    pub fn normalize(self) -> ManifestResult<Manifest> {
        let mut chunks = Vec::new();
        let mut files = Vec::new();

        for file in self.depot.files {
            if file.directory.is_some() {
                continue;
            }
            let guid = implicit_chunk_guid(&file.hash, &file.path);
            let tags = if file.support {
                vec![SUPPORT_TAG.to_string()]
            } else {
                Vec::new()
            };

            let mut builder = FileEntry::builder(file.path.as_str())
                .declared_size(file.size)
                .hashes(FileHashes {
                    md5: FileHashes::non_empty(file.hash.clone()),
                    ..FileHashes::default()
                })
                .install_tags(tags)
                .legacy_source(LegacySource {
                    url: file.url,
                    offset: file.offset,
                });
            if file.size > 0 {
                builder = builder.push_part(guid, 0, file.size);
                chunks.push(Chunk {
                    guid,
                    hash: 0,
                    sha_hash: None,
                    md5: FileHashes::non_empty(file.hash),
                    group_num: 0,
                    window_size: u32::try_from(file.size).unwrap_or(u32::MAX),
                    size: file.size,
                    compressed_size: None,
                });
            }
            files.push(builder.build()?);
        }

        Ok(Manifest {
            format: ManifestFormat::GogGen1,
            version: 1,
            header_size: 0,
            is_compressed: false,
            meta: ManifestMeta::default(),
            chunks: ChunkCatalog::dedup(chunks),
            files,
            custom_fields: CustomFields::default(),
        })
    }
}

/// Guid of the implicit chunk: the file MD5 when it is well formed,
/// otherwise the MD5 of the path.
fn implicit_chunk_guid(hash: &str, path: &str) -> Guid {
    Guid::from_hex(hash).unwrap_or_else(|_| {
        let mut digest = [0u8; 16];
        digest.copy_from_slice(&Md5::digest(path.as_bytes()));
        Guid::from_digest(&digest)
    })
}
