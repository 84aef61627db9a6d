//! Canonical manifest model.
//!
//! Every supported manifest format is normalized into these types right after
//! decoding. Values are immutable once built: catalogs validate guid
//! uniqueness and files validate chunk-part coverage at construction time.

use std::collections::HashMap;

use super::error::{ManifestError, ManifestResult};
use super::guid::Guid;

/// Install tag marking redistributable/support content.
pub const SUPPORT_TAG: &str = "support";

/// Directory prefix reserved for redistributable installers.
pub const SUPPORT_PREFIX: &str = "__redist/";

/// Which source format a manifest was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    /// Self-framed binary manifest.
    Binary,
    /// Legacy JSON manifest of the binary-manifest storefront.
    EpicJson,
    /// Flat per-file JSON depot manifest (build generation 1).
    GogGen1,
    /// Chunked JSON depot manifest (build generation 2).
    GogGen2,
}

impl ManifestFormat {
    /// Build generation the format belongs to.
    pub fn generation(&self) -> u32 {
        match self {
            Self::GogGen1 => 1,
            _ => 2,
        }
    }
}

/// Manifest metadata block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestMeta {
    pub data_version: u8,
    pub feature_level: u32,
    pub is_file_data: bool,
    pub app_id: u32,
    pub app_name: String,
    pub build_version: String,
    pub launch_exe: String,
    pub launch_command: String,
    pub prereq_ids: Vec<String>,
    pub prereq_name: String,
    pub prereq_path: String,
    pub prereq_args: String,
    pub build_id: String,
    pub uninstall_action_path: String,
    pub uninstall_action_args: String,
}

/// A content-addressed unit of file bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub guid: Guid,
    /// Rolling hash used for dedup and CDN paths (0 when the format has none).
    pub hash: u64,
    /// SHA-1 of the chunk data (lowercase hex).
    pub sha_hash: Option<String>,
    /// MD5 of the uncompressed chunk data (lowercase hex).
    pub md5: Option<String>,
    pub group_num: u8,
    pub window_size: u32,
    /// Uncompressed size in bytes.
    pub size: u64,
    /// Download size in bytes, when the format declares it.
    pub compressed_size: Option<u64>,
}

impl Chunk {
    /// Bytes that must be fetched for this chunk.
    pub fn download_size(&self) -> u64 {
        self.compressed_size.unwrap_or(self.size)
    }
}

/// Ordered chunk list with a guid index.
#[derive(Debug, Clone, Default)]
pub struct ChunkCatalog {
    chunks: Vec<Chunk>,
    index: HashMap<Guid, usize>,
}

impl ChunkCatalog {
    /// Build a catalog, rejecting duplicate guids.
    pub fn new(chunks: Vec<Chunk>) -> ManifestResult<Self> {
        let mut index = HashMap::with_capacity(chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            if index.insert(chunk.guid, i).is_some() {
                return Err(ManifestError::malformed(format!(
                    "duplicate chunk guid {}",
                    chunk.guid
                )));
            }
        }
        Ok(Self { chunks, index })
    }

    /// Build a catalog, keeping only the first chunk seen for each guid.
    pub fn dedup(chunks: impl IntoIterator<Item = Chunk>) -> Self {
        let mut catalog = Self::default();
        for chunk in chunks {
            if !catalog.index.contains_key(&chunk.guid) {
                catalog.index.insert(chunk.guid, catalog.chunks.len());
                catalog.chunks.push(chunk);
            }
        }
        catalog
    }

    pub fn get(&self, guid: &Guid) -> Option<&Chunk> {
        self.index.get(guid).map(|&i| &self.chunks[i])
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Chunk> {
        self.chunks.iter()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// A byte range of a chunk written at a given offset of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPart {
    pub guid: Guid,
    /// Offset within the chunk.
    pub offset: u32,
    pub size: u64,
    /// Offset within the destination file.
    pub file_offset: u64,
}

/// Declared content hashes of a file (lowercase hex).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileHashes {
    pub sha1: Option<String>,
    pub md5: Option<String>,
    pub sha256: Option<String>,
}

impl FileHashes {
    /// Treat empty and all-zero digests as absent.
    pub(crate) fn non_empty(hex: String) -> Option<String> {
        if hex.is_empty() || hex.chars().all(|c| c == '0') {
            None
        } else {
            Some(hex.to_ascii_lowercase())
        }
    }
}

/// File attribute flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileFlags {
    pub read_only: bool,
    pub compressed: bool,
    pub executable: bool,
}

impl FileFlags {
    const READ_ONLY: u8 = 0x1;
    const COMPRESSED: u8 = 0x2;
    const EXECUTABLE: u8 = 0x4;

    pub fn from_bits(bits: u8) -> Self {
        Self {
            read_only: bits & Self::READ_ONLY != 0,
            compressed: bits & Self::COMPRESSED != 0,
            executable: bits & Self::EXECUTABLE != 0,
        }
    }

    pub fn bits(&self) -> u8 {
        let mut bits = 0;
        if self.read_only {
            bits |= Self::READ_ONLY;
        }
        if self.compressed {
            bits |= Self::COMPRESSED;
        }
        if self.executable {
            bits |= Self::EXECUTABLE;
        }
        bits
    }
}

/// Where a generation 1 file lives: a whole-file URL or a range in a blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacySource {
    pub url: Option<String>,
    pub offset: Option<u64>,
}

/// A file of the install, assembled from chunk parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    path: String,
    symlink_target: Option<String>,
    hashes: FileHashes,
    size: u64,
    flags: FileFlags,
    install_tags: Vec<String>,
    chunk_parts: Vec<ChunkPart>,
    product_id: Option<String>,
    mime_type: Option<String>,
    legacy_source: Option<LegacySource>,
}

impl FileEntry {
    /// Start building a file at `path`.
    pub fn builder(path: impl Into<String>) -> FileEntryBuilder {
        FileEntryBuilder::new(path)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn symlink_target(&self) -> Option<&str> {
        self.symlink_target.as_deref()
    }

    pub fn is_symlink(&self) -> bool {
        self.symlink_target.is_some()
    }

    pub fn hashes(&self) -> &FileHashes {
        &self.hashes
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn flags(&self) -> FileFlags {
        self.flags
    }

    pub fn install_tags(&self) -> &[String] {
        &self.install_tags
    }

    pub fn chunk_parts(&self) -> &[ChunkPart] {
        &self.chunk_parts
    }

    pub fn product_id(&self) -> Option<&str> {
        self.product_id.as_deref()
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    pub fn legacy_source(&self) -> Option<&LegacySource> {
        self.legacy_source.as_ref()
    }

    /// Redistributable content: tagged `support` or under `__redist/`.
    pub fn is_support(&self) -> bool {
        self.install_tags.iter().any(|t| t == SUPPORT_TAG) || self.path.starts_with(SUPPORT_PREFIX)
    }
}

/// Builder that validates a [`FileEntry`] before handing it out.
#[derive(Debug, Clone)]
pub struct FileEntryBuilder {
    path: String,
    symlink_target: Option<String>,
    hashes: FileHashes,
    declared_size: Option<u64>,
    flags: FileFlags,
    install_tags: Vec<String>,
    parts: Vec<ChunkPart>,
    product_id: Option<String>,
    mime_type: Option<String>,
    legacy_source: Option<LegacySource>,
}

impl FileEntryBuilder {
    fn new(path: impl Into<String>) -> Self {
        Self {
            path: normalize_path(&path.into()),
            symlink_target: None,
            hashes: FileHashes::default(),
            declared_size: None,
            flags: FileFlags::default(),
            install_tags: Vec::new(),
            parts: Vec::new(),
            product_id: None,
            mime_type: None,
            legacy_source: None,
        }
    }

    pub fn symlink_target(mut self, target: impl Into<String>) -> Self {
        let target = target.into();
        self.symlink_target = (!target.is_empty()).then_some(target);
        self
    }

    pub fn hashes(mut self, hashes: FileHashes) -> Self {
        self.hashes = hashes;
        self
    }

    /// Size the file claims to have; checked against the parts on build.
    pub fn declared_size(mut self, size: u64) -> Self {
        self.declared_size = Some(size);
        self
    }

    pub fn flags(mut self, flags: FileFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn install_tags(mut self, tags: Vec<String>) -> Self {
        self.install_tags = tags;
        self
    }

    pub fn product_id(mut self, product_id: Option<String>) -> Self {
        self.product_id = product_id;
        self
    }

    pub fn mime_type(mut self, mime: impl Into<String>) -> Self {
        let mime = mime.into();
        self.mime_type = (!mime.is_empty()).then_some(mime);
        self
    }

    pub fn legacy_source(mut self, source: LegacySource) -> Self {
        self.legacy_source = Some(source);
        self
    }

    /// Append a part directly after the previous one.
    pub fn push_part(mut self, guid: Guid, offset: u32, size: u64) -> Self {
        let file_offset = self
            .parts
            .last()
            .map(|p| p.file_offset + p.size)
            .unwrap_or(0);
        self.parts.push(ChunkPart {
            guid,
            offset,
            size,
            file_offset,
        });
        self
    }

    /// Append a part with an explicit file offset.
    pub fn part(mut self, part: ChunkPart) -> Self {
        self.parts.push(part);
        self
    }

    /// Validate chunk-part coverage and produce the file.
    pub fn build(mut self) -> ManifestResult<FileEntry> {
        if self.path.is_empty() {
            return Err(ManifestError::malformed("file entry with empty path"));
        }

        self.parts.sort_by_key(|p| p.file_offset);
        let mut expected_offset = 0u64;
        for part in &self.parts {
            if part.file_offset != expected_offset {
                return Err(ManifestError::malformed(format!(
                    "{}: chunk part at offset {} leaves a gap or overlap (expected {})",
                    self.path, part.file_offset, expected_offset
                )));
            }
            expected_offset += part.size;
        }

        let size = match self.declared_size {
            Some(declared) if declared != expected_offset => {
                return Err(ManifestError::malformed(format!(
                    "{}: declared size {} but chunk parts cover {} bytes",
                    self.path, declared, expected_offset
                )));
            }
            _ => expected_offset,
        };

        Ok(FileEntry {
            path: self.path,
            symlink_target: self.symlink_target,
            hashes: self.hashes,
            size,
            flags: self.flags,
            install_tags: self.install_tags,
            chunk_parts: self.parts,
            product_id: self.product_id,
            mime_type: self.mime_type,
            legacy_source: self.legacy_source,
        })
    }
}

/// Convert a store path into the forward-slash relative form.
pub(crate) fn normalize_path(path: &str) -> String {
    path.replace('\\', "/").trim_start_matches('/').to_string()
}

/// Opaque key/value block carried through unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CustomFields(Vec<(String, String)>);

impl CustomFields {
    pub fn new(fields: Vec<(String, String)>) -> Self {
        Self(fields)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A decoded, normalized manifest.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub format: ManifestFormat,
    pub version: u32,
    pub header_size: u32,
    pub is_compressed: bool,
    pub meta: ManifestMeta,
    pub chunks: ChunkCatalog,
    pub files: Vec<FileEntry>,
    pub custom_fields: CustomFields,
}

impl Manifest {
    pub fn file(&self, path: &str) -> Option<&FileEntry> {
        self.files.iter().find(|f| f.path == path)
    }

    /// Files flagged executable.
    pub fn executable_files(&self) -> impl Iterator<Item = &FileEntry> {
        self.files.iter().filter(|f| f.flags.executable)
    }

    /// Sum of all file sizes.
    pub fn installed_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guid(n: u32) -> Guid {
        Guid::from_words([n, 0, 0, 0])
    }

    fn chunk(n: u32) -> Chunk {
        Chunk {
            guid: guid(n),
            hash: u64::from(n),
            sha_hash: None,
            md5: None,
            group_num: 0,
            window_size: 1024,
            size: 1024,
            compressed_size: None,
        }
    }

    #[test]
    fn test_builder_assigns_contiguous_offsets() {
        let file = FileEntry::builder("bin/game.exe")
            .push_part(guid(1), 0, 100)
            .push_part(guid(2), 50, 28)
            .build()
            .unwrap();

        assert_eq!(file.size(), 128);
        assert_eq!(file.chunk_parts()[1].file_offset, 100);
    }

    #[test]
    fn test_builder_rejects_gap() {
        let result = FileEntry::builder("a")
            .part(ChunkPart {
                guid: guid(1),
                offset: 0,
                size: 10,
                file_offset: 0,
            })
            .part(ChunkPart {
                guid: guid(2),
                offset: 0,
                size: 10,
                file_offset: 12,
            })
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_rejects_size_disagreement() {
        let result = FileEntry::builder("a")
            .declared_size(11)
            .push_part(guid(1), 0, 10)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_sorts_parts_by_file_offset() {
        let file = FileEntry::builder("a")
            .part(ChunkPart {
                guid: guid(2),
                offset: 0,
                size: 5,
                file_offset: 5,
            })
            .part(ChunkPart {
                guid: guid(1),
                offset: 0,
                size: 5,
                file_offset: 0,
            })
            .build()
            .unwrap();
        assert_eq!(file.chunk_parts()[0].guid, guid(1));
    }

    #[test]
    fn test_path_normalization() {
        let file = FileEntry::builder("\\Game\\Data\\pak0.pak").build().unwrap();
        assert_eq!(file.path(), "Game/Data/pak0.pak");
    }

    #[test]
    fn test_support_detection() {
        let tagged = FileEntry::builder("vcredist.exe")
            .install_tags(vec![SUPPORT_TAG.to_string()])
            .build()
            .unwrap();
        let prefixed = FileEntry::builder("__redist/dx/setup.exe").build().unwrap();
        let game = FileEntry::builder("game.exe").build().unwrap();

        assert!(tagged.is_support());
        assert!(prefixed.is_support());
        assert!(!game.is_support());
    }

    #[test]
    fn test_catalog_rejects_duplicate_guid() {
        assert!(ChunkCatalog::new(vec![chunk(1), chunk(1)]).is_err());
    }

    #[test]
    fn test_catalog_dedup_keeps_first() {
        let mut second = chunk(1);
        second.size = 1;
        let catalog = ChunkCatalog::dedup(vec![chunk(1), second, chunk(2)]);
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get(&guid(1)).unwrap().size, 1024);
    }

    #[test]
    fn test_flags_bits_round_trip() {
        let flags = FileFlags::from_bits(0x5);
        assert!(flags.read_only && flags.executable && !flags.compressed);
        assert_eq!(flags.bits(), 0x5);
    }

    #[test]
    fn test_zero_hash_is_absent() {
        assert_eq!(FileHashes::non_empty("0000".into()), None);
        assert_eq!(FileHashes::non_empty(String::new()), None);
        assert_eq!(FileHashes::non_empty("AB".into()), Some("ab".into()));
    }
}
