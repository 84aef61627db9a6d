//! Legacy JSON form of the binary manifest.
//!
//! Numeric fields are "blobs": every byte of the little-endian value is
//! written as three decimal digits, so `"013000000000"` is 13.

use std::collections::BTreeMap;

use serde::Deserialize;

use super::error::ManifestResult;
use super::guid::Guid;
use super::model::{
    Chunk, ChunkCatalog, CustomFields, FileEntry, FileFlags, FileHashes, Manifest, ManifestFormat,
    ManifestMeta,
};

/// Chunk window size assumed when the manifest does not carry one.
pub const DEFAULT_WINDOW_SIZE: u32 = 1024 * 1024;

const DEFAULT_FILE_VERSION: &str = "013000000000";

/// Decode a blob-encoded little-endian number. Missing or non-numeric
/// digit groups count as zero; bytes beyond eight are ignored.
pub fn blob_to_u64(blob: &str) -> u64 {
    blob.as_bytes()
        .chunks(3)
        .take(8)
        .enumerate()
        .fold(0u64, |acc, (i, digits)| {
            let byte = std::str::from_utf8(digits)
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(0)
                & 0xff;
            acc | (byte << (8 * i))
        })
}

fn blob_to_u32(blob: &str) -> u32 {
    (blob_to_u64(blob) & u64::from(u32::MAX)) as u32
}

/// Decode a blob into exactly `N` bytes, zero padded.
fn blob_to_bytes<const N: usize>(blob: &str) -> [u8; N] {
    let mut out = [0u8; N];
    for (byte, digits) in out.iter_mut().zip(blob.as_bytes().chunks(3)) {
        *byte = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<u16>().ok())
            .map(|v| (v & 0xff) as u8)
            .unwrap_or(0);
    }
    out
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EpicJsonManifest {
    #[serde(default)]
    pub manifest_file_version: Option<String>,
    #[serde(rename = "bIsFileData", default)]
    pub is_file_data: bool,
    #[serde(rename = "AppID", default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub app_name_string: String,
    #[serde(default)]
    pub build_version_string: String,
    #[serde(default)]
    pub launch_exe_string: String,
    #[serde(default)]
    pub launch_command: String,
    #[serde(default)]
    pub prereq_ids: Vec<String>,
    #[serde(default)]
    pub prereq_name: String,
    #[serde(default)]
    pub prereq_path: String,
    #[serde(default)]
    pub prereq_args: String,
    #[serde(default)]
    pub chunk_filesize_list: BTreeMap<String, String>,
    #[serde(default)]
    pub chunk_hash_list: BTreeMap<String, String>,
    #[serde(default)]
    pub chunk_sha_list: BTreeMap<String, String>,
    #[serde(default)]
    pub data_group_list: BTreeMap<String, String>,
    #[serde(default)]
    pub file_manifest_list: Vec<EpicJsonFile>,
    #[serde(default)]
    pub custom_fields: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EpicJsonFile {
    #[serde(rename = "Filename", default)]
    pub filename: String,
    #[serde(rename = "FileHash", default)]
    pub file_hash: String,
    #[serde(rename = "bIsReadOnly", default)]
    pub read_only: bool,
    #[serde(rename = "bIsCompressed", default)]
    pub compressed: bool,
    #[serde(rename = "bIsUnixExecutable", default)]
    pub executable: bool,
    #[serde(rename = "InstallTags", default)]
    pub install_tags: Vec<String>,
    #[serde(rename = "FileChunkParts", default)]
    pub file_chunk_parts: Vec<EpicJsonPart>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EpicJsonPart {
    pub guid: String,
    pub offset: String,
    pub size: String,
}

impl EpicJsonManifest {
    pub fn normalize(self) -> ManifestResult<Manifest> {
        let version = blob_to_u32(
            self.manifest_file_version
                .as_deref()
                .unwrap_or(DEFAULT_FILE_VERSION),
        );

        let meta = ManifestMeta {
            feature_level: version,
            is_file_data: self.is_file_data,
            app_id: self.app_id.as_deref().map(blob_to_u32).unwrap_or(0),
            app_name: self.app_name_string,
            build_version: self.build_version_string,
            launch_exe: self.launch_exe_string,
            launch_command: self.launch_command,
            prereq_ids: self.prereq_ids,
            prereq_name: self.prereq_name,
            prereq_path: self.prereq_path,
            prereq_args: self.prereq_args,
            ..ManifestMeta::default()
        };

        let mut chunks = Vec::with_capacity(self.chunk_filesize_list.len());
        for (guid_hex, file_size) in &self.chunk_filesize_list {
            let guid = Guid::from_hex(guid_hex)?;
            let lookup = |list: &BTreeMap<String, String>| list.get(guid_hex).cloned();
            chunks.push(Chunk {
                guid,
                hash: lookup(&self.chunk_hash_list)
                    .map(|b| blob_to_u64(&b))
                    .unwrap_or(0),
                sha_hash: lookup(&self.chunk_sha_list).and_then(FileHashes::non_empty),
                md5: None,
                group_num: lookup(&self.data_group_list)
                    .map(|b| (blob_to_u64(&b) & 0xff) as u8)
                    .unwrap_or(0),
                window_size: DEFAULT_WINDOW_SIZE,
                size: u64::from(DEFAULT_WINDOW_SIZE),
                compressed_size: Some(blob_to_u64(file_size)),
            });
        }

        let mut files = Vec::with_capacity(self.file_manifest_list.len());
        for file in self.file_manifest_list {
            let sha1 = blob_to_bytes::<20>(&file.file_hash);
            let mut builder = FileEntry::builder(file.filename)
                .hashes(FileHashes {
                    sha1: FileHashes::non_empty(hex::encode(&sha1)),
                    ..FileHashes::default()
                })
                .flags(FileFlags {
                    read_only: file.read_only,
                    compressed: file.compressed,
                    executable: file.executable,
                })
                .install_tags(file.install_tags);
            for part in file.file_chunk_parts {
                builder = builder.push_part(
                    Guid::from_hex(&part.guid)?,
                    blob_to_u32(&part.offset),
                    u64::from(blob_to_u32(&part.size)),
                );
            }
            files.push(builder.build()?);
        }

        Ok(Manifest {
            format: ManifestFormat::EpicJson,
            version,
            header_size: 0,
            is_compressed: false,
            meta,
            chunks: ChunkCatalog::new(chunks)?,
            files,
            custom_fields: CustomFields::new(self.custom_fields.into_iter().collect()),
        })
    }
}
