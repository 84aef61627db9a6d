//! Manifest decoding.
//!
//! Every supported payload is decoded through [`decode`], which sniffs the
//! format, parses it into its raw per-format form ([`RawManifest`]) and
//! normalizes that immediately into the canonical [`Manifest`].
//!
//! # Supported formats
//!
//! | Format | Detected by |
//! |--------|-------------|
//! | Binary | leading magic `0x44BEC00C` |
//! | Chunked JSON depot (gen 2) | `depot.items` |
//! | Flat JSON depot (gen 1) | `depot.files` |
//! | Legacy JSON | `ManifestFileVersion` |
//!
//! JSON payloads may be gzip- or zlib-framed.
//!
//! # Example
//!
//! ```ignore
//! use depotsync::manifest;
//!
//! let manifest = manifest::decode(&bytes)?;
//! println!("{} files, {} chunks", manifest.files.len(), manifest.chunks.len());
//! ```

mod binary;
mod compression;
mod epic_json;
mod error;
mod guid;
mod json;
mod model;
mod product;
mod reader;
mod writer;

pub use binary::{BinaryHeader, BinaryManifest, MANIFEST_MAGIC, MAX_SUPPORTED_VERSION};
pub use compression::{decompress, sniff, Framing};
pub use epic_json::{blob_to_u64, EpicJsonManifest};
pub use error::{ManifestError, ManifestResult};
pub use guid::Guid;
pub use json::{DepotManifestV1, DepotManifestV2, MAX_DEPOT_VERSION};
pub use model::{
    Chunk, ChunkCatalog, ChunkPart, CustomFields, FileEntry, FileEntryBuilder, FileFlags,
    FileHashes, LegacySource, Manifest, ManifestFormat, ManifestMeta, SUPPORT_PREFIX, SUPPORT_TAG,
};
pub use product::{
    decode_product_manifest, normalize_languages, parse_builds, Build, BuildsResponse, Depot,
    Product, ProductManifest, WILDCARD_LANGUAGE,
};
pub use writer::encode_binary;

use serde_json::Value;
use tracing::info;

/// A manifest parsed in its source format, before normalization.
#[derive(Debug, Clone)]
pub enum RawManifest {
    Binary(BinaryManifest),
    EpicJson(Box<EpicJsonManifest>),
    GogGen1(DepotManifestV1),
    GogGen2(DepotManifestV2),
}

impl RawManifest {
    /// Detect the format of `data` and parse it without normalizing.
    pub fn parse(data: &[u8]) -> ManifestResult<Self> {
        if binary::is_binary(data) {
            return BinaryManifest::unframe(data).map(Self::Binary);
        }

        let text = decompress(data)?;
        let value: Value = serde_json::from_slice(&text)?;

        let depot = value.get("depot");
        if depot.and_then(|d| d.get("items")).is_some() {
            Ok(Self::GogGen2(serde_json::from_value(value)?))
        } else if depot.and_then(|d| d.get("files")).is_some() {
            Ok(Self::GogGen1(serde_json::from_value(value)?))
        } else if value.get("ManifestFileVersion").is_some() {
            Ok(Self::EpicJson(Box::new(serde_json::from_value(value)?)))
        } else {
            Err(ManifestError::malformed(
                "payload is neither a binary manifest nor a known JSON manifest",
            ))
        }
    }

    pub fn format(&self) -> ManifestFormat {
        match self {
            Self::Binary(_) => ManifestFormat::Binary,
            Self::EpicJson(_) => ManifestFormat::EpicJson,
            Self::GogGen1(_) => ManifestFormat::GogGen1,
            Self::GogGen2(_) => ManifestFormat::GogGen2,
        }
    }

    /// Convert into the canonical model.
    pub fn normalize(self) -> ManifestResult<Manifest> {
        match self {
            Self::Binary(raw) => raw.normalize(),
            Self::EpicJson(raw) => raw.normalize(),
            Self::GogGen1(raw) => raw.normalize(),
            Self::GogGen2(raw) => raw.normalize(),
        }
    }
}

/// Decode any supported manifest payload into the canonical model.
///
/// # Errors
///
/// - [`ManifestError::Malformed`] / [`ManifestError::Json`] when the bytes
///   match no known framing or are truncated
/// - [`ManifestError::UnsupportedVersion`] for a newer format version
/// - [`ManifestError::Decompression`] when a compressed body cannot be inflated
/// - [`ManifestError::ChecksumMismatch`] when the embedded body hash differs
pub fn decode(data: &[u8]) -> ManifestResult<Manifest> {
    let manifest = RawManifest::parse(data)?.normalize()?;
    info!(
        format = ?manifest.format,
        version = manifest.version,
        files = manifest.files.len(),
        chunks = manifest.chunks.len(),
        "Decoded manifest"
    );
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_json_is_malformed() {
        let err = decode(br#"{"hello": "world"}"#).unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn test_garbage_is_malformed() {
        let err = decode(b"\x00\x01\x02garbage").unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn test_detects_gen2() {
        let raw = RawManifest::parse(br#"{"depot": {"items": []}}"#).unwrap();
        assert_eq!(raw.format(), ManifestFormat::GogGen2);
    }

    #[test]
    fn test_detects_gen1() {
        let raw = RawManifest::parse(br#"{"depot": {"files": []}}"#).unwrap();
        assert_eq!(raw.format(), ManifestFormat::GogGen1);
    }

    #[test]
    fn test_detects_epic_json() {
        let raw = RawManifest::parse(br#"{"ManifestFileVersion": "013000000000"}"#).unwrap();
        assert_eq!(raw.format(), ManifestFormat::EpicJson);
    }
}
