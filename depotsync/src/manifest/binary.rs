//! Self-framed binary manifest decoding.
//!
//! # Layout
//!
//! ```text
//! header (41 bytes, little endian)
//!   magic u32 | header_size u32 | uncompressed u32 | compressed u32
//!   sha1 [20] | stored_as u8 | version u32
//! body (zlib when stored_as & 1)
//!   Meta | ChunkDataList | FileManifestList | CustomFields?
//! ```
//!
//! Each body section starts with its own byte size and version byte. Bytes a
//! section declares but this decoder does not understand are skipped.

use sha1::{Digest, Sha1};
use tracing::debug;

use super::compression::inflate_zlib;
use super::error::{ManifestError, ManifestResult};
use super::model::{
    Chunk, ChunkCatalog, CustomFields, FileEntry, FileFlags, FileHashes, Manifest, ManifestFormat,
    ManifestMeta,
};
use super::reader::ByteReader;

/// Leading magic of a binary manifest.
pub const MANIFEST_MAGIC: u32 = 0x44BE_C00C;

/// Size of the fixed header.
pub const HEADER_SIZE: usize = 41;

/// Newest binary format version this decoder understands.
pub const MAX_SUPPORTED_VERSION: u32 = 21;

const STORED_COMPRESSED: u8 = 0x1;

/// Smallest possible encoding of one chunk catalog row.
const CHUNK_ROW_SIZE: usize = 16 + 8 + 20 + 1 + 4 + 8;

/// Returns true if `data` starts with the binary manifest magic.
pub fn is_binary(data: &[u8]) -> bool {
    data.len() >= 4 && data[..4] == MANIFEST_MAGIC.to_le_bytes()
}

/// The fixed manifest header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryHeader {
    pub header_size: u32,
    pub uncompressed_size: u32,
    pub compressed_size: u32,
    pub sha1: [u8; 20],
    pub stored_as: u8,
    pub version: u32,
}

impl BinaryHeader {
    pub fn is_compressed(&self) -> bool {
        self.stored_as & STORED_COMPRESSED != 0
    }
}

/// A framed manifest with its body inflated and checksum verified, but
/// sections not yet parsed.
#[derive(Debug, Clone)]
pub struct BinaryManifest {
    pub header: BinaryHeader,
    pub body: Vec<u8>,
}

impl BinaryManifest {
    /// Parse the header, inflate the body and verify its SHA-1.
    ///
    /// # Errors
    ///
    /// - [`ManifestError::Malformed`] for a bad magic or header size
    /// - [`ManifestError::UnsupportedVersion`] for versions above
    ///   [`MAX_SUPPORTED_VERSION`]
    /// - [`ManifestError::Decompression`] when the body cannot be inflated
    ///   to the declared size
    /// - [`ManifestError::ChecksumMismatch`] when the body hash differs
    pub fn unframe(data: &[u8]) -> ManifestResult<Self> {
        let mut reader = ByteReader::new(data);
        let magic = reader.u32()?;
        if magic != MANIFEST_MAGIC {
            return Err(ManifestError::malformed(format!(
                "bad header magic 0x{:08x}",
                magic
            )));
        }

        let header = BinaryHeader {
            header_size: reader.u32()?,
            uncompressed_size: reader.u32()?,
            compressed_size: reader.u32()?,
            sha1: reader.array()?,
            stored_as: reader.u8()?,
            version: reader.u32()?,
        };

        let header_size = header.header_size as usize;
        if header_size < HEADER_SIZE || header_size > data.len() {
            return Err(ManifestError::malformed(format!(
                "header size {} outside [{}, {}]",
                header_size,
                HEADER_SIZE,
                data.len()
            )));
        }
        if header.version > MAX_SUPPORTED_VERSION {
            return Err(ManifestError::UnsupportedVersion {
                found: header.version,
                supported: MAX_SUPPORTED_VERSION,
            });
        }

        let payload = &data[header_size..];
        let body = if header.is_compressed() {
            let inflated = inflate_zlib(payload)?;
            if inflated.len() != header.uncompressed_size as usize {
                return Err(ManifestError::Decompression(format!(
                    "inflated {} bytes, header declares {}",
                    inflated.len(),
                    header.uncompressed_size
                )));
            }
            inflated
        } else {
            payload.to_vec()
        };

        if header.sha1.iter().any(|b| *b != 0) {
            let actual = Sha1::digest(&body);
            if actual.as_slice() != header.sha1.as_slice() {
                return Err(ManifestError::ChecksumMismatch {
                    expected: hex::encode(&header.sha1),
                    actual: hex::encode(&actual),
                });
            }
        }

        Ok(Self { header, body })
    }

    /// Parse the body sections into the canonical model.
    pub fn normalize(self) -> ManifestResult<Manifest> {
        let mut reader = ByteReader::new(&self.body);

        let meta = section(&mut reader, "meta", read_meta)?;
        let chunks = section(&mut reader, "chunk data list", |r, _| read_chunks(r))?;
        let files = section(&mut reader, "file manifest list", read_files)?;
        let custom_fields = if reader.has_remaining() {
            section(&mut reader, "custom fields", |r, _| read_custom_fields(r))?
        } else {
            CustomFields::default()
        };

        debug!(
            version = self.header.version,
            chunks = chunks.len(),
            files = files.len(),
            "Parsed binary manifest body"
        );

        Ok(Manifest {
            format: ManifestFormat::Binary,
            version: self.header.version,
            header_size: self.header.header_size,
            is_compressed: self.header.is_compressed(),
            meta,
            chunks,
            files,
            custom_fields,
        })
    }
}

/// Run `read` over a size-prefixed, versioned section and skip whatever it
/// left unread.
fn section<'a, T>(
    reader: &mut ByteReader<'a>,
    name: &str,
    read: impl FnOnce(&mut ByteReader<'a>, u8) -> ManifestResult<T>,
) -> ManifestResult<T> {
    let start = reader.position();
    let size = reader.u32()? as usize;
    let version = reader.u8()?;
    let value = read(reader, version)?;

    let end = start.saturating_add(size);
    if reader.position() > end {
        return Err(ManifestError::malformed(format!(
            "{} section overran its declared size of {} bytes",
            name, size
        )));
    }
    reader.seek(end)?;
    Ok(value)
}

fn read_string_list(reader: &mut ByteReader<'_>) -> ManifestResult<Vec<String>> {
    let count = reader.count(4)?;
    (0..count).map(|_| reader.fstring()).collect()
}

fn read_meta(reader: &mut ByteReader<'_>, data_version: u8) -> ManifestResult<ManifestMeta> {
    let mut meta = ManifestMeta {
        data_version,
        feature_level: reader.u32()?,
        is_file_data: reader.u8()? != 0,
        app_id: reader.u32()?,
        app_name: reader.fstring()?,
        build_version: reader.fstring()?,
        launch_exe: reader.fstring()?,
        launch_command: reader.fstring()?,
        prereq_ids: read_string_list(reader)?,
        prereq_name: reader.fstring()?,
        prereq_path: reader.fstring()?,
        prereq_args: reader.fstring()?,
        ..ManifestMeta::default()
    };
    if data_version >= 1 {
        meta.build_id = reader.fstring()?;
    }
    if data_version >= 2 {
        meta.uninstall_action_path = reader.fstring()?;
        meta.uninstall_action_args = reader.fstring()?;
    }
    Ok(meta)
}

fn read_chunks(reader: &mut ByteReader<'_>) -> ManifestResult<ChunkCatalog> {
    let count = reader.count(CHUNK_ROW_SIZE)?;

    let guids = (0..count)
        .map(|_| reader.guid())
        .collect::<ManifestResult<Vec<_>>>()?;
    let hashes = (0..count)
        .map(|_| reader.u64())
        .collect::<ManifestResult<Vec<_>>>()?;
    let shas = (0..count)
        .map(|_| reader.array::<20>())
        .collect::<ManifestResult<Vec<_>>>()?;
    let groups = (0..count)
        .map(|_| reader.u8())
        .collect::<ManifestResult<Vec<_>>>()?;
    let windows = (0..count)
        .map(|_| reader.u32())
        .collect::<ManifestResult<Vec<_>>>()?;
    let file_sizes = (0..count)
        .map(|_| reader.i64())
        .collect::<ManifestResult<Vec<_>>>()?;

    let mut chunks = Vec::with_capacity(count);
    for i in 0..count {
        let compressed = u64::try_from(file_sizes[i]).map_err(|_| {
            ManifestError::malformed(format!("negative chunk size for {}", guids[i]))
        })?;
        chunks.push(Chunk {
            guid: guids[i],
            hash: hashes[i],
            sha_hash: FileHashes::non_empty(hex::encode(&shas[i])),
            md5: None,
            group_num: groups[i],
            window_size: windows[i],
            size: u64::from(windows[i]),
            compressed_size: Some(compressed),
        });
    }
    ChunkCatalog::new(chunks)
}

fn read_files(reader: &mut ByteReader<'_>, version: u8) -> ManifestResult<Vec<FileEntry>> {
    let count = reader.count(4 + 4 + 20 + 1 + 4 + 4)?;

    let names = (0..count)
        .map(|_| reader.fstring())
        .collect::<ManifestResult<Vec<_>>>()?;
    let symlinks = (0..count)
        .map(|_| reader.fstring())
        .collect::<ManifestResult<Vec<_>>>()?;
    let shas = (0..count)
        .map(|_| reader.array::<20>())
        .collect::<ManifestResult<Vec<_>>>()?;
    let flags = (0..count)
        .map(|_| reader.u8())
        .collect::<ManifestResult<Vec<_>>>()?;
    let tags = (0..count)
        .map(|_| read_string_list(reader))
        .collect::<ManifestResult<Vec<_>>>()?;

    let mut parts = Vec::with_capacity(count);
    for _ in 0..count {
        let part_count = reader.count(28)?;
        let mut file_parts = Vec::with_capacity(part_count);
        for _ in 0..part_count {
            let start = reader.position();
            let part_size = reader.u32()? as usize;
            let guid = reader.guid()?;
            let offset = reader.u32()?;
            let size = reader.u32()?;
            if reader.position() > start + part_size {
                return Err(ManifestError::malformed("chunk part overran its size"));
            }
            reader.seek(start + part_size)?;
            file_parts.push((guid, offset, size));
        }
        parts.push(file_parts);
    }

    let mut md5s = vec![None; count];
    let mut mimes = vec![String::new(); count];
    if version >= 1 {
        for md5 in md5s.iter_mut() {
            if reader.u32()? != 0 {
                *md5 = FileHashes::non_empty(hex::encode(&reader.array::<16>()?));
            }
        }
        for mime in mimes.iter_mut() {
            *mime = reader.fstring()?;
        }
    }
    let mut sha256s = vec![None; count];
    if version >= 2 {
        for sha256 in sha256s.iter_mut() {
            *sha256 = FileHashes::non_empty(hex::encode(&reader.array::<32>()?));
        }
    }

    let mut files = Vec::with_capacity(count);
    let columns = names
        .into_iter()
        .zip(symlinks)
        .zip(shas)
        .zip(flags)
        .zip(tags)
        .zip(parts)
        .zip(md5s.into_iter().zip(mimes).zip(sha256s));
    for ((((((name, symlink), sha), flags), tags), parts), ((md5, mime), sha256)) in columns {
        let mut builder = FileEntry::builder(name)
            .symlink_target(symlink)
            .hashes(FileHashes {
                sha1: FileHashes::non_empty(hex::encode(&sha)),
                md5,
                sha256,
            })
            .flags(FileFlags::from_bits(flags))
            .install_tags(tags)
            .mime_type(mime);
        for (guid, offset, size) in parts {
            builder = builder.push_part(guid, offset, u64::from(size));
        }
        files.push(builder.build()?);
    }
    Ok(files)
}

fn read_custom_fields(reader: &mut ByteReader<'_>) -> ManifestResult<CustomFields> {
    let count = reader.count(8)?;
    let keys = (0..count)
        .map(|_| reader.fstring())
        .collect::<ManifestResult<Vec<_>>>()?;
    let values = (0..count)
        .map(|_| reader.fstring())
        .collect::<ManifestResult<Vec<_>>>()?;
    Ok(CustomFields::new(keys.into_iter().zip(values).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(version: u32, header_size: u32, body: &[u8]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&MANIFEST_MAGIC.to_le_bytes());
        data.extend_from_slice(&header_size.to_le_bytes());
        data.extend_from_slice(&(body.len() as u32).to_le_bytes());
        data.extend_from_slice(&(body.len() as u32).to_le_bytes());
        data.extend_from_slice(&[0u8; 20]);
        data.push(0);
        data.extend_from_slice(&version.to_le_bytes());
        data.extend_from_slice(body);
        data
    }

    #[test]
    fn test_is_binary() {
        assert!(is_binary(&[0x0c, 0xc0, 0xbe, 0x44, 0x00]));
        assert!(!is_binary(b"{}"));
        assert!(!is_binary(&[0x0c]));
    }

    #[test]
    fn test_newer_version_is_unsupported() {
        let data = header(MAX_SUPPORTED_VERSION + 1, 41, &[]);
        let err = BinaryManifest::unframe(&data).unwrap_err();
        assert!(matches!(
            err,
            ManifestError::UnsupportedVersion { found: 22, supported: 21 }
        ));
    }

    #[test]
    fn test_header_size_past_end_is_malformed() {
        let data = header(18, 4096, &[]);
        assert!(BinaryManifest::unframe(&data).unwrap_err().is_malformed());
    }

    #[test]
    fn test_truncated_header_is_malformed() {
        let data = header(18, 41, &[]);
        assert!(BinaryManifest::unframe(&data[..20]).unwrap_err().is_malformed());
    }

    #[test]
    fn test_bad_zlib_body_is_decompression_error() {
        let mut data = header(18, 41, &[0x78, 0x9c, 0xff, 0xff, 0xff]);
        data[36] = STORED_COMPRESSED;
        let err = BinaryManifest::unframe(&data).unwrap_err();
        assert!(matches!(err, ManifestError::Decompression(_)));
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut data = header(18, 41, b"body");
        data[16] = 0xaa;
        let err = BinaryManifest::unframe(&data).unwrap_err();
        assert!(matches!(err, ManifestError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_section_overrun_is_malformed() {
        // Meta section claiming 5 bytes but containing a full feature level.
        let mut body = Vec::new();
        body.extend_from_slice(&5u32.to_le_bytes());
        body.push(0);
        body.extend_from_slice(&[0u8; 64]);
        let manifest = BinaryManifest {
            header: BinaryManifest::unframe(&header(18, 41, &[])).unwrap().header,
            body,
        };
        assert!(manifest.normalize().unwrap_err().is_malformed());
    }
}
