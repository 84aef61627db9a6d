//! Binary manifest encoding.
//!
//! Produces the same framing [`super::binary`] reads: a 41-byte header
//! followed by a zlib-compressed body whose SHA-1 is stored in the header.

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use sha1::{Digest, Sha1};

use super::binary::{HEADER_SIZE, MANIFEST_MAGIC, MAX_SUPPORTED_VERSION};
use super::error::{ManifestError, ManifestResult};
use super::guid::Guid;
use super::model::{ChunkCatalog, CustomFields, FileEntry, Manifest, ManifestMeta};

/// Lowest version written by the encoder.
pub const DEFAULT_SERIALIZATION_VERSION: u32 = 17;

#[derive(Default)]
struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    fn guid(&mut self, guid: Guid) {
        self.bytes(&guid.to_le_bytes());
    }

    fn len_u32(&mut self, len: usize) {
        self.u32(u32::try_from(len).unwrap_or(u32::MAX));
    }

    fn fstring(&mut self, s: &str) {
        if s.is_empty() {
            self.u32(0);
        } else if s.is_ascii() {
            self.len_u32(s.len() + 1);
            self.bytes(s.as_bytes());
            self.u8(0);
        } else {
            let units: Vec<u16> = s.encode_utf16().collect();
            let len = i32::try_from(units.len() + 1).unwrap_or(i32::MAX);
            self.bytes(&(-len).to_le_bytes());
            for unit in units {
                self.bytes(&unit.to_le_bytes());
            }
            self.bytes(&[0, 0]);
        }
    }

    fn strings(&mut self, list: &[String]) {
        self.len_u32(list.len());
        for s in list {
            self.fstring(s);
        }
    }

    /// Write a size-prefixed section, patching the size once `body` is done.
    fn section(&mut self, version: u8, body: impl FnOnce(&mut Self)) {
        let start = self.buf.len();
        self.u32(0);
        self.u8(version);
        body(self);
        let size = (self.buf.len() - start) as u32;
        self.buf[start..start + 4].copy_from_slice(&size.to_le_bytes());
    }

    /// Part records carry their own size prefix like sections, minus the version.
    fn part(&mut self, guid: Guid, offset: u32, size: u64) {
        let start = self.buf.len();
        self.u32(0);
        self.guid(guid);
        self.u32(offset);
        self.u32(u32::try_from(size).unwrap_or(u32::MAX));
        let len = (self.buf.len() - start) as u32;
        self.buf[start..start + 4].copy_from_slice(&len.to_le_bytes());
    }
}

/// Encode `manifest` as a compressed binary manifest.
///
/// The header version is `max(17, feature level)` capped at the newest
/// supported version; the written meta feature level matches it.
///
/// # Errors
///
/// Returns `Malformed` when a chunk part is too large for the 32-bit part
/// size of the binary layout.
pub fn encode_binary(manifest: &Manifest) -> ManifestResult<Vec<u8>> {
    if let Some(file) = manifest
        .files
        .iter()
        .find(|f| f.chunk_parts().iter().any(|p| p.size > u64::from(u32::MAX)))
    {
        return Err(ManifestError::malformed(format!(
            "{}: chunk part too large for a binary manifest",
            file.path()
        )));
    }

    let version = manifest
        .meta
        .feature_level
        .max(DEFAULT_SERIALIZATION_VERSION)
        .min(MAX_SUPPORTED_VERSION);

    let mut body = ByteWriter::default();
    write_meta(&mut body, &manifest.meta, version);
    write_chunks(&mut body, &manifest.chunks);
    write_files(&mut body, &manifest.files);
    write_custom_fields(&mut body, &manifest.custom_fields);
    let body = body.buf;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    // Writing into a Vec cannot fail.
    let compressed = encoder
        .write_all(&body)
        .and_then(|_| encoder.finish())
        .unwrap_or_default();
    let sha = Sha1::digest(&body);

    let mut out = ByteWriter::default();
    out.u32(MANIFEST_MAGIC);
    out.len_u32(HEADER_SIZE);
    out.len_u32(body.len());
    out.len_u32(compressed.len());
    out.bytes(sha.as_slice());
    out.u8(0x1);
    out.u32(version);
    out.bytes(&compressed);
    Ok(out.buf)
}

fn write_meta(w: &mut ByteWriter, meta: &ManifestMeta, version: u32) {
    w.section(meta.data_version, |w| {
        w.u32(version);
        w.u8(u8::from(meta.is_file_data));
        w.u32(meta.app_id);
        w.fstring(&meta.app_name);
        w.fstring(&meta.build_version);
        w.fstring(&meta.launch_exe);
        w.fstring(&meta.launch_command);
        w.strings(&meta.prereq_ids);
        w.fstring(&meta.prereq_name);
        w.fstring(&meta.prereq_path);
        w.fstring(&meta.prereq_args);
        if meta.data_version >= 1 {
            w.fstring(&meta.build_id);
        }
        if meta.data_version >= 2 {
            w.fstring(&meta.uninstall_action_path);
            w.fstring(&meta.uninstall_action_args);
        }
    });
}

fn write_chunks(w: &mut ByteWriter, chunks: &ChunkCatalog) {
    w.section(0, |w| {
        w.len_u32(chunks.len());
        for chunk in chunks.iter() {
            w.guid(chunk.guid);
        }
        for chunk in chunks.iter() {
            w.u64(chunk.hash);
        }
        for chunk in chunks.iter() {
            w.bytes(&digest_bytes::<20>(chunk.sha_hash.as_deref()));
        }
        for chunk in chunks.iter() {
            w.u8(chunk.group_num);
        }
        for chunk in chunks.iter() {
            w.u32(chunk.window_size);
        }
        for chunk in chunks.iter() {
            w.i64(i64::try_from(chunk.download_size()).unwrap_or(i64::MAX));
        }
    });
}

fn write_files(w: &mut ByteWriter, files: &[FileEntry]) {
    let has_sha256 = files.iter().any(|f| f.hashes().sha256.is_some());
    let has_v1 = files
        .iter()
        .any(|f| f.hashes().md5.is_some() || f.mime_type().is_some());
    let version = if has_sha256 {
        2
    } else if has_v1 {
        1
    } else {
        0
    };

    w.section(version, |w| {
        w.len_u32(files.len());
        for file in files {
            w.fstring(file.path());
        }
        for file in files {
            w.fstring(file.symlink_target().unwrap_or_default());
        }
        for file in files {
            let sha = digest_bytes::<20>(file.hashes().sha1.as_deref());
            w.bytes(&sha);
        }
        for file in files {
            w.u8(file.flags().bits());
        }
        for file in files {
            w.strings(file.install_tags());
        }
        for file in files {
            w.len_u32(file.chunk_parts().len());
            for part in file.chunk_parts() {
                w.part(part.guid, part.offset, part.size);
            }
        }
        if version >= 1 {
            for file in files {
                match file.hashes().md5.as_deref().and_then(decode_digest::<16>) {
                    Some(md5) => {
                        w.u32(1);
                        w.bytes(&md5);
                    }
                    None => w.u32(0),
                }
            }
            for file in files {
                w.fstring(file.mime_type().unwrap_or_default());
            }
        }
        if version >= 2 {
            for file in files {
                w.bytes(&digest_bytes::<32>(file.hashes().sha256.as_deref()));
            }
        }
    });
}

fn write_custom_fields(w: &mut ByteWriter, fields: &CustomFields) {
    w.section(0, |w| {
        w.len_u32(fields.len());
        for (key, _) in fields.iter() {
            w.fstring(key);
        }
        for (_, value) in fields.iter() {
            w.fstring(value);
        }
    });
}

fn decode_digest<const N: usize>(hex_digest: &str) -> Option<[u8; N]> {
    let mut out = [0u8; N];
    hex::decode_to_slice(hex_digest, &mut out).ok()?;
    Some(out)
}

fn digest_bytes<const N: usize>(hex_digest: Option<&str>) -> [u8; N] {
    hex_digest
        .and_then(decode_digest::<N>)
        .unwrap_or([0u8; N])
}
