//! Payload decompression with magic-byte sniffing.
//!
//! JSON manifests arrive gzip-framed, zlib-framed, or as plain text. The
//! framing is detected from the first bytes; anything unrecognized is passed
//! through untouched so plain input never fails here.

use std::borrow::Cow;
use std::io::Read;

use flate2::read::{GzDecoder, ZlibDecoder};

use super::error::{ManifestError, ManifestResult};

/// Detected payload framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Gzip,
    Zlib,
    Plain,
}

/// Identify the framing of `data` from its leading bytes.
pub fn sniff(data: &[u8]) -> Framing {
    match data {
        [0x1f, 0x8b, ..] => Framing::Gzip,
        [0x78, 0x01 | 0x9c | 0xda, ..] => Framing::Zlib,
        _ => Framing::Plain,
    }
}

/// Decompress `data` according to its sniffed framing.
///
/// # Errors
///
/// Returns [`ManifestError::Decompression`] when a gzip or zlib stream is
/// detected but cannot be inflated.
pub fn decompress(data: &[u8]) -> ManifestResult<Cow<'_, [u8]>> {
    match sniff(data) {
        Framing::Gzip => read_all(GzDecoder::new(data), "gzip").map(Cow::Owned),
        Framing::Zlib => inflate_zlib(data).map(Cow::Owned),
        Framing::Plain => Ok(Cow::Borrowed(data)),
    }
}

/// Inflate a zlib stream.
pub(crate) fn inflate_zlib(data: &[u8]) -> ManifestResult<Vec<u8>> {
    read_all(ZlibDecoder::new(data), "zlib")
}

fn read_all(mut reader: impl Read, kind: &str) -> ManifestResult<Vec<u8>> {
    let mut out = Vec::new();
    reader
        .read_to_end(&mut out)
        .map_err(|e| ManifestError::Decompression(format!("{} stream: {}", kind, e)))?;
    Ok(out)
}
