//! Bounds-checked little-endian cursor over a manifest body.

use super::error::{ManifestError, ManifestResult};
use super::guid::Guid;

/// Cursor over a byte slice. Every read fails with
/// [`ManifestError::Malformed`] instead of panicking on truncated input.
#[derive(Debug)]
pub(crate) struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn has_remaining(&self) -> bool {
        self.pos < self.data.len()
    }

    /// Move to an absolute position (at most the end of the buffer).
    pub fn seek(&mut self, pos: usize) -> ManifestResult<()> {
        if pos > self.data.len() {
            return Err(ManifestError::malformed(format!(
                "seek to {} past end of {} byte body",
                pos,
                self.data.len()
            )));
        }
        self.pos = pos;
        Ok(())
    }

    pub fn take(&mut self, len: usize) -> ManifestResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(ManifestError::malformed(format!(
                "unexpected end of data at offset {} (wanted {} bytes, {} left)",
                self.pos,
                len,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn array<const N: usize>(&mut self) -> ManifestResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> ManifestResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u32(&mut self) -> ManifestResult<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn i32(&mut self) -> ManifestResult<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    pub fn u64(&mut self) -> ManifestResult<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub fn i64(&mut self) -> ManifestResult<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    pub fn guid(&mut self) -> ManifestResult<Guid> {
        Ok(Guid::from_le_bytes(self.array()?))
    }

    /// Read an element count and reject counts the remaining bytes could
    /// never satisfy, so a corrupt count cannot trigger a huge allocation.
    pub fn count(&mut self, min_element_size: usize) -> ManifestResult<usize> {
        let count = self.u32()? as usize;
        if count.saturating_mul(min_element_size.max(1)) > self.remaining() {
            return Err(ManifestError::malformed(format!(
                "element count {} exceeds remaining {} bytes",
                count,
                self.remaining()
            )));
        }
        Ok(count)
    }

    /// Read a length-prefixed string.
    ///
    /// Positive lengths are single-byte text including a NUL terminator,
    /// negative lengths are UTF-16LE code units including a NUL terminator.
    /// Invalid sequences decode to U+FFFD instead of failing the manifest.
    pub fn fstring(&mut self) -> ManifestResult<String> {
        let len = self.i32()?;
        match len {
            0 => Ok(String::new()),
            n if n > 0 => {
                let bytes = self.take(n as usize)?;
                let text = &bytes[..bytes.len() - 1];
                Ok(String::from_utf8_lossy(text).into_owned())
            }
            n => {
                let units = n.unsigned_abs() as usize;
                let bytes = self.take(units.saturating_mul(2))?;
                let code_units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                    .take(units - 1)
                    .collect();
                Ok(String::from_utf16_lossy(&code_units))
            }
        }
    }
}
