//! 128-bit chunk identifiers.
//!
//! A [`Guid`] is stored as four 32-bit words. Binary manifests carry the
//! identifier as 16 raw bytes which are read as four little-endian words;
//! the canonical string form prints each word as eight lowercase hex digits
//! and concatenates them. Existing chunk URLs depend on this exact byte
//! order, so it must never change.

use std::fmt;
use std::str::FromStr;

use super::error::ManifestError;

/// Content identifier of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Guid([u32; 4]);

impl Guid {
    /// Create a GUID from its four words.
    pub const fn from_words(words: [u32; 4]) -> Self {
        Self(words)
    }

    /// Read a GUID from 16 raw bytes as four little-endian words.
    pub fn from_le_bytes(bytes: [u8; 16]) -> Self {
        let mut words = [0u32; 4];
        for (i, word) in words.iter_mut().enumerate() {
            let start = i * 4;
            *word = u32::from_le_bytes([
                bytes[start],
                bytes[start + 1],
                bytes[start + 2],
                bytes[start + 3],
            ]);
        }
        Self(words)
    }

    /// Serialize back into the 16-byte little-endian wire form.
    pub fn to_le_bytes(self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        for (i, word) in self.0.iter().enumerate() {
            bytes[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
        }
        bytes
    }

    /// Parse a 32-digit hex string (dashes allowed) into words, big-endian
    /// per word, so that `Guid::from_hex(s)?.to_string()` returns `s`
    /// lowercased without dashes.
    pub fn from_hex(s: &str) -> Result<Self, ManifestError> {
        let clean: String = s.chars().filter(|c| *c != '-').collect();
        let mut digest = [0u8; 16];
        hex::decode_to_slice(&clean, &mut digest)
            .map_err(|_| ManifestError::malformed(format!("invalid chunk guid {s:?}")))?;
        Ok(Self::from_digest(&digest))
    }

    /// Build a GUID from a 16-byte digest, treating it as a hex string.
    pub fn from_digest(digest: &[u8; 16]) -> Self {
        let mut words = [0u32; 4];
        for (i, word) in words.iter_mut().enumerate() {
            let start = i * 4;
            *word = u32::from_be_bytes([
                digest[start],
                digest[start + 1],
                digest[start + 2],
                digest[start + 3],
            ]);
        }
        Self(words)
    }

    /// The four words.
    pub fn words(&self) -> [u32; 4] {
        self.0
    }

    /// Uppercase form used in Epic chunk file names.
    pub fn to_upper_hex(&self) -> String {
        self.0.iter().map(|w| format!("{:08X}", w)).collect()
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for word in &self.0 {
            write!(f, "{:08x}", word)?;
        }
        Ok(())
    }
}

impl FromStr for Guid {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_le_bytes_word_swapped_display() {
        let bytes = [
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e,
            0x0f, 0x10,
        ];
        let guid = Guid::from_le_bytes(bytes);
        assert_eq!(guid.to_string(), "04030201080706050c0b0a09100f0e0d");
        assert_eq!(guid.to_le_bytes(), bytes);
    }

    #[test]
    fn test_hex_round_trip_is_identity() {
        let hex = "aabbccdd00112233445566778899eeff";
        let guid = Guid::from_hex(hex).unwrap();
        assert_eq!(guid.to_string(), hex);
        assert_eq!(guid.to_upper_hex(), hex.to_uppercase());
    }

    #[test]
    fn test_hex_accepts_dashes() {
        let guid: Guid = "aabbccdd-00112233-44556677-8899eeff".parse().unwrap();
        assert_eq!(guid.words()[0], 0xaabbccdd);
    }

    #[test]
    fn test_hex_rejects_bad_input() {
        assert!(Guid::from_hex("abc").is_err());
        assert!(Guid::from_hex("zzbbccdd00112233445566778899eeff").is_err());
    }

    #[test]
    fn test_digest_matches_hex_form() {
        let digest = [
            0x5e, 0xb6, 0x3b, 0xbb, 0xe0, 0x1e, 0xee, 0xd0, 0x93, 0xcb, 0x22, 0xbb, 0x8f, 0x5a,
            0xcd, 0xc3,
        ];
        assert_eq!(
            Guid::from_digest(&digest).to_string(),
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        );
    }
}
