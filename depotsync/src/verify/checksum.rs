//! Streaming file hashes for verification.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::manifest::FileHashes;

/// Buffer size for reading files during hashing (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Hash algorithms a manifest may declare for a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha256,
    Sha1,
    Md5,
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sha256 => "sha256",
            Self::Sha1 => "sha1",
            Self::Md5 => "md5",
        };
        f.write_str(name)
    }
}

/// The strongest declared hash: SHA-256, then SHA-1, then MD5.
pub fn preferred_hash(hashes: &FileHashes) -> Option<(HashAlgorithm, &str)> {
    let candidates = [
        (HashAlgorithm::Sha256, hashes.sha256.as_deref()),
        (HashAlgorithm::Sha1, hashes.sha1.as_deref()),
        (HashAlgorithm::Md5, hashes.md5.as_deref()),
    ];
    candidates
        .into_iter()
        .find_map(|(algorithm, value)| value.filter(|v| !v.is_empty()).map(|v| (algorithm, v)))
}

/// Lowercase hex digest of the file at `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub fn calculate_file_hash(path: &Path, algorithm: HashAlgorithm) -> io::Result<String> {
    let file = File::open(path)?;
    match algorithm {
        HashAlgorithm::Sha256 => digest_reader::<Sha256, _>(file),
        HashAlgorithm::Sha1 => digest_reader::<Sha1, _>(file),
        HashAlgorithm::Md5 => digest_reader::<Md5, _>(file),
    }
}

fn digest_reader<D: Digest, R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = D::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }
    Ok(hex::encode(&hasher.finalize()))
}
