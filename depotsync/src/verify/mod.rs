//! Install integrity verification.
//!
//! Each file is checked for existence, then exact size, then content hash
//! when the manifest declares one. The first failing check decides the
//! [`FailureReason`]. Files are checked in parallel and never modified.
//!
//! # Example
//!
//! ```ignore
//! let result = verify(Path::new("/games/foo"), &manifest.files);
//! if !result.is_valid() {
//!     for failure in &result.failures {
//!         eprintln!("{}: {}", failure.path, failure.reason);
//!     }
//! }
//! ```

mod checksum;

pub use checksum::{calculate_file_hash, preferred_hash, HashAlgorithm};

use std::fmt;
use std::fs;
use std::path::{Component, Path};
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::manifest::FileEntry;

/// Why a file failed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Missing,
    /// The manifest path leaves the install root.
    UnsafePath,
    SizeMismatch {
        expected: u64,
        actual: u64,
    },
    /// Content differs from the declared hash, or could not be read.
    HashMismatch {
        algorithm: HashAlgorithm,
        expected: String,
        actual: Option<String>,
    },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "missing"),
            Self::UnsafePath => write!(f, "path escapes the install root"),
            Self::SizeMismatch { expected, actual } => {
                write!(f, "size mismatch (expected {expected}, found {actual})")
            }
            Self::HashMismatch {
                algorithm,
                expected,
                actual: Some(actual),
            } => write!(f, "{algorithm} mismatch (expected {expected}, found {actual})"),
            Self::HashMismatch {
                algorithm,
                expected,
                actual: None,
            } => write!(f, "{algorithm} unreadable (expected {expected})"),
        }
    }
}

/// A file that failed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationFailure {
    pub path: String,
    pub reason: FailureReason,
}

/// Outcome of verifying an install.
#[derive(Debug, Clone, Default)]
pub struct VerificationResult {
    /// Number of files examined.
    pub checked: usize,
    /// Failures in manifest order.
    pub failures: Vec<VerificationFailure>,
}

impl VerificationResult {
    pub fn is_valid(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed_paths(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().map(|f| f.path.as_str())
    }

    pub fn count(&self, matches: impl Fn(&FailureReason) -> bool) -> usize {
        self.failures.iter().filter(|f| matches(&f.reason)).count()
    }
}

/// Verify `files` under `install_root`.
pub fn verify<'a, F>(install_root: &Path, files: F) -> VerificationResult
where
    F: IntoIterator<Item = &'a FileEntry>,
{
    verify_with_progress(install_root, files, |_| {})
}

/// Verify `files`, calling `on_checked` with each file once it is examined.
///
/// `on_checked` runs on rayon worker threads.
pub fn verify_with_progress<'a, F, P>(install_root: &Path, files: F, on_checked: P) -> VerificationResult
where
    F: IntoIterator<Item = &'a FileEntry>,
    P: Fn(&FileEntry) + Sync,
{
    let files: Vec<&FileEntry> = files.into_iter().collect();
    let checked = AtomicUsize::new(0);

    let failures: Vec<VerificationFailure> = files
        .par_iter()
        .filter_map(|file| {
            let reason = check_file(install_root, file);
            checked.fetch_add(1, Ordering::Relaxed);
            on_checked(file);
            reason.map(|reason| VerificationFailure {
                path: file.path().to_string(),
                reason,
            })
        })
        .collect();

    let result = VerificationResult {
        checked: checked.into_inner(),
        failures,
    };
    if result.is_valid() {
        info!(
            root = %install_root.display(),
            files = result.checked,
            "Install verified"
        );
    } else {
        warn!(
            root = %install_root.display(),
            files = result.checked,
            failed = result.failures.len(),
            "Install verification failed"
        );
    }
    result
}

/// First failing check for `file`, if any.
fn check_file(install_root: &Path, file: &FileEntry) -> Option<FailureReason> {
    let relative = Path::new(file.path());
    if !relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Some(FailureReason::UnsafePath);
    }
    let path = install_root.join(relative);

    if file.is_symlink() {
        return match fs::symlink_metadata(&path) {
            Ok(_) => None,
            Err(_) => Some(FailureReason::Missing),
        };
    }

    let metadata = match fs::metadata(&path) {
        Ok(metadata) => metadata,
        Err(_) => return Some(FailureReason::Missing),
    };
    if metadata.len() != file.size() {
        return Some(FailureReason::SizeMismatch {
            expected: file.size(),
            actual: metadata.len(),
        });
    }

    let (algorithm, expected) = preferred_hash(file.hashes())?;
    match calculate_file_hash(&path, algorithm) {
        Ok(actual) if actual.eq_ignore_ascii_case(expected) => None,
        Ok(actual) => Some(FailureReason::HashMismatch {
            algorithm,
            expected: expected.to_string(),
            actual: Some(actual),
        }),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Failed to hash file");
            Some(FailureReason::HashMismatch {
                algorithm,
                expected: expected.to_string(),
                actual: None,
            })
        }
    }
}
