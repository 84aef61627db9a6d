//! Crate-level error type.

use thiserror::Error;

use crate::config::ConfigError;
use crate::manifest::ManifestError;
use crate::plan::PlanError;
use crate::progress::SnapshotError;

/// Result type for operations spanning several modules.
pub type Result<T> = std::result::Result<T, Error>;

/// Any error the engine can report.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A chunk transfer failed; raised by the caller's transport.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("download cancelled: {0}")]
    Cancelled(String),

    /// The transfer reported success but bytes or depots are missing.
    #[error("incomplete download: {downloaded} of {total} bytes, {pending_depots} depot(s) pending")]
    Incomplete {
        downloaded: u64,
        total: u64,
        pending_depots: usize,
    },

    /// Files on disk do not match the manifest after the transfer.
    #[error("verification failed: {failed} of {checked} file(s)")]
    Verification { failed: usize, checked: usize },

        #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_error_is_transparent() {
        let err: Error = ManifestError::malformed("bad header").into();
        assert_eq!(err.to_string(), ManifestError::malformed("bad header").to_string());
    }

    #[test]
    fn test_cancelled() {
        assert!(Error::Cancelled("user".into()).is_cancelled());
        assert!(!Error::transport("reset").is_cancelled());
    }
}
