//! Error types for manifest decoding.

use thiserror::Error;

/// Result type for manifest operations.
pub type ManifestResult<T> = Result<T, ManifestError>;

/// Errors that can occur while decoding a manifest payload.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The byte stream does not match any known framing or is truncated.
    #[error("malformed manifest: {0}")]
    Malformed(String),

    /// A recognized format carries a version newer than this decoder supports.
    #[error("unsupported manifest version {found} (newest supported: {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    /// The compressed body could not be inflated.
    #[error("failed to decompress manifest body: {0}")]
    Decompression(String),

    /// The embedded content hash does not match the decompressed body.
    #[error("manifest checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// A JSON manifest failed to deserialize.
    #[error("malformed JSON manifest: {0}")]
    Json(#[from] serde_json::Error),
}

impl ManifestError {
    /// Shorthand for a [`ManifestError::Malformed`] with a formatted reason.
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed(reason.into())
    }

    /// Returns true for errors caused by a structurally broken payload.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed(_) | Self::Json(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_version_display() {
        let err = ManifestError::UnsupportedVersion {
            found: 99,
            supported: 21,
        };
        assert_eq!(
            err.to_string(),
            "unsupported manifest version 99 (newest supported: 21)"
        );
    }

    #[test]
    fn test_json_error_counts_as_malformed() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: ManifestError = json_err.into();
        assert!(err.is_malformed());
        assert!(!ManifestError::Decompression("eof".into()).is_malformed());
    }
}
