//! CLI error type and exit codes.

use std::path::PathBuf;

use depotsync::config::ConfigError;
use depotsync::logging::LoggingError;
use depotsync::manifest::ManifestError;
use depotsync::plan::PlanError;
use depotsync::progress::SnapshotError;
use thiserror::Error;

/// Exit code for any failed command.
pub const EXIT_FAILURE: u8 = 1;

/// Exit code when verification finds a damaged install.
pub const EXIT_INVALID_INSTALL: u8 = 2;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid manifest: {0}")]
    Manifest(#[from] ManifestError),

    #[error("planning failed: {0}")]
    Plan(#[from] PlanError),

    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("no generation {generation} build for platform {platform}")]
    NoMatchingBuild { generation: u32, platform: String },

    #[error("{failed} of {checked} file(s) failed verification")]
    InvalidInstall { failed: usize, checked: usize },
}

impl CliError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::InvalidInstall { .. } => EXIT_INVALID_INSTALL,
            _ => EXIT_FAILURE,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<LoggingError> for CliError {
    fn from(e: LoggingError) -> Self {
        Self::Config(format!("logging: {e}"))
    }
}
