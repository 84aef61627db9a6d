//! Helpers shared across commands.

use std::fs;
use std::path::Path;

use depotsync::manifest::{self, Manifest};

use crate::error::CliError;

pub fn read_file(path: &Path) -> Result<Vec<u8>, CliError> {
    fs::read(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Read and decode a manifest file of any supported format.
pub fn load_manifest(path: &Path) -> Result<Manifest, CliError> {
    Ok(manifest::decode(&read_file(path)?)?)
}
