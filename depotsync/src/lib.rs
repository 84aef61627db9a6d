//! depotsync - content-addressed game depot downloads
//!
//! This library decodes store manifests into one canonical model, selects
//! which depots and files a user needs, maps chunks to CDN URLs, tracks
//! resumable download progress, and verifies installs on disk.
//!
//! # Modules
//!
//! - [`manifest`]: binary and JSON manifest decoding
//! - [`select`]: build, language, bitness and DLC selection
//! - [`locator`] / [`size`] / [`plan`]: chunk URLs and download sizing
//! - [`progress`]: byte counters, speed, ETA, resume snapshots
//! - [`session`]: lifecycle and install markers
//! - [`verify`]: install integrity checks
//!
//! Transport is left to the caller: it receives a [`plan::DownloadPlan`]
//! and reports into a [`progress::DownloadTracker`].

pub mod cache;
pub mod config;
pub mod error;
pub mod locator;
pub mod logging;
pub mod manifest;
pub mod plan;
pub mod progress;
pub mod select;
pub mod session;
pub mod size;
pub mod verify;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use manifest::{decode, Manifest};
pub use plan::DownloadPlan;
pub use progress::{DownloadPhase, DownloadTracker};
pub use session::{DownloadOutcome, DownloadSession};
pub use verify::{verify, VerificationResult};
