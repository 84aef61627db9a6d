//! Download lifecycle coordination.
//!
//! A [`DownloadSession`] ties a [`DownloadTracker`] to an install directory
//! and its on-disk markers. It resumes from a snapshot, races the caller's
//! transfer against cancellation, and settles the markers so a completion
//! marker only ever exists for a fully downloaded install.
//!
//! # Example
//!
//! ```ignore
//! let tracker = Arc::new(DownloadTracker::new());
//! let session = DownloadSession::new(Arc::clone(&tracker), install_dir);
//! session.prepare()?;
//! match session.run(transport.fetch_all(&plan, tracker)).await {
//!     DownloadOutcome::Completed => println!("done"),
//!     DownloadOutcome::Cancelled(reason) => println!("cancelled: {reason}"),
//!     DownloadOutcome::Failed(e) => eprintln!("failed: {e}"),
//! }
//! ```

use std::fs;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cache::ProductCache;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::manifest::FileEntry;
use crate::progress::{DownloadPhase, DownloadTracker, ResumeSnapshot, Termination, SNAPSHOT_DIR};
use crate::verify::verify;

/// Marker files an install-detection layer reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    DownloadComplete,
    DownloadInProgress,
}

impl Marker {
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::DownloadComplete => ".download_complete",
            Self::DownloadInProgress => ".download_in_progress",
        }
    }
}

/// Storage for install markers.
pub trait InstallMarkers: Send + Sync {
    fn has_marker(&self, install_dir: &Path, marker: Marker) -> bool;

    fn add_marker(&self, install_dir: &Path, marker: Marker) -> io::Result<()>;

    /// Removing an absent marker succeeds.
    fn remove_marker(&self, install_dir: &Path, marker: Marker) -> io::Result<()>;
}

/// Empty marker files in the install root.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileMarkers;

impl InstallMarkers for FileMarkers {
    fn has_marker(&self, install_dir: &Path, marker: Marker) -> bool {
        install_dir.join(marker.file_name()).is_file()
    }

    fn add_marker(&self, install_dir: &Path, marker: Marker) -> io::Result<()> {
        fs::create_dir_all(install_dir)?;
        fs::write(install_dir.join(marker.file_name()), b"")
    }

    fn remove_marker(&self, install_dir: &Path, marker: Marker) -> io::Result<()> {
        match fs::remove_file(install_dir.join(marker.file_name())) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// Whether `install_dir` holds an interrupted download.
///
/// A completion marker means no; an in-progress marker means yes. Otherwise
/// any payload counts, where bookkeeping entries only count when they hold
/// a non-empty file.
pub fn is_partial_install(install_dir: &Path, markers: &dyn InstallMarkers) -> bool {
    if !install_dir.is_dir() || markers.has_marker(install_dir, Marker::DownloadComplete) {
        return false;
    }
    if markers.has_marker(install_dir, Marker::DownloadInProgress) {
        return true;
    }

    let Ok(entries) = fs::read_dir(install_dir) else {
        return false;
    };
    let bookkeeping = [
        Marker::DownloadComplete.file_name(),
        Marker::DownloadInProgress.file_name(),
        SNAPSHOT_DIR,
    ];
    entries.filter_map(|e| e.ok()).any(|entry| {
        let name = entry.file_name();
        if !bookkeeping.iter().any(|b| name == *b) {
            return true;
        }
        entry.path().is_dir() && has_non_empty_file(&entry.path())
    })
}

fn has_non_empty_file(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter_map(|e| e.metadata().ok())
                .any(|m| m.is_file() && m.len() > 0)
        })
        .unwrap_or(false)
}

/// How a download session ended.
#[derive(Debug)]
pub enum DownloadOutcome {
    Completed,
    Cancelled(String),
    Failed(Error),
}

impl DownloadOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// One download into one install directory.
pub struct DownloadSession<M: InstallMarkers = FileMarkers> {
    tracker: Arc<DownloadTracker>,
    install_dir: PathBuf,
    markers: M,
    verify_after_download: bool,
    verify_files: Vec<FileEntry>,
    cache: Option<(Arc<ProductCache>, String)>,
}

impl DownloadSession<FileMarkers> {
    pub fn new(tracker: Arc<DownloadTracker>, install_dir: impl Into<PathBuf>) -> Self {
        Self::with_markers(tracker, install_dir, FileMarkers)
    }

    /// Session with a fresh tracker tuned by `config` for `job_count` jobs.
    pub fn from_config(config: &EngineConfig, install_dir: impl Into<PathBuf>, job_count: usize) -> Self {
        let tracker = Arc::new(DownloadTracker::with_config(config.tracker_config(job_count)));
        Self::new(tracker, install_dir).verify_after_download(config.verify_after_download)
    }
}

impl<M: InstallMarkers> DownloadSession<M> {
    pub fn with_markers(tracker: Arc<DownloadTracker>, install_dir: impl Into<PathBuf>, markers: M) -> Self {
        Self {
            tracker,
            install_dir: install_dir.into(),
            markers,
            verify_after_download: true,
            verify_files: Vec::new(),
            cache: None,
        }
    }

    /// Record the install state of `product_id` in `cache` once the session
    /// settles.
    pub fn with_cache(mut self, cache: Arc<ProductCache>, product_id: impl Into<String>) -> Self {
        self.cache = Some((cache, product_id.into()));
        self
    }

    /// Whether [`with_verification`](Self::with_verification) files are
    /// checked before the install is marked complete.
    pub fn verify_after_download(mut self, enabled: bool) -> Self {
        self.verify_after_download = enabled;
        self
    }

    /// Files to check once the transfer finishes.
    pub fn with_verification(mut self, files: Vec<FileEntry>) -> Self {
        self.verify_files = files;
        self
    }

    pub fn tracker(&self) -> &Arc<DownloadTracker> {
        &self.tracker
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    pub fn markers(&self) -> &M {
        &self.markers
    }

    /// Bind the snapshot, restore resumed counters and mark the install as
    /// in progress.
    ///
    /// Returns the snapshot that was resumed from, if any.
    ///
    /// # Errors
    ///
    /// Fails when the marker files cannot be written.
    pub fn prepare(&self) -> Result<Option<ResumeSnapshot>> {
        self.tracker.update_status(DownloadPhase::Preparing, None);
        self.tracker
            .set_persistence_path(Some(self.install_dir.clone()));
        let resumed = self.tracker.resume_from_snapshot();

        self.markers
            .remove_marker(&self.install_dir, Marker::DownloadComplete)?;
        self.markers
            .add_marker(&self.install_dir, Marker::DownloadInProgress)?;
        self.tracker.set_active(true);

        debug!(
            install_dir = %self.install_dir.display(),
            resumed = resumed.is_some(),
            "Download session prepared"
        );
        Ok(resumed)
    }

    /// Drive `transfer` to an outcome.
    ///
    /// The transfer is dropped as soon as the tracker is cancelled or fails.
    /// A transfer that returns `Ok` still fails the session when the tracker
    /// has not seen every byte and depot.
    pub async fn run<F>(&self, transfer: F) -> DownloadOutcome
    where
        F: Future<Output = Result<()>>,
    {
        self.tracker.update_status(DownloadPhase::Downloading, None);
        let token = self.tracker.cancellation_token();

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = transfer => Some(result),
        };

        let outcome = match result {
            None => self.stopped_outcome(),
            Some(Ok(())) => self.finish(),
            Some(Err(Error::Cancelled(reason))) => {
                self.tracker.cancel(reason);
                self.stopped_outcome()
            }
            Some(Err(e)) => {
                self.tracker.failed_to_download(e.to_string());
                DownloadOutcome::Failed(e)
            }
        };

        if !outcome.is_completed() {
            self.clear_completion_marker();
        }
        if let Some((cache, product_id)) = &self.cache {
            cache.update_install(product_id, outcome.is_completed(), &self.install_dir);
        }
        outcome
    }

    fn stopped_outcome(&self) -> DownloadOutcome {
        match self.tracker.termination() {
            Some(Termination::Cancelled(reason)) => DownloadOutcome::Cancelled(reason),
            Some(Termination::Failed(message)) => DownloadOutcome::Failed(Error::Transport(message)),
            None => DownloadOutcome::Cancelled("cancelled".to_string()),
        }
    }

    fn finish(&self) -> DownloadOutcome {
        let (downloaded, total) = self.tracker.bytes_progress();
        let pending_depots = self.tracker.has_incomplete_depots();
        if (total > 0 && downloaded < total) || pending_depots {
            let error = Error::Incomplete {
                downloaded,
                total,
                pending_depots: self.pending_depot_count(),
            };
            self.tracker.failed_to_download(error.to_string());
            return DownloadOutcome::Failed(error);
        }

        if let Some(error) = self.verify_install() {
            self.tracker.failed_to_download(error.to_string());
            return DownloadOutcome::Failed(error);
        }

        let marked = self
            .markers
            .remove_marker(&self.install_dir, Marker::DownloadInProgress)
            .and_then(|()| {
                self.markers
                    .add_marker(&self.install_dir, Marker::DownloadComplete)
            });
        if let Err(e) = marked {
            warn!(error = %e, "Failed to write completion marker");
            self.tracker
                .failed_to_download(format!("failed to write completion marker: {e}"));
            return DownloadOutcome::Failed(Error::Io(e));
        }

        self.tracker.set_active(false);
        self.tracker.update_status(DownloadPhase::Complete, None);
        self.tracker.clear_persisted_snapshot(true);

        info!(
            install_dir = %self.install_dir.display(),
            bytes = downloaded,
            "Download complete"
        );
        DownloadOutcome::Completed
    }

    fn verify_install(&self) -> Option<Error> {
        if !self.verify_after_download || self.verify_files.is_empty() {
            return None;
        }
        self.tracker.update_status(DownloadPhase::Verifying, None);
        let result = verify(&self.install_dir, &self.verify_files);
        if result.is_valid() {
            return None;
        }
        Some(Error::Verification {
            failed: result.failures.len(),
            checked: result.checked,
        })
    }

    fn pending_depot_count(&self) -> usize {
        let completed = self.tracker.completed_depot_ids();
        self.tracker
            .tracked_depot_ids()
            .into_iter()
            .filter(|id| !completed.contains(id))
            .count()
    }

    fn clear_completion_marker(&self) {
        if let Err(e) = self
            .markers
            .remove_marker(&self.install_dir, Marker::DownloadComplete)
        {
            warn!(error = %e, "Failed to remove completion marker");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::snapshot_path;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn session(dir: &TempDir) -> DownloadSession {
        let tracker = Arc::new(DownloadTracker::new());
        DownloadSession::new(tracker, dir.path())
    }

    #[tokio::test]
    async fn test_completed_download_writes_marker() {
        let dir = TempDir::new().unwrap();
        let session = session(&dir);
        session.prepare().unwrap();
        session.tracker().set_total_bytes(100);
        assert!(FileMarkers.has_marker(dir.path(), Marker::DownloadInProgress));

        let tracker = Arc::clone(session.tracker());
        let outcome = session
            .run(async move {
                tracker.update_bytes_downloaded(100);
                tracker.persist_progress_snapshot(true);
                Ok(())
            })
            .await;

        assert!(outcome.is_completed());
        assert_eq!(session.tracker().phase(), DownloadPhase::Complete);
        assert!(FileMarkers.has_marker(dir.path(), Marker::DownloadComplete));
        assert!(!FileMarkers.has_marker(dir.path(), Marker::DownloadInProgress));
        assert!(!snapshot_path(dir.path()).exists());
    }

    #[tokio::test]
    async fn test_short_download_fails_without_marker() {
        let dir = TempDir::new().unwrap();
        let session = session(&dir);
        session.prepare().unwrap();
        session.tracker().set_total_bytes(100);
        session
            .tracker()
            .set_depot_sizes(&HashMap::from([(1, 100)]));

        let tracker = Arc::clone(session.tracker());
        let outcome = session
            .run(async move {
                tracker.update_bytes_downloaded(100);
                Ok(())
            })
            .await;

        match outcome {
            DownloadOutcome::Failed(Error::Incomplete { pending_depots, .. }) => {
                assert_eq!(pending_depots, 1)
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(!FileMarkers.has_marker(dir.path(), Marker::DownloadComplete));
        assert_eq!(session.tracker().phase(), DownloadPhase::Failed);
    }

    #[tokio::test]
    async fn test_cancel_drops_transfer() {
        let dir = TempDir::new().unwrap();
        let session = session(&dir);
        session.prepare().unwrap();
        FileMarkers
            .add_marker(dir.path(), Marker::DownloadComplete)
            .unwrap();

        let tracker = Arc::clone(session.tracker());
        let outcome = session
            .run(async move {
                tracker.update_bytes_downloaded(10);
                tracker.cancel("user request");
                std::future::pending::<Result<()>>().await
            })
            .await;

        match outcome {
            DownloadOutcome::Cancelled(reason) => assert_eq!(reason, "user request"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(!FileMarkers.has_marker(dir.path(), Marker::DownloadComplete));
        assert!(snapshot_path(dir.path()).exists());
    }

    #[tokio::test]
    async fn test_transport_error_fails_session() {
        let dir = TempDir::new().unwrap();
        let session = session(&dir);
        session.prepare().unwrap();

        let outcome = session
            .run(async { Err(Error::transport("connection reset")) })
            .await;

        assert!(matches!(outcome, DownloadOutcome::Failed(Error::Transport(_))));
        assert_eq!(
            session.tracker().termination(),
            Some(Termination::Failed("transport error: connection reset".into()))
        );
    }

    fn missing_file() -> FileEntry {
        FileEntry::builder("game.bin")
            .push_part(crate::manifest::Guid::from_words([1, 0, 0, 0]), 0, 4)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_verification_failure_blocks_completion() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::default();
        let session = DownloadSession::from_config(&config, dir.path(), 1)
            .with_verification(vec![missing_file()]);
        session.prepare().unwrap();

        let outcome = session.run(async { Ok(()) }).await;

        match outcome {
            DownloadOutcome::Failed(Error::Verification { failed, checked }) => {
                assert_eq!((failed, checked), (1, 1))
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(session.tracker().phase(), DownloadPhase::Failed);
        assert!(!FileMarkers.has_marker(dir.path(), Marker::DownloadComplete));
    }

    #[tokio::test]
    async fn test_verification_disabled_by_config() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::default().with_verify_after_download(false);
        let session = DownloadSession::from_config(&config, dir.path(), 1)
            .with_verification(vec![missing_file()]);
        session.prepare().unwrap();

        assert!(session.run(async { Ok(()) }).await.is_completed());
        assert!(FileMarkers.has_marker(dir.path(), Marker::DownloadComplete));
    }

    #[tokio::test]
    async fn test_verified_install_completes() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("game.bin"), b"data").unwrap();
        let session = DownloadSession::from_config(&EngineConfig::default(), dir.path(), 1)
            .with_verification(vec![missing_file()]);
        session.prepare().unwrap();

        assert!(session.run(async { Ok(()) }).await.is_completed());
        assert_eq!(session.tracker().phase(), DownloadPhase::Complete);
    }

    #[tokio::test]
    async fn test_outcome_updates_product_cache() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(ProductCache::new());
        let session = session(&dir).with_cache(Arc::clone(&cache), "1207658924");
        session.prepare().unwrap();

        assert!(session.run(async { Ok(()) }).await.is_completed());
        assert!(cache.is_installed("1207658924"));
        assert_eq!(cache.install_path("1207658924"), Some(dir.path().to_path_buf()));

        let failed = TempDir::new().unwrap();
        let session = DownloadSession::new(Arc::new(DownloadTracker::new()), failed.path())
            .with_cache(Arc::clone(&cache), "1207658925");
        session.prepare().unwrap();
        let outcome = session
            .run(async { Err(Error::transport("connection reset")) })
            .await;
        assert!(!outcome.is_completed());
        assert!(!cache.is_installed("1207658925"));
        assert!(cache.install_info("1207658925").is_some());
    }

    struct ReadOnlyCompletion;

    impl InstallMarkers for ReadOnlyCompletion {
        fn has_marker(&self, install_dir: &Path, marker: Marker) -> bool {
            FileMarkers.has_marker(install_dir, marker)
        }

        fn add_marker(&self, install_dir: &Path, marker: Marker) -> io::Result<()> {
            match marker {
                Marker::DownloadComplete => Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "read-only install root",
                )),
                other => FileMarkers.add_marker(install_dir, other),
            }
        }

        fn remove_marker(&self, install_dir: &Path, marker: Marker) -> io::Result<()> {
            FileMarkers.remove_marker(install_dir, marker)
        }
    }

    #[tokio::test]
    async fn test_marker_failure_keeps_snapshot() {
        let dir = TempDir::new().unwrap();
        let tracker = Arc::new(DownloadTracker::new());
        let session = DownloadSession::with_markers(tracker, dir.path(), ReadOnlyCompletion);
        session.prepare().unwrap();
        session.tracker().set_total_bytes(100);

        let tracker = Arc::clone(session.tracker());
        let outcome = session
            .run(async move {
                tracker.update_bytes_downloaded(100);
                Ok(())
            })
            .await;

        assert!(matches!(outcome, DownloadOutcome::Failed(Error::Io(_))));
        assert_eq!(session.tracker().phase(), DownloadPhase::Failed);
        assert!(matches!(
            session.tracker().termination(),
            Some(Termination::Failed(_))
        ));
        assert!(snapshot_path(dir.path()).exists());
        assert!(!FileMarkers.has_marker(dir.path(), Marker::DownloadComplete));
    }

    #[test]
    fn test_prepare_resumes_snapshot() {
        let dir = TempDir::new().unwrap();
        crate::progress::write_snapshot(
            dir.path(),
            &ResumeSnapshot {
                bytes_downloaded: 4096,
                completed_depot_ids: [1, 2].into_iter().collect(),
            },
        )
        .unwrap();

        let session = session(&dir);
        let resumed = session.prepare().unwrap().unwrap();
        assert_eq!(resumed.bytes_downloaded, 4096);
        assert_eq!(session.tracker().bytes_downloaded(), 4096);
        assert!(session.tracker().is_active());
    }

    #[test]
    fn test_partial_install_detection() {
        let dir = TempDir::new().unwrap();
        assert!(!is_partial_install(dir.path(), &FileMarkers));

        fs::create_dir_all(dir.path().join(SNAPSHOT_DIR)).unwrap();
        fs::write(dir.path().join(SNAPSHOT_DIR).join("empty"), b"").unwrap();
        assert!(!is_partial_install(dir.path(), &FileMarkers));

        fs::write(dir.path().join("game.bin"), b"data").unwrap();
        assert!(is_partial_install(dir.path(), &FileMarkers));

        FileMarkers
            .add_marker(dir.path(), Marker::DownloadComplete)
            .unwrap();
        assert!(!is_partial_install(dir.path(), &FileMarkers));
    }
}
