//! Resume snapshots.
//!
//! A snapshot records how many bytes of a download have landed and which
//! depots are finished, so an interrupted download can pick up where it
//! left off. It lives at `<install>/.DownloadInfo/depot_bytes.json`:
//!
//! ```json
//! {"bytesDownloaded":4096,"completedDepotIds":[1,2]}
//! ```
//!
//! Writes go to a temp file that is renamed over the target. Background
//! writes run on a single [`SnapshotWriter`] thread per download.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Directory holding download bookkeeping inside the install root.
pub const SNAPSHOT_DIR: &str = ".DownloadInfo";

/// Snapshot file name.
pub const SNAPSHOT_FILE: &str = "depot_bytes.json";

const SNAPSHOT_TEMP_FILE: &str = "depot_bytes.json.tmp";

/// Errors writing or removing a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

impl SnapshotError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Persisted download state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeSnapshot {
    #[serde(deserialize_with = "non_negative")]
    pub bytes_downloaded: u64,
    #[serde(default)]
    pub completed_depot_ids: BTreeSet<u32>,
}

/// Accept negative byte counts from older writers as zero.
fn non_negative<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = i64::deserialize(deserializer)?;
    Ok(value.max(0) as u64)
}

/// Path of the snapshot file for `install_dir`.
pub fn snapshot_path(install_dir: &Path) -> PathBuf {
    install_dir.join(SNAPSHOT_DIR).join(SNAPSHOT_FILE)
}

/// Load the snapshot under `install_dir`.
///
/// A missing or blank file yields `None`. Unparseable content also yields
/// `None` and the file is removed.
pub fn load_snapshot(install_dir: &Path) -> Option<ResumeSnapshot> {
    let path = snapshot_path(install_dir);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read resume snapshot");
            return None;
        }
    };
    if content.trim().is_empty() {
        return None;
    }

    match serde_json::from_str::<ResumeSnapshot>(&content) {
        Ok(snapshot) => {
            debug!(
                path = %path.display(),
                bytes = snapshot.bytes_downloaded,
                completed = snapshot.completed_depot_ids.len(),
                "Loaded resume snapshot"
            );
            Some(snapshot)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Discarding corrupt resume snapshot");
            if let Err(e) = fs::remove_file(&path) {
                debug!(error = %e, "Could not remove corrupt snapshot");
            }
            None
        }
    }
}

/// Write `snapshot` under `install_dir` through a temp file and rename.
///
/// When the rename fails the target is written directly.
///
/// # Errors
///
/// Returns [`SnapshotError`] if the directory cannot be created or neither
/// write path succeeds.
pub fn write_snapshot(install_dir: &Path, snapshot: &ResumeSnapshot) -> Result<(), SnapshotError> {
    let dir = install_dir.join(SNAPSHOT_DIR);
    fs::create_dir_all(&dir).map_err(|e| SnapshotError::io(&dir, e))?;

    let json = serde_json::to_vec(snapshot)?;
    let target = dir.join(SNAPSHOT_FILE);
    let temp = dir.join(SNAPSHOT_TEMP_FILE);

    fs::write(&temp, &json).map_err(|e| SnapshotError::io(&temp, e))?;
    if let Err(e) = fs::rename(&temp, &target) {
        debug!(error = %e, "Snapshot rename failed, writing in place");
        fs::write(&target, &json).map_err(|e| SnapshotError::io(&target, e))?;
        let _ = fs::remove_file(&temp);
    }
    Ok(())
}

/// Remove the snapshot under `install_dir`. A missing file is not an error.
pub fn delete_snapshot(install_dir: &Path) -> Result<(), SnapshotError> {
    let path = snapshot_path(install_dir);
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SnapshotError::io(&path, e)),
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Single background thread that runs snapshot jobs in order.
///
/// The thread is detached and exits once the writer is dropped. Every
/// physical write, background or not, holds [`SnapshotWriter::io_lock`].
#[derive(Debug)]
pub struct SnapshotWriter {
    jobs: Mutex<Option<Sender<Job>>>,
    io_lock: Arc<Mutex<()>>,
}

impl Default for SnapshotWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotWriter {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(None),
            io_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Lock serializing snapshot file access.
    pub fn io_lock(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.io_lock)
    }

    /// Queue `job` on the writer thread, starting it on first use.
    ///
    /// If the thread cannot be started the job runs on the caller's thread.
    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut jobs = self.jobs.lock();
        if jobs.is_none() {
            *jobs = Self::spawn();
        }
        let job: Job = Box::new(job);
        let job = match jobs.as_ref() {
            Some(tx) => match tx.send(job) {
                Ok(()) => return,
                Err(mpsc::SendError(job)) => {
                    *jobs = None;
                    job
                }
            },
            None => job,
        };
        drop(jobs);
        job();
    }

    fn spawn() -> Option<Sender<Job>> {
        let (tx, rx) = mpsc::channel::<Job>();
        let spawned = thread::Builder::new()
            .name("snapshot-writer".to_string())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    job();
                }
            });
        match spawned {
            Ok(_) => Some(tx),
            Err(e) => {
                warn!(error = %e, "Failed to start snapshot writer, writing inline");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    #[test]
    fn test_snapshot_round_trip() {
        let dir = TempDir::new().unwrap();
        let snapshot = ResumeSnapshot {
            bytes_downloaded: 4096,
            completed_depot_ids: [2, 1].into_iter().collect(),
        };

        write_snapshot(dir.path(), &snapshot).unwrap();
        let raw = fs::read_to_string(snapshot_path(dir.path())).unwrap();
        assert_eq!(raw, r#"{"bytesDownloaded":4096,"completedDepotIds":[1,2]}"#);
        assert_eq!(load_snapshot(dir.path()), Some(snapshot));
        assert!(!dir.path().join(SNAPSHOT_DIR).join(SNAPSHOT_TEMP_FILE).exists());
    }

    #[test]
    fn test_missing_and_blank_snapshot() {
        let dir = TempDir::new().unwrap();
        assert_eq!(load_snapshot(dir.path()), None);

        fs::create_dir_all(dir.path().join(SNAPSHOT_DIR)).unwrap();
        fs::write(snapshot_path(dir.path()), "  \n").unwrap();
        assert_eq!(load_snapshot(dir.path()), None);
        assert!(snapshot_path(dir.path()).exists());
    }

    #[test]
    fn test_corrupt_snapshot_is_deleted() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(SNAPSHOT_DIR)).unwrap();
        fs::write(snapshot_path(dir.path()), "{not json").unwrap();

        assert_eq!(load_snapshot(dir.path()), None);
        assert!(!snapshot_path(dir.path()).exists());
    }

    #[test]
    fn test_negative_bytes_load_as_zero() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(SNAPSHOT_DIR)).unwrap();
        fs::write(
            snapshot_path(dir.path()),
            r#"{"bytesDownloaded":-5,"completedDepotIds":[7]}"#,
        )
        .unwrap();

        let snapshot = load_snapshot(dir.path()).unwrap();
        assert_eq!(snapshot.bytes_downloaded, 0);
        assert!(snapshot.completed_depot_ids.contains(&7));
    }

    #[test]
    fn test_delete_missing_snapshot_is_ok() {
        let dir = TempDir::new().unwrap();
        assert!(delete_snapshot(dir.path()).is_ok());
    }

    #[test]
    fn test_writer_runs_jobs_in_order() {
        let writer = SnapshotWriter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let done = Arc::new(AtomicUsize::new(0));
        for i in 0..5 {
            let seen = Arc::clone(&seen);
            let done = Arc::clone(&done);
            writer.submit(move || {
                seen.lock().push(i);
                done.fetch_add(1, Ordering::SeqCst);
            });
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while done.load(Ordering::SeqCst) < 5 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
    }
}
