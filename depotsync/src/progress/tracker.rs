//! Per-download progress tracking.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::listener::{EmitThrottle, ListenerId, ListenerSet, ProgressListener, DEFAULT_EMIT_INTERVAL_MS};
use super::phase::DownloadPhase;
use super::snapshot::{
    delete_snapshot, load_snapshot, write_snapshot, ResumeSnapshot, SnapshotWriter,
};
use super::speed::SpeedWindow;

/// Default minimum spacing between background snapshot writes.
pub const DEFAULT_SNAPSHOT_INTERVAL_MS: u64 = 5_000;

/// Progress value reported while bytes are complete but a depot is not.
pub const INCOMPLETE_DEPOT_CAP: f64 = 0.99;

/// Tracker tuning.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Number of sub-jobs used by the fallback progress estimate.
    pub job_count: usize,
    /// Minimum spacing between background snapshot writes.
    pub snapshot_interval: Duration,
    /// Minimum spacing between listener emissions away from 0 % and 100 %.
    pub emit_interval: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            job_count: 1,
            snapshot_interval: Duration::from_millis(DEFAULT_SNAPSHOT_INTERVAL_MS),
            emit_interval: Duration::from_millis(DEFAULT_EMIT_INTERVAL_MS),
        }
    }
}

impl TrackerConfig {
    pub fn with_job_count(mut self, job_count: usize) -> Self {
        self.job_count = job_count.max(1);
        self
    }

    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = interval;
        self
    }

    pub fn with_emit_interval(mut self, interval: Duration) -> Self {
        self.emit_interval = interval;
        self
    }
}

/// Why a download stopped early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    Cancelled(String),
    Failed(String),
}

/// Snapshot binding and write bookkeeping, shared with the writer thread.
#[derive(Debug, Default)]
struct PersistState {
    install_dir: RwLock<Option<PathBuf>>,
    /// 0 means no write since the last (re)bind.
    last_persist_ms: AtomicU64,
    dirty: AtomicBool,
    enqueued: AtomicBool,
    generation: AtomicU64,
}

impl PersistState {
    fn reset(&self) {
        self.last_persist_ms.store(0, Ordering::SeqCst);
        self.dirty.store(false, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

/// Tracks bytes, phase, speed and resumability of one download.
///
/// All methods take `&self`; share the tracker through an `Arc` between the
/// transport workers, the UI and the session.
///
/// # Example
///
/// ```
/// use depotsync::progress::{DownloadPhase, DownloadTracker};
///
/// let tracker = DownloadTracker::new();
/// tracker.set_total_bytes(1000);
/// tracker.set_active(true);
/// tracker.update_status(DownloadPhase::Downloading, None);
/// tracker.update_bytes_downloaded(250);
/// assert_eq!(tracker.progress(), 0.25);
/// ```
pub struct DownloadTracker {
    config: TrackerConfig,
    clock: Arc<dyn Clock>,

    total_bytes: AtomicU64,
    bytes_downloaded: AtomicU64,
    active: AtomicBool,
    speed: Mutex<SpeedWindow>,

    phase: watch::Sender<DownloadPhase>,
    status_message: Mutex<Option<String>>,

    depot_sizes: Mutex<HashMap<u32, u64>>,
    completed_depots: Mutex<BTreeSet<u32>>,
    job_progress: Mutex<Vec<f64>>,
    job_weights: Mutex<Vec<f64>>,

    listeners: ListenerSet,
    throttle: Mutex<EmitThrottle>,

    persist: Arc<PersistState>,
    writer: SnapshotWriter,

    cancel_token: CancellationToken,
    termination: Mutex<Option<Termination>>,
}

impl fmt::Debug for DownloadTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadTracker")
            .field("phase", &self.phase())
            .field("bytes_downloaded", &self.bytes_downloaded())
            .field("total_bytes", &self.total_bytes())
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

impl Default for DownloadTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadTracker {
    /// Tracker with default tuning on the system clock.
    pub fn new() -> Self {
        Self::with_config(TrackerConfig::default())
    }

    pub fn with_config(config: TrackerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Tracker on an explicit clock.
    pub fn with_clock(config: TrackerConfig, clock: Arc<dyn Clock>) -> Self {
        let jobs = config.job_count.max(1);
        let (phase, _) = watch::channel(DownloadPhase::Unknown);
        Self {
            throttle: Mutex::new(EmitThrottle::new(config.emit_interval.as_millis() as u64)),
            config,
            clock,
            total_bytes: AtomicU64::new(0),
            bytes_downloaded: AtomicU64::new(0),
            active: AtomicBool::new(false),
            speed: Mutex::new(SpeedWindow::new()),
            phase,
            status_message: Mutex::new(None),
            depot_sizes: Mutex::new(HashMap::new()),
            completed_depots: Mutex::new(BTreeSet::new()),
            job_progress: Mutex::new(vec![0.0; jobs]),
            job_weights: Mutex::new(vec![1.0; jobs]),
            listeners: ListenerSet::default(),
            persist: Arc::new(PersistState::default()),
            writer: SnapshotWriter::new(),
            cancel_token: CancellationToken::new(),
            termination: Mutex::new(None),
        }
    }

    // ---- Bytes ----

    pub fn set_total_bytes(&self, total: u64) {
        self.total_bytes.store(total, Ordering::SeqCst);
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::SeqCst)
    }

    pub fn bytes_downloaded(&self) -> u64 {
        self.bytes_downloaded.load(Ordering::SeqCst)
    }

    /// `(downloaded, total)` with `downloaded` capped at `total`; `(0, 0)`
    /// while the total is unknown.
    pub fn bytes_progress(&self) -> (u64, u64) {
        let total = self.total_bytes();
        if total == 0 {
            return (0, 0);
        }
        (self.bytes_downloaded().min(total), total)
    }

    /// Seed the byte counter, typically from a resume snapshot.
    pub fn initialize_bytes_downloaded(&self, bytes: u64) {
        self.bytes_downloaded.store(bytes, Ordering::SeqCst);
    }

    /// Apply a signed byte delta at the current time.
    pub fn update_bytes_downloaded(&self, delta: i64) {
        self.update_bytes_downloaded_at(delta, self.clock.now_ms());
    }

    /// Apply a signed byte delta observed at `at_ms`.
    ///
    /// Negative deltas undo bytes from a failed chunk; the counter saturates
    /// at zero. Deltas are ignored while the tracker is inactive.
    pub fn update_bytes_downloaded_at(&self, delta: i64, at_ms: u64) {
        if delta == 0 || !self.is_active() {
            return;
        }
        let apply = |current: u64| {
            if delta > 0 {
                current.saturating_add(delta as u64)
            } else {
                current.saturating_sub(delta.unsigned_abs())
            }
        };
        let previous = self
            .bytes_downloaded
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| Some(apply(c)))
            .unwrap_or_else(|c| c);
        let updated = apply(previous);
        if delta < 0 && updated == 0 && delta.unsigned_abs() > previous {
            debug!(previous, delta, "Byte counter clamped at zero");
        }

        self.speed.lock().record(at_ms, updated);
        self.persist.dirty.store(true, Ordering::SeqCst);
        self.emit_progress_change();
        self.persist_progress_snapshot(false);
    }

    // ---- Activity and speed ----

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Activate or deactivate byte accounting. Deactivating clears the speed
    /// history.
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
        if !active {
            self.speed.lock().reset();
        }
    }

    /// Bytes per second over the short window.
    pub fn current_speed(&self) -> Option<f64> {
        if !self.is_active() {
            return None;
        }
        self.speed.lock().current_speed(self.clock.now_ms())
    }

    /// Estimated milliseconds until the byte total is reached.
    pub fn eta_ms(&self) -> Option<u64> {
        if !self.is_active() || !self.phase().allows_eta() {
            return None;
        }
        let total = self.total_bytes();
        let downloaded = self.bytes_downloaded();
        if total == 0 || downloaded >= total {
            return None;
        }
        let speed = self.speed.lock().eta_speed(self.clock.now_ms())?;
        Some(((total - downloaded) as f64 / speed * 1000.0) as u64)
    }

    // ---- Phase ----

    pub fn phase(&self) -> DownloadPhase {
        *self.phase.borrow()
    }

    pub fn status_message(&self) -> Option<String> {
        self.status_message.lock().clone()
    }

    /// Receiver that observes every phase change.
    pub fn subscribe_phase(&self) -> watch::Receiver<DownloadPhase> {
        self.phase.subscribe()
    }

    /// Move to `phase`, optionally with a status message.
    ///
    /// A phase change without a message clears the previous message. Once
    /// `Complete` or `Failed`, every update is refused and `false` is
    /// returned.
    pub fn update_status(&self, phase: DownloadPhase, message: Option<String>) -> bool {
        let mut status = self.status_message.lock();
        let previous = self.phase();

        if previous.is_terminal() {
            if phase != previous {
                warn!(from = %previous, to = %phase, "Ignoring transition out of terminal phase");
            }
            return false;
        }
        if DownloadPhase::resets_speed_on_entry(previous, phase) {
            self.speed.lock().reset();
        }

        match message {
            Some(message) => *status = Some(message),
            None if previous != phase => *status = None,
            None => {}
        }
        if previous != phase {
            info!(from = %previous, to = %phase, "Download phase changed");
            self.phase.send_replace(phase);
        }
        true
    }

    // ---- Depots and jobs ----

    /// Depots whose completion gates 100 %. Sizes below one byte count as one.
    pub fn set_depot_sizes(&self, sizes: &HashMap<u32, u64>) {
        let mut depots = self.depot_sizes.lock();
        depots.clear();
        depots.extend(sizes.iter().map(|(id, size)| (*id, (*size).max(1))));
    }

    pub fn mark_depot_completed(&self, depot_id: u32) {
        if self.completed_depots.lock().insert(depot_id) {
            debug!(depot_id, "Depot completed");
            self.persist.dirty.store(true, Ordering::SeqCst);
            self.emit_progress_change();
        }
    }

    pub fn initialize_completed_depot_ids(&self, ids: impl IntoIterator<Item = u32>) {
        let mut completed = self.completed_depots.lock();
        completed.clear();
        completed.extend(ids);
    }

    pub fn completed_depot_ids(&self) -> BTreeSet<u32> {
        self.completed_depots.lock().clone()
    }

    pub fn tracked_depot_ids(&self) -> BTreeSet<u32> {
        self.depot_sizes.lock().keys().copied().collect()
    }

    /// Whether any tracked depot is still incomplete.
    pub fn has_incomplete_depots(&self) -> bool {
        let completed = self.completed_depots.lock();
        self.depot_sizes
            .lock()
            .keys()
            .any(|id| !completed.contains(id))
    }

    /// Per-job weights for the fallback estimate. Ignored unless one weight
    /// per job is given.
    pub fn set_job_weights(&self, weights: &[f64]) {
        let mut current = self.job_weights.lock();
        if weights.len() == current.len() {
            current.copy_from_slice(weights);
        }
    }

    /// Progress of job `index` in `[0, 1]`.
    pub fn set_job_progress(&self, index: usize, progress: f64) {
        {
            let mut jobs = self.job_progress.lock();
            match jobs.get_mut(index) {
                Some(slot) => *slot = progress.clamp(0.0, 1.0),
                None => {
                    warn!(index, jobs = jobs.len(), "Progress for unknown job");
                    return;
                }
            }
        }
        self.emit_progress_change();
    }

    /// Overall progress in `[0, 1]`.
    ///
    /// With a known byte total this is the byte fraction, held at
    /// [`INCOMPLETE_DEPOT_CAP`] while a tracked depot is unfinished. Without
    /// one it is the weighted mean of the job progress values.
    pub fn progress(&self) -> f64 {
        let (downloaded, total) = self.bytes_progress();
        if total > 0 {
            let fraction = (downloaded as f64 / total as f64).clamp(0.0, 1.0);
            if fraction >= 1.0 && self.has_incomplete_depots() {
                return INCOMPLETE_DEPOT_CAP;
            }
            return fraction;
        }

        let jobs = self.job_progress.lock();
        let weights = self.job_weights.lock();
        let weight_sum: f64 = weights.iter().sum();
        if weight_sum <= 0.0 {
            return 0.0;
        }
        let weighted: f64 = jobs.iter().zip(weights.iter()).map(|(p, w)| p * w).sum();
        (weighted / weight_sum).clamp(0.0, 1.0)
    }

    // ---- Listeners ----

    pub fn add_progress_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        let listener: ProgressListener = Arc::new(listener);
        self.listeners.add(listener)
    }

    pub fn remove_progress_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    fn emit_progress_change(&self) {
        if self.listeners.len() == 0 {
            return;
        }
        let progress = self.progress();
        let admitted = self.throttle.lock().admit(progress, self.clock.now_ms());
        if admitted {
            self.listeners.notify(progress);
        }
    }

    // ---- Snapshots ----

    /// Current bytes and completed depots.
    pub fn resume_snapshot(&self) -> ResumeSnapshot {
        ResumeSnapshot {
            bytes_downloaded: self.bytes_downloaded(),
            completed_depot_ids: self.completed_depot_ids(),
        }
    }

    pub fn persistence_path(&self) -> Option<PathBuf> {
        self.persist.install_dir.read().clone()
    }

    /// Bind snapshots to `install_dir`, or unbind with `None`.
    ///
    /// Rebinding invalidates any background write queued for the old
    /// location.
    pub fn set_persistence_path(&self, install_dir: Option<PathBuf>) {
        let mut bound = self.persist.install_dir.write();
        if *bound == install_dir {
            return;
        }
        debug!(install_dir = ?install_dir, "Snapshot binding changed");
        *bound = install_dir;
        self.persist.reset();
    }

    /// Load the snapshot at the bound location into the counters.
    pub fn resume_from_snapshot(&self) -> Option<ResumeSnapshot> {
        let dir = self.persistence_path()?;
        let snapshot = load_snapshot(&dir)?;
        self.initialize_bytes_downloaded(snapshot.bytes_downloaded);
        self.initialize_completed_depot_ids(snapshot.completed_depot_ids.iter().copied());
        info!(
            bytes = snapshot.bytes_downloaded,
            completed = snapshot.completed_depot_ids.len(),
            "Resuming from snapshot"
        );
        Some(snapshot)
    }

    /// Persist the current state.
    ///
    /// A forced persist writes synchronously. Otherwise a background write is
    /// queued only when the state changed, the snapshot interval has passed,
    /// and no write is already queued.
    pub fn persist_progress_snapshot(&self, force: bool) {
        // Generation is read under the binding lock so a concurrent rebind
        // cannot pair the old directory with the new generation.
        let (dir, generation) = {
            let bound = self.persist.install_dir.read();
            let Some(dir) = bound.clone() else {
                return;
            };
            (dir, self.persist.generation.load(Ordering::SeqCst))
        };

        if force {
            let snapshot = self.resume_snapshot();
            let io_lock = self.writer.io_lock();
            let _guard = io_lock.lock();
            match write_snapshot(&dir, &snapshot) {
                Ok(()) => {
                    self.persist
                        .last_persist_ms
                        .store(self.clock.now_ms(), Ordering::SeqCst);
                    self.persist.dirty.store(false, Ordering::SeqCst);
                }
                Err(e) => {
                    warn!(error = %e, "Failed to persist resume snapshot");
                    self.persist.dirty.store(true, Ordering::SeqCst);
                }
            }
            return;
        }

        let state = &self.persist;
        if !state.dirty.load(Ordering::SeqCst) {
            return;
        }
        let last = state.last_persist_ms.load(Ordering::SeqCst);
        let interval = self.config.snapshot_interval.as_millis() as u64;
        if last != 0 && self.clock.now_ms().saturating_sub(last) < interval {
            return;
        }
        if state
            .enqueued
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        if !state.dirty.swap(false, Ordering::SeqCst) {
            state.enqueued.store(false, Ordering::SeqCst);
            return;
        }

        let snapshot = self.resume_snapshot();
        let state = Arc::clone(&self.persist);
        let io_lock = self.writer.io_lock();
        let clock = Arc::clone(&self.clock);
        self.writer.submit(move || {
            {
                let _guard = io_lock.lock();
                if state.generation.load(Ordering::SeqCst) != generation {
                    debug!("Dropping snapshot write for a stale binding");
                } else {
                    match write_snapshot(&dir, &snapshot) {
                        Ok(()) => state.last_persist_ms.store(clock.now_ms(), Ordering::SeqCst),
                        Err(e) => {
                            warn!(error = %e, "Failed to persist resume snapshot");
                            state.dirty.store(true, Ordering::SeqCst);
                        }
                    }
                }
            }
            state.enqueued.store(false, Ordering::SeqCst);
        });
    }

    /// Delete the snapshot at the bound location.
    ///
    /// Invalidates queued background writes. With `sync` the file is gone
    /// when this returns; otherwise deletion is queued on the writer thread.
    pub fn clear_persisted_snapshot(&self, sync: bool) {
        let Some(dir) = self.persistence_path() else {
            return;
        };
        self.persist.reset();

        if sync {
            let io_lock = self.writer.io_lock();
            let _guard = io_lock.lock();
            remove_snapshot(&dir);
        } else {
            let io_lock = self.writer.io_lock();
            self.writer.submit(move || {
                let _guard = io_lock.lock();
                remove_snapshot(&dir);
            });
        }
    }

    // ---- Termination ----

    /// Token cancelled when the download is cancelled or fails.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn termination(&self) -> Option<Termination> {
        self.termination.lock().clone()
    }

    /// Stop the download on request.
    ///
    /// Persists synchronously, deactivates, moves to `Failed` with the reason
    /// as status message, and cancels the token.
    pub fn cancel(&self, reason: impl Into<String>) {
        let reason = reason.into();
        info!(reason = %reason, "Download cancelled");
        self.terminate(Termination::Cancelled(reason.clone()), reason);
    }

    /// Stop the download because of `error`.
    pub fn failed_to_download(&self, error: impl Into<String>) {
        let error = error.into();
        warn!(error = %error, "Download failed");
        self.terminate(Termination::Failed(error.clone()), error);
    }

    fn terminate(&self, termination: Termination, message: String) {
        self.persist_progress_snapshot(true);
        self.update_status(DownloadPhase::Failed, Some(message));
        self.set_active(false);
        self.termination.lock().get_or_insert(termination);
        self.cancel_token.cancel();
    }
}

fn remove_snapshot(dir: &Path) {
    if let Err(e) = delete_snapshot(dir) {
        warn!(error = %e, "Failed to delete resume snapshot");
    }
}
