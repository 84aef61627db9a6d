//! Download progress tracking.
//!
//! A [`DownloadTracker`] is shared by the transport (which reports byte
//! deltas and finished depots), the UI (which reads progress, speed, ETA and
//! phase), and the session (which drives the lifecycle).
//!
//! # Architecture
//!
//! ```text
//! transport ──update_bytes_downloaded──► DownloadTracker ──► listeners (throttled)
//!                                              │          └─► phase watch channel
//!                                              │
//!                                              └──► SnapshotWriter thread
//!                                                   <install>/.DownloadInfo/depot_bytes.json
//! ```
//!
//! Counters are atomics; the speed window, depot sets and listener list each
//! sit behind their own lock. Snapshot writes are serialized by a lock shared
//! between the background writer and forced writes.

mod clock;
mod listener;
mod phase;
mod snapshot;
mod speed;
mod tracker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use listener::{ListenerId, ProgressListener, DEFAULT_EMIT_INTERVAL_MS};
pub use phase::DownloadPhase;
pub use snapshot::{
    delete_snapshot, load_snapshot, snapshot_path, write_snapshot, ResumeSnapshot, SnapshotError,
    SnapshotWriter, SNAPSHOT_DIR, SNAPSHOT_FILE,
};
pub use speed::{
    SpeedWindow, CURRENT_SPEED_WINDOW_MS, ETA_SPEED_WINDOW_MS, MIN_MEASURABLE_SPAN_MS,
    SAMPLE_RETENTION_MS, STALE_SAMPLE_MS,
};
pub use tracker::{
    DownloadTracker, Termination, TrackerConfig, DEFAULT_SNAPSHOT_INTERVAL_MS,
    INCOMPLETE_DEPOT_CAP,
};
