//! Progress listener registry and emission throttle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

/// Default minimum spacing between emissions.
pub const DEFAULT_EMIT_INTERVAL_MS: u64 = 100;

/// Callback receiving overall progress in `[0, 1]`.
pub type ProgressListener = Arc<dyn Fn(f64) + Send + Sync>;

/// Handle returned on registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Registered listeners.
///
/// Emission calls a cloned list, so a listener may add or remove listeners
/// without deadlocking.
#[derive(Default)]
pub(crate) struct ListenerSet {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(ListenerId, ProgressListener)>>,
}

impl ListenerSet {
    pub fn add(&self, listener: ProgressListener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners.write().push((id, listener));
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn notify(&self, progress: f64) {
        let listeners: Vec<ProgressListener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(progress);
        }
    }
}

/// Decides whether a progress value is worth emitting.
///
/// Only changed values are emitted: immediately at 0 % and 100 %, otherwise
/// no more often than the configured interval.
#[derive(Debug)]
pub(crate) struct EmitThrottle {
    interval_ms: u64,
    last_emit_ms: Option<u64>,
    last_value: Option<f64>,
}

impl EmitThrottle {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            last_emit_ms: None,
            last_value: None,
        }
    }

    /// Record `progress` as emitted at `now_ms` if it should be emitted.
    pub fn admit(&mut self, progress: f64, now_ms: u64) -> bool {
        let changed = self
            .last_value
            .map_or(true, |last| (progress - last).abs() > 0.0);
        if !changed {
            return false;
        }

        let boundary = progress <= 0.0 || progress >= 1.0;
        let due = self
            .last_emit_ms
            .map_or(true, |last| now_ms.saturating_sub(last) >= self.interval_ms);
        if boundary || due {
            self.last_emit_ms = Some(now_ms);
            self.last_value = Some(progress);
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_add_and_remove_listener() {
        let set = ListenerSet::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = set.add(Arc::new(move |p| sink.lock().push(p)));

        set.notify(0.5);
        assert!(set.remove(id));
        assert!(!set.remove(id));
        set.notify(0.75);

        assert_eq!(*seen.lock(), vec![0.5]);
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn test_listener_may_unregister_itself() {
        let set = Arc::new(ListenerSet::default());
        let slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));

        let set_ref = Arc::clone(&set);
        let slot_ref = Arc::clone(&slot);
        let id = set.add(Arc::new(move |_| {
            if let Some(id) = *slot_ref.lock() {
                set_ref.remove(id);
            }
        }));
        *slot.lock() = Some(id);

        set.notify(0.1);
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn test_throttle_interval() {
        let mut throttle = EmitThrottle::new(100);
        assert!(throttle.admit(0.1, 1_000));
        assert!(!throttle.admit(0.2, 1_050));
        assert!(throttle.admit(0.2, 1_100));
        // Unchanged values never emit.
        assert!(!throttle.admit(0.2, 5_000));
    }

    #[test]
    fn test_throttle_boundaries_bypass_interval() {
        let mut throttle = EmitThrottle::new(100);
        assert!(throttle.admit(0.5, 1_000));
        assert!(throttle.admit(1.0, 1_001));
        assert!(!throttle.admit(1.0, 1_002));
        assert!(throttle.admit(0.0, 1_003));
    }
}
