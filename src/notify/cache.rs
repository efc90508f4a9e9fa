//! Single-slot pull cache providing lock-free reads.

use crate::record::ChangeEvent;
use arc_swap::ArcSwap;
use std::sync::Arc;

/// Holds the latest [`ChangeEvent`] for pull-style readers.
///
/// The cycle is the only writer; any number of readers may call
/// [`get`](Self::get) concurrently without blocking it. Readers see a
/// snapshot, never the live observation state. Clones share the same slot.
///
/// # Examples
///
/// ```rust
/// use pollwatch::notify::PullCache;
///
/// let cache = PullCache::new();
/// let event = cache.get();
/// assert!(!event.changed);
/// assert!(event.last_change_time.is_none());
/// ```
pub struct PullCache {
    current: Arc<ArcSwap<ChangeEvent>>,
}

impl PullCache {
    /// Create a cache holding the pre-first-cycle default
    /// (`dataChanged: false`, `lastChangeTime: null`).
    pub fn new() -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(ChangeEvent::default())),
        }
    }

    /// Get a reference-counted handle to the latest event.
    ///
    /// This operation is lock-free.
    pub fn get(&self) -> Arc<ChangeEvent> {
        self.current.load_full()
    }

    /// Overwrite the slot with `event`.
    ///
    /// The record is dropped unless the event reports a change.
    pub fn store(&self, event: &ChangeEvent) {
        self.current.store(Arc::new(event.pull_view()));
    }
}

impl Default for PullCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for PullCache {
    fn clone(&self) -> Self {
        Self {
            current: Arc::clone(&self.current),
        }
    }
}
