//! In-memory state store.

use super::StateStore;
use crate::error::{MonitorError, Result};
use crate::record::ObservationState;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

/// State store that keeps the slot in memory.
///
/// Useful for embedding and tests. Saves can be made to fail on demand to
/// exercise persistence-lag handling. Clones share the same slot.
#[derive(Clone, Default)]
pub struct MemoryStateStore {
    slot: Arc<Mutex<Option<ObservationState>>>,
    fail_saves: Arc<AtomicBool>,
    saves: Arc<AtomicUsize>,
}

impl MemoryStateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store already holding `state`.
    pub fn with_state(state: ObservationState) -> Self {
        let store = Self::new();
        *store.lock() = Some(state);
        store
    }

    /// Make subsequent saves fail (or succeed again).
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Current contents of the slot.
    pub fn snapshot(&self) -> Option<ObservationState> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Option<ObservationState>> {
        self.slot.lock()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<Option<ObservationState>> {
        Ok(self.snapshot())
    }

    fn save(&self, state: &ObservationState) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(MonitorError::Persistence(
                "memory store configured to fail".to_string(),
            ));
        }
        *self.lock() = Some(state.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> String {
        "memory".to_string()
    }
}
