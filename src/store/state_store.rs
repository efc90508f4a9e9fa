//! State store trait.

use crate::error::Result;
use crate::record::ObservationState;

/// Trait for the durable "last known state" slot.
///
/// The slot is overwrite-only and keyed by nothing: a process holds exactly
/// one observation state.
///
/// Both methods may block. The change detector calls `save` from Tokio's
/// blocking pool.
pub trait StateStore: Send + Sync {
    /// Load the persisted state.
    ///
    /// Returns `Ok(None)` when nothing has been persisted yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot exists but cannot be read or parsed.
    /// Callers treat this the same as an empty slot.
    fn load(&self) -> Result<Option<ObservationState>>;

    /// Overwrite the slot with `state`.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Persistence`](crate::error::MonitorError::Persistence)
    /// if the write does not complete.
    fn save(&self, state: &ObservationState) -> Result<()>;

    /// Get a human-readable name for this store (for logging/debugging).
    fn name(&self) -> String;
}
