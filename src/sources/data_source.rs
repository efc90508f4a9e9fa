//! Data source trait.

use crate::error::Result;
use crate::record::Record;
use async_trait::async_trait;

/// Trait for time-series data sources.
///
/// Implement this trait to poll a different backend. The only operation the
/// monitor needs is "give me the most recent record of this measurement".
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Fetch the most recent record of `measurement`.
    ///
    /// Returns `Ok(None)` when the measurement has no rows. Implementations
    /// are responsible for returning the single latest row when the backend
    /// holds several.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::DataSource`](crate::error::MonitorError::DataSource)
    /// on connection failures, query errors, or malformed responses.
    async fn fetch_latest(&self, measurement: &str) -> Result<Option<Record>>;

    /// Get a human-readable name for this source (for logging/debugging).
    fn name(&self) -> String;
}
