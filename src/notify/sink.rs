//! Push sink trait.

use crate::error::Result;
use async_trait::async_trait;

/// Trait for publish/subscribe style outbound channels.
///
/// Delivery is at-most-once: the notifier never retries a failed publish.
#[async_trait]
pub trait PushSink: Send + Sync {
    /// Publish `payload` to `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Delivery`](crate::error::MonitorError::Delivery)
    /// if the transport does not accept the message.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    /// Release the transport. Called once during shutdown.
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Get a human-readable name for this sink (for logging/debugging).
    fn name(&self) -> String;
}
