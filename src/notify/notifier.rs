//! Dual-channel delivery of change events.

use super::{PullCache, PushSink};
use crate::error::{MonitorError, Result};
use crate::record::ChangeEvent;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Delivers each cycle's event to the push sink and the pull cache.
///
/// The two sinks are isolated: the pull cache is always updated, whatever
/// happens to the publish. Publishing is bounded by a timeout and never
/// retried.
///
/// # Examples
///
/// ```rust
/// use pollwatch::notify::{BroadcastSink, Notifier, PullCache};
/// use pollwatch::record::ChangeEvent;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn example() {
/// let cache = PullCache::new();
/// let notifier = Notifier::new(
///     Arc::new(BroadcastSink::default()),
///     "sensors/changes",
///     cache.clone(),
///     Duration::from_secs(5),
/// );
///
/// notifier.deliver(&ChangeEvent::unchanged(None)).await.unwrap();
/// assert!(!cache.get().changed);
/// # }
/// ```
pub struct Notifier {
    sink: Arc<dyn PushSink>,
    topic: String,
    cache: PullCache,
    publish_timeout: Duration,
}

impl Notifier {
    /// Create a notifier publishing to `topic` on `sink` and storing into `cache`.
    pub fn new(
        sink: Arc<dyn PushSink>,
        topic: impl Into<String>,
        cache: PullCache,
        publish_timeout: Duration,
    ) -> Self {
        Self {
            sink,
            topic: topic.into(),
            cache,
            publish_timeout,
        }
    }

    /// The pull cache this notifier writes to.
    pub fn cache(&self) -> &PullCache {
        &self.cache
    }

    /// The topic events are published to.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Deliver `event` to both sinks.
    ///
    /// # Errors
    ///
    /// Returns the push-side failure (serialization, delivery, or timeout).
    /// The pull cache has already been updated when this returns, error or not.
    pub async fn deliver(&self, event: &ChangeEvent) -> Result<()> {
        self.cache.store(event);

        let payload = event.to_payload()?;
        match tokio::time::timeout(self.publish_timeout, self.sink.publish(&self.topic, payload))
            .await
        {
            Ok(Ok(())) => {
                debug!(topic = %self.topic, changed = event.changed, "Published change event");
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(sink = %self.sink.name(), error = %e, "Push delivery failed");
                Err(e)
            }
            Err(_) => {
                warn!(
                    sink = %self.sink.name(),
                    timeout = ?self.publish_timeout,
                    "Push delivery timed out, event discarded"
                );
                Err(MonitorError::Timeout {
                    operation: "publish",
                    after: self.publish_timeout,
                })
            }
        }
    }

    /// Close the push sink.
    pub async fn close(&self) -> Result<()> {
        self.sink.close().await
    }
}
