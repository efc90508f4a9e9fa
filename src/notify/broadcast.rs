//! In-process publish/subscribe sink.

use super::PushSink;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// A message as seen by in-process subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    /// Topic the message was published to
    pub topic: String,
    /// Serialized event
    pub payload: Vec<u8>,
}

/// Push sink fanning events out to in-process subscribers.
///
/// Subscribers that fall behind by more than the channel capacity lose the
/// oldest messages, matching the at-most-once contract of the push channel.
///
/// # Examples
///
/// ```rust
/// use pollwatch::notify::{BroadcastSink, PushSink};
///
/// # async fn example() {
/// let sink = BroadcastSink::new(16);
/// let mut rx = sink.subscribe();
///
/// sink.publish("sensors/changes", b"{}".to_vec()).await.unwrap();
/// let message = rx.recv().await.unwrap();
/// assert_eq!(message.topic, "sensors/changes");
/// # }
/// ```
#[derive(Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<Published>,
    closed: Arc<AtomicBool>,
}

impl BroadcastSink {
    /// Create a sink buffering up to `capacity` messages per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Subscribe to messages published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Published> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Whether [`close`](PushSink::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl PushSink for BroadcastSink {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let message = Published {
            topic: topic.to_string(),
            payload,
        };
        if self.sender.send(message).is_err() {
            debug!(topic, "No in-process subscribers, message dropped");
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> String {
        "broadcast".to_string()
    }
}
