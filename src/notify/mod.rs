//! Change notification delivery.
//!
//! Every cycle's [`ChangeEvent`](crate::record::ChangeEvent) goes to two
//! independent sinks: a push sink (pub/sub topic) and the single-slot pull
//! cache backing the query endpoint.

pub mod broadcast;
pub mod cache;
pub mod notifier;
pub mod sink;

#[cfg(feature = "mqtt")]
pub mod mqtt;

pub use broadcast::{BroadcastSink, Published};
pub use cache::PullCache;
pub use notifier::Notifier;
pub use sink::PushSink;

#[cfg(feature = "mqtt")]
pub use mqtt::{MqttSink, MqttSinkBuilder};
