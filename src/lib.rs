//! # pollwatch
//!
//! Watch a time-series measurement for changes and fan every poll's outcome
//! out to push and pull consumers.
//!
//! ## Overview
//!
//! On a fixed interval `pollwatch` fetches the latest record of a measurement,
//! compares it with the last one it saw, persists the observation durably, and
//! delivers a [`ChangeEvent`](record::ChangeEvent) to:
//! - a push sink (an MQTT topic, or an in-process broadcast channel)
//! - a lock-free single-slot pull cache, served over HTTP at `GET /data`
//!
//! Both channels carry the same payload:
//!
//! ```json
//! {"dataChanged": true, "lastChangeTime": "2024-05-01T12:00:00Z", "data": {"temp": 21.5}}
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pollwatch::prelude::*;
//! use pollwatch::notify::MqttSink;
//! use pollwatch::sources::InfluxSource;
//! use pollwatch::store::FileStateStore;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<()> {
//! let monitor = Monitor::builder()
//!     .with_source(
//!         InfluxSource::builder()
//!             .with_server("localhost")
//!             .with_database("telemetry")
//!             .build()?,
//!     )
//!     .with_sink(MqttSink::builder().with_url("mqtt://localhost:1883").build()?)
//!     .with_store(FileStateStore::new("./lastKnownData.json"))
//!     .with_measurement("cpu")
//!     .with_topic("telemetry/cpu")
//!     .with_interval(Duration::from_secs(5))
//!     .build()?;
//!
//! monitor.start()?;
//! // ...
//! monitor.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Guarantees
//!
//! - The first record ever observed counts as a change; an empty fetch never does
//! - `lastChangeTime` never goes backwards
//! - Cycles never overlap; a tick that arrives while one is running is skipped
//! - A failing sink, store, or source never stops the poller
//!
//! ## Feature Flags
//!
//! - `influxdb` (default): InfluxDB HTTP query adapter
//! - `mqtt` (default): MQTT push sink
//! - `server` (default): HTTP pull endpoint
//! - `metrics`: OpenTelemetry cycle metrics

#![warn(missing_docs, rust_2024_compatibility)]
#![deny(unsafe_code)]

pub mod core;
pub mod error;
pub mod notify;
pub mod record;
pub mod sources;
pub mod store;

#[cfg(feature = "server")]
pub mod server;

#[cfg(feature = "metrics")]
pub mod metrics;

/// Convenient re-exports for common usage patterns.
pub mod prelude {
    pub use crate::core::{CycleReport, Monitor, MonitorBuilder, Phase, Validate};
    pub use crate::error::{MonitorError, Result, ValidationError};
    pub use crate::notify::{PullCache, PushSink};
    pub use crate::record::{ChangeEvent, ObservationState, Record};
    pub use crate::sources::DataSource;
    pub use crate::store::StateStore;
}
