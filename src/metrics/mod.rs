//! Built-in metrics for poll cycles.
//!
//! Provides OpenTelemetry metrics tracking:
//! - Cycles by outcome
//! - Cycle errors by kind
//! - Cycle duration
//! - Skipped scheduler ticks
//! - Age of the last observed change
//!
//! # Examples
//!
//! ```rust,no_run
//! use pollwatch::prelude::*;
//! use pollwatch::notify::BroadcastSink;
//! use pollwatch::sources::MemorySource;
//! use pollwatch::store::MemoryStateStore;
//! use opentelemetry::global;
//! use std::time::Duration;
//!
//! # fn example() -> Result<()> {
//! let monitor = Monitor::builder()
//!     .with_source(MemorySource::new())
//!     .with_sink(BroadcastSink::default())
//!     .with_store(MemoryStateStore::new())
//!     .with_measurement("cpu")
//!     .with_topic("cpu/changes")
//!     .with_interval(Duration::from_secs(5))
//!     .with_metrics(global::meter("my-app"))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

mod cycle_metrics;

pub use cycle_metrics::CycleMetrics;
