//! Poll-cycle orchestration and process lifecycle.

use super::detector::{ChangeDetector, Clock};
use super::scheduler::Scheduler;
use crate::error::{MonitorError, Result};
use crate::notify::{Notifier, PullCache, PushSink};
use crate::record::{ChangeEvent, ObservationState};
use crate::sources::DataSource;
use crate::store::StateStore;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[cfg(feature = "metrics")]
use crate::metrics::CycleMetrics;

/// Lifecycle phase of a [`Monitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Not running. Initial phase of the process and terminal phase after shutdown.
    Stopped,
    /// Built: state loaded, configuration validated, sinks connected.
    Starting,
    /// The scheduler is driving cycles.
    Running,
    /// Shutdown requested, waiting for in-flight work.
    Stopping,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Stopped => "stopped",
            Phase::Starting => "starting",
            Phase::Running => "running",
            Phase::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// What one poll cycle did.
#[derive(Debug, Default)]
pub struct CycleReport {
    /// The delivered event, or `None` when the cycle was skipped because the
    /// data source failed.
    pub event: Option<ChangeEvent>,
    /// Recoverable errors raised during the cycle.
    pub errors: Vec<MonitorError>,
}

impl CycleReport {
    /// Whether the cycle observed a new record.
    pub fn changed(&self) -> bool {
        self.event.as_ref().is_some_and(|e| e.changed)
    }

    /// Whether the cycle was skipped because the fetch failed.
    pub fn is_skipped(&self) -> bool {
        self.event.is_none()
    }

    /// Whether the cycle ran without any recoverable error.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

struct MonitorInner {
    source: Arc<dyn DataSource>,
    measurement: String,
    fetch_timeout: Duration,
    detector: tokio::sync::Mutex<ChangeDetector>,
    notifier: Notifier,
    scheduler: Scheduler,
    phase: Mutex<Phase>,
    stopped: watch::Sender<bool>,
    #[cfg(feature = "metrics")]
    metrics: Option<CycleMetrics>,
}

/// The change monitor: polls, detects changes, persists, and notifies.
///
/// Cheap to clone; clones share the same state. Polling ends when the last
/// handle is dropped, but only [`shutdown`](Self::shutdown) flushes the
/// durable state and closes the push sink.
///
/// # Examples
///
/// ```rust
/// use pollwatch::prelude::*;
/// use pollwatch::notify::BroadcastSink;
/// use pollwatch::record::Record;
/// use pollwatch::sources::MemorySource;
/// use pollwatch::store::MemoryStateStore;
/// use std::time::Duration;
///
/// # async fn example() -> Result<()> {
/// let source = MemorySource::new();
/// source.push_record(Record::new().with_field("temp", 21.5));
///
/// let monitor = Monitor::builder()
///     .with_source(source)
///     .with_sink(BroadcastSink::default())
///     .with_store(MemoryStateStore::new())
///     .with_measurement("temperature")
///     .with_topic("sensors/temperature")
///     .with_interval(Duration::from_secs(5))
///     .build()?;
///
/// let report = monitor.run_cycle().await;
/// assert!(report.changed());
/// assert!(monitor.latest().changed);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Monitor {
    inner: Arc<MonitorInner>,
}

impl Monitor {
    /// Create a new builder for constructing a monitor.
    pub fn builder() -> MonitorBuilder {
        MonitorBuilder::new()
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        *self.inner.phase.lock()
    }

    /// A handle to the pull cache, for the query endpoint.
    pub fn pull_cache(&self) -> PullCache {
        self.inner.notifier.cache().clone()
    }

    /// The most recently delivered event.
    pub fn latest(&self) -> Arc<ChangeEvent> {
        self.inner.notifier.cache().get()
    }

    /// A copy of the current observation state.
    pub async fn state(&self) -> ObservationState {
        self.inner.detector.lock().await.state().clone()
    }

    /// Number of ticks dropped because a cycle was still running.
    pub fn skipped_ticks(&self) -> u64 {
        self.inner.scheduler.skipped_ticks()
    }

    /// Run exactly one fetch → compare → persist → notify cycle.
    ///
    /// Never fails: recoverable errors are logged and collected in the report.
    /// A failed or timed-out fetch skips the rest of the cycle, leaving the
    /// state and the pull cache as they were.
    pub async fn run_cycle(&self) -> CycleReport {
        #[cfg(feature = "metrics")]
        let started = std::time::Instant::now();

        let report = self.cycle().await;

        #[cfg(feature = "metrics")]
        self.record_metrics(started, &report).await;

        report
    }

    #[cfg(feature = "metrics")]
    async fn record_metrics(&self, started: std::time::Instant, report: &CycleReport) {
        if let Some(metrics) = &self.inner.metrics {
            let last_change = self.inner.detector.lock().await.state().last_change_time;
            metrics.record_cycle(started.elapsed(), report, last_change);
        }
    }

    async fn cycle(&self) -> CycleReport {
        let inner = &self.inner;
        let mut report = CycleReport::default();

        let fetched = match tokio::time::timeout(
            inner.fetch_timeout,
            inner.source.fetch_latest(&inner.measurement),
        )
        .await
        {
            Ok(Ok(fetched)) => fetched,
            Ok(Err(e)) => {
                warn!(
                    source = %inner.source.name(),
                    measurement = %inner.measurement,
                    error = %e,
                    "Fetch failed, skipping cycle"
                );
                report.errors.push(e);
                return report;
            }
            Err(_) => {
                warn!(
                    source = %inner.source.name(),
                    measurement = %inner.measurement,
                    timeout = ?inner.fetch_timeout,
                    "Fetch timed out, skipping cycle"
                );
                report.errors.push(MonitorError::Timeout {
                    operation: "fetch",
                    after: inner.fetch_timeout,
                });
                return report;
            }
        };

        let evaluation = inner.detector.lock().await.evaluate(fetched).await;
        if let Some(e) = evaluation.persist_error {
            report.errors.push(e);
        }

        if let Err(e) = inner.notifier.deliver(&evaluation.event).await {
            report.errors.push(e);
        }

        debug!(
            changed = evaluation.event.changed,
            errors = report.errors.len(),
            "Cycle complete"
        );
        report.event = Some(evaluation.event);
        report
    }

    /// Start the scheduler. The first cycle runs immediately.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error unless the monitor is in [`Phase::Starting`].
    pub fn start(&self) -> Result<()> {
        {
            let mut phase = self.inner.phase.lock();
            if *phase != Phase::Starting {
                return Err(MonitorError::Other(format!(
                    "cannot start a monitor that is {}",
                    *phase
                )));
            }
            *phase = Phase::Running;
        }

        // Cycles hold a weak handle: dropping the last Monitor drops the
        // scheduler, which stops it.
        let weak = Arc::downgrade(&self.inner);
        let started = self.inner.scheduler.start(move || {
            let inner = weak.upgrade();
            async move {
                if let Some(inner) = inner {
                    Monitor { inner }.run_cycle().await;
                }
            }
        });

        if let Err(e) = started {
            *self.inner.phase.lock() = Phase::Starting;
            return Err(e);
        }

        info!(
            measurement = %self.inner.measurement,
            interval = ?self.inner.scheduler.interval(),
            "Monitor running"
        );
        Ok(())
    }

    /// Stop polling and release resources.
    ///
    /// Stops the scheduler, waits for an in-flight cycle to finish, flushes the
    /// durable state one final time, and closes the push sink. Idempotent: a
    /// call made while another shutdown is in progress waits for it to reach
    /// [`Phase::Stopped`].
    ///
    /// # Errors
    ///
    /// Returns the first error from the final flush or from closing the sink.
    /// Both are attempted regardless. Only the call that performed the
    /// shutdown sees them.
    pub async fn shutdown(&self) -> Result<()> {
        let in_progress = {
            let mut phase = self.inner.phase.lock();
            match *phase {
                Phase::Stopped => return Ok(()),
                Phase::Stopping => true,
                Phase::Starting | Phase::Running => {
                    *phase = Phase::Stopping;
                    false
                }
            }
        };
        if in_progress {
            let mut stopped = self.inner.stopped.subscribe();
            let _ = stopped.wait_for(|done| *done).await;
            return Ok(());
        }
        info!("Stopping monitor");

        self.inner.scheduler.stop();
        self.inner.scheduler.join().await;

        let flushed = self.inner.detector.lock().await.flush().await;
        if let Err(e) = &flushed {
            warn!(error = %e, "Final state flush failed");
        }

        let closed = self.inner.notifier.close().await;
        if let Err(e) = &closed {
            warn!(error = %e, "Failed to close push sink");
        }

        *self.inner.phase.lock() = Phase::Stopped;
        self.inner.stopped.send_replace(true);
        info!("Monitor stopped");
        flushed.and(closed)
    }
}

/// Builder for constructing a [`Monitor`].
///
/// Source, sink, store, measurement, topic, and interval are required.
pub struct MonitorBuilder {
    source: Option<Arc<dyn DataSource>>,
    sink: Option<Arc<dyn PushSink>>,
    store: Option<Arc<dyn StateStore>>,
    measurement: Option<String>,
    topic: Option<String>,
    interval: Option<Duration>,
    fetch_timeout: Duration,
    publish_timeout: Duration,
    clock: Option<Clock>,
    #[cfg(feature = "metrics")]
    metrics: Option<CycleMetrics>,
}

impl MonitorBuilder {
    /// Create a new builder with default timeouts (5 seconds each).
    pub fn new() -> Self {
        Self {
            source: None,
            sink: None,
            store: None,
            measurement: None,
            topic: None,
            interval: None,
            fetch_timeout: Duration::from_secs(5),
            publish_timeout: Duration::from_secs(5),
            clock: None,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// Set the data source to poll.
    pub fn with_source<S: DataSource + 'static>(self, source: S) -> Self {
        self.with_shared_source(Arc::new(source))
    }

    /// Set an already shared data source.
    pub fn with_shared_source(mut self, source: Arc<dyn DataSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the push sink.
    pub fn with_sink<P: PushSink + 'static>(self, sink: P) -> Self {
        self.with_shared_sink(Arc::new(sink))
    }

    /// Set an already shared push sink.
    pub fn with_shared_sink(mut self, sink: Arc<dyn PushSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Set the durable state store.
    pub fn with_store<S: StateStore + 'static>(mut self, store: S) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Set the measurement to watch.
    pub fn with_measurement(mut self, measurement: impl Into<String>) -> Self {
        self.measurement = Some(measurement.into());
        self
    }

    /// Set the push topic.
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Set the poll interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Bound every fetch by `timeout`.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Bound every publish by `timeout`.
    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Stamp changes with `clock` instead of the system time.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Enable OpenTelemetry metrics collection.
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, meter: opentelemetry::metrics::Meter) -> Self {
        self.metrics = Some(CycleMetrics::new(meter));
        self
    }

    /// Validate the settings, load the durable state, and build the monitor.
    ///
    /// The monitor is returned in [`Phase::Starting`]; call
    /// [`Monitor::start`] to begin polling.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a required setting is missing, the
    /// interval or a timeout is zero, or the measurement or topic is empty.
    pub fn build(self) -> Result<Monitor> {
        let source = self
            .source
            .ok_or_else(|| MonitorError::Config("a data source is required".to_string()))?;
        let sink = self
            .sink
            .ok_or_else(|| MonitorError::Config("a push sink is required".to_string()))?;
        let store = self
            .store
            .ok_or_else(|| MonitorError::Config("a state store is required".to_string()))?;
        let measurement = self
            .measurement
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| MonitorError::Config("a measurement is required".to_string()))?;
        let topic = self
            .topic
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| MonitorError::Config("a push topic is required".to_string()))?;
        let interval = self
            .interval
            .ok_or_else(|| MonitorError::Config("a poll interval is required".to_string()))?;
        if self.fetch_timeout.is_zero() || self.publish_timeout.is_zero() {
            return Err(MonitorError::Config(
                "fetch and publish timeouts must be greater than zero".to_string(),
            ));
        }

        #[cfg(feature = "metrics")]
        let scheduler = match &self.metrics {
            Some(metrics) => {
                let metrics = metrics.clone();
                Scheduler::new(interval)?
                    .with_skip_hook(Arc::new(move || metrics.record_skipped_tick()))
            }
            None => Scheduler::new(interval)?,
        };
        #[cfg(not(feature = "metrics"))]
        let scheduler = Scheduler::new(interval)?;

        let mut detector = ChangeDetector::load(store);
        if let Some(clock) = self.clock {
            detector = detector.with_clock(clock);
        }

        let notifier = Notifier::new(sink, topic, PullCache::new(), self.publish_timeout);

        debug!(source = %source.name(), measurement = %measurement, "Monitor built");
        Ok(Monitor {
            inner: Arc::new(MonitorInner {
                source,
                measurement,
                fetch_timeout: self.fetch_timeout,
                detector: tokio::sync::Mutex::new(detector),
                notifier,
                scheduler,
                phase: Mutex::new(Phase::Starting),
                stopped: watch::channel(false).0,
                #[cfg(feature = "metrics")]
                metrics: self.metrics,
            }),
        })
    }
}

impl Default for MonitorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
