//! Poll cycle metrics using OpenTelemetry.

use crate::core::CycleReport;
use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use std::sync::Arc;
use std::time::Duration;

/// Metrics collector for poll cycles.
///
/// Tracks cycles by outcome, per-cycle errors, cycle latency, skipped ticks,
/// and how long ago the watched data last changed.
///
/// # Examples
///
/// ```rust,no_run
/// use pollwatch::metrics::CycleMetrics;
/// use opentelemetry::global;
///
/// let metrics = CycleMetrics::new(global::meter("pollwatch"));
/// metrics.record_skipped_tick();
/// ```
#[derive(Clone)]
pub struct CycleMetrics {
    cycles: Counter<u64>,
    errors: Counter<u64>,
    skipped_ticks: Counter<u64>,
    cycle_duration: Histogram<f64>,
    data_age_seconds: Gauge<i64>,
    last_outcome: Arc<parking_lot::Mutex<Option<&'static str>>>,
}

impl CycleMetrics {
    /// Create a new metrics collector with the provided meter.
    pub fn new(meter: Meter) -> Self {
        let cycles = meter
            .u64_counter("pollwatch.cycle.count")
            .with_description("Poll cycles by outcome (changed, unchanged, skipped)")
            .build();

        let errors = meter
            .u64_counter("pollwatch.cycle.errors")
            .with_description("Recoverable errors raised during poll cycles")
            .build();

        let skipped_ticks = meter
            .u64_counter("pollwatch.scheduler.skipped_ticks")
            .with_description("Ticks dropped because the previous cycle was still running")
            .build();

        let cycle_duration = meter
            .f64_histogram("pollwatch.cycle.duration")
            .with_description("Duration of poll cycles in seconds")
            .with_unit("s")
            .build();

        let data_age_seconds = meter
            .i64_gauge("pollwatch.data.age")
            .with_description("Time since the watched data last changed in seconds")
            .with_unit("s")
            .build();

        Self {
            cycles,
            errors,
            skipped_ticks,
            cycle_duration,
            data_age_seconds,
            last_outcome: Arc::new(parking_lot::Mutex::new(None)),
        }
    }

    /// Record a finished cycle.
    ///
    /// # Arguments
    ///
    /// * `elapsed` - How long the cycle took
    /// * `report` - What the cycle did
    /// * `last_change` - The observation's last change time after the cycle
    pub fn record_cycle(
        &self,
        elapsed: Duration,
        report: &CycleReport,
        last_change: Option<DateTime<Utc>>,
    ) {
        let outcome = outcome(report);
        self.cycles.add(1, &[KeyValue::new("outcome", outcome)]);
        self.cycle_duration.record(elapsed.as_secs_f64(), &[]);

        for error in &report.errors {
            self.errors
                .add(1, &[KeyValue::new("kind", error_kind(error))]);
        }

        if let Some(at) = last_change {
            let age = (Utc::now() - at).num_seconds().max(0);
            self.data_age_seconds.record(age, &[]);
        }

        *self.last_outcome.lock() = Some(outcome);
    }

    /// Record a tick dropped by the scheduler.
    pub fn record_skipped_tick(&self) {
        self.skipped_ticks.add(1, &[]);
    }

    /// Outcome label of the most recently recorded cycle.
    pub fn last_outcome(&self) -> Option<&'static str> {
        *self.last_outcome.lock()
    }
}

fn outcome(report: &CycleReport) -> &'static str {
    if report.is_skipped() {
        "skipped"
    } else if report.changed() {
        "changed"
    } else {
        "unchanged"
    }
}

fn error_kind(error: &crate::error::MonitorError) -> &'static str {
    use crate::error::MonitorError;
    match error {
        MonitorError::Config(_) => "config",
        MonitorError::DataSource(_) => "data_source",
        MonitorError::Timeout { .. } => "timeout",
        MonitorError::Persistence(_) => "persistence",
        MonitorError::Delivery(_) => "delivery",
        MonitorError::Serialization(_) => "serialization",
        MonitorError::Io(_) => "io",
        MonitorError::Other(_) => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MonitorError;
    use crate::record::{ChangeEvent, Record};
    use opentelemetry::global;

    #[test]
    fn test_outcomes() {
        let metrics = CycleMetrics::new(global::meter("test"));

        let skipped = CycleReport {
            event: None,
            errors: vec![MonitorError::DataSource("down".to_string())],
        };
        metrics.record_cycle(Duration::from_millis(3), &skipped, None);
        assert_eq!(metrics.last_outcome(), Some("skipped"));

        let changed = CycleReport {
            event: Some(ChangeEvent::changed(Utc::now(), Record::new().with_field("v", 1))),
            errors: Vec::new(),
        };
        metrics.record_cycle(Duration::from_millis(3), &changed, Some(Utc::now()));
        assert_eq!(metrics.last_outcome(), Some("changed"));

        let unchanged = CycleReport {
            event: Some(ChangeEvent::unchanged(None)),
            errors: Vec::new(),
        };
        metrics.record_cycle(Duration::from_millis(1), &unchanged, None);
        assert_eq!(metrics.last_outcome(), Some("unchanged"));
    }

    #[test]
    fn test_metrics_clone_shares_state() {
        let metrics = CycleMetrics::new(global::meter("test"));
        let clone = metrics.clone();

        clone.record_skipped_tick();
        clone.record_cycle(Duration::ZERO, &CycleReport::default(), None);
        assert_eq!(metrics.last_outcome(), Some("skipped"));
    }
}
