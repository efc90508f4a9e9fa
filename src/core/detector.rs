//! Change detection over the single observation state.

use crate::error::MonitorError;
use crate::record::{ChangeEvent, ObservationState, Record};
use crate::store::StateStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Source of "now" for change timestamps.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Result of evaluating one fetched record.
#[derive(Debug)]
pub struct Evaluation {
    /// The event to deliver for this cycle.
    pub event: ChangeEvent,
    /// Set when the durable write failed. The in-memory state has still moved on.
    pub persist_error: Option<MonitorError>,
}

/// Compares fetched records against the last known one and owns the
/// observation state.
///
/// The state only changes when a fetched record differs from the last one
/// (the first record ever seen always counts as a change). An empty fetch
/// never touches it. Change timestamps never go backwards, even if the
/// clock does.
///
/// A failed durable write does not undo the observation: the detector stays
/// dirty and retries the write on every following evaluation until one
/// succeeds.
///
/// Durable writes run on Tokio's blocking pool, so evaluation must happen
/// inside a Tokio runtime.
pub struct ChangeDetector {
    state: ObservationState,
    store: Arc<dyn StateStore>,
    clock: Clock,
    dirty: bool,
}

impl ChangeDetector {
    /// Create a detector seeded with whatever `store` holds.
    ///
    /// A missing or unreadable slot starts the detector empty.
    pub fn load(store: Arc<dyn StateStore>) -> Self {
        let state = match store.load() {
            Ok(Some(state)) => {
                info!(store = %store.name(), "Loaded last known state");
                state
            }
            Ok(None) => {
                debug!(store = %store.name(), "No prior state, starting empty");
                ObservationState::default()
            }
            Err(e) => {
                warn!(store = %store.name(), error = %e, "Ignoring unreadable state, starting empty");
                ObservationState::default()
            }
        };

        Self {
            state,
            store,
            clock: Arc::new(Utc::now),
            dirty: false,
        }
    }

    /// Replace the clock used to stamp changes.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// The current observation state.
    pub fn state(&self) -> &ObservationState {
        &self.state
    }

    /// Whether the in-memory state is ahead of the durable slot.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Evaluate a freshly fetched record.
    pub async fn evaluate(&mut self, fetched: Option<Record>) -> Evaluation {
        let Some(record) = fetched else {
            debug!("Data source returned no rows, state unchanged");
            return self.unchanged().await;
        };

        if let Some(last) = &self.state.last_record {
            if last.same_as(&record) {
                debug!("Data has not changed");
                return self.unchanged().await;
            }
        }

        let now = (self.clock)();
        let at = match self.state.last_change_time {
            Some(previous) if previous > now => previous,
            _ => now,
        };

        self.state.last_record = Some(record.clone());
        self.state.last_change_time = Some(at);
        info!(last_change_time = %at, "Data has changed");

        let persist_error = self.persist().await.err();
        Evaluation {
            event: ChangeEvent::changed(at, record),
            persist_error,
        }
    }

    /// Write the state to the durable slot if it is ahead of it.
    ///
    /// # Errors
    ///
    /// Returns the store's persistence error; the detector stays dirty.
    pub async fn flush(&mut self) -> crate::error::Result<()> {
        if !self.dirty {
            return Ok(());
        }
        self.persist().await
    }

    async fn unchanged(&mut self) -> Evaluation {
        let persist_error = if self.dirty {
            debug!("Retrying lagging state write");
            self.persist().await.err()
        } else {
            None
        };

        Evaluation {
            event: ChangeEvent::unchanged(self.state.last_change_time),
            persist_error,
        }
    }

    async fn persist(&mut self) -> crate::error::Result<()> {
        let store = Arc::clone(&self.store);
        let state = self.state.clone();
        let saved = tokio::task::spawn_blocking(move || store.save(&state))
            .await
            .unwrap_or_else(|e| {
                Err(MonitorError::Persistence(format!("state write task failed: {}", e)))
            });

        match saved {
            Ok(()) => {
                if self.dirty {
                    info!(store = %self.store.name(), "Durable state caught up");
                }
                self.dirty = false;
                Ok(())
            }
            Err(e) => {
                warn!(
                    store = %self.store.name(),
                    error = %e,
                    "Failed to persist state, durable copy is lagging"
                );
                self.dirty = true;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStateStore;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    fn record(v: i64) -> Record {
        Record::new().with_field("v", v)
    }

    /// Clock that advances one second per reading.
    fn ticking_clock() -> Clock {
        let seconds = Arc::new(AtomicI64::new(0));
        Arc::new(move || {
            let s = seconds.fetch_add(1, Ordering::SeqCst);
            Utc.timestamp_opt(1_700_000_000 + s, 0).unwrap()
        })
    }

    #[tokio::test]
    async fn test_first_record_is_a_change() {
        let store = MemoryStateStore::new();
        let mut detector = ChangeDetector::load(Arc::new(store.clone()));

        let evaluation = detector.evaluate(Some(record(1))).await;
        assert!(evaluation.event.changed);
        assert_eq!(evaluation.event.record, Some(record(1)));
        assert!(evaluation.persist_error.is_none());
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_fetch_never_mutates() {
        let store = MemoryStateStore::new();
        let mut detector = ChangeDetector::load(Arc::new(store.clone()));

        let evaluation = detector.evaluate(None).await;
        assert!(!evaluation.event.changed);
        assert!(evaluation.event.last_change_time.is_none());
        assert!(detector.state().is_empty());

        detector.evaluate(Some(record(1))).await;
        let before = detector.state().clone();
        let evaluation = detector.evaluate(None).await;
        assert!(!evaluation.event.changed);
        assert_eq!(detector.state(), &before);
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn test_scenario_flags_and_timestamps() {
        let a = record(1);
        let b = record(2);
        let sequence = [
            Some(a.clone()),
            Some(a),
            Some(b.clone()),
            Some(b.clone()),
            None,
            Some(b),
        ];

        let mut detector =
            ChangeDetector::load(Arc::new(MemoryStateStore::new())).with_clock(ticking_clock());

        let mut flags = Vec::new();
        let mut times = Vec::new();
        for fetched in sequence {
            let evaluation = detector.evaluate(fetched).await;
            flags.push(evaluation.event.changed);
            times.push(evaluation.event.last_change_time);
        }

        assert_eq!(flags, vec![true, false, true, false, false, false]);
        assert_eq!(times[0], times[1]);
        assert_ne!(times[1], times[2]);
        assert!(times[2..].iter().all(|t| *t == times[2]));
    }

    #[tokio::test]
    async fn test_restored_state_suppresses_first_change() {
        let store = MemoryStateStore::with_state(ObservationState::with_record(record(7)));
        let mut detector = ChangeDetector::load(Arc::new(store));

        assert!(!detector.evaluate(Some(record(7))).await.event.changed);
        assert!(detector.evaluate(Some(record(8))).await.event.changed);
    }

    #[tokio::test]
    async fn test_clock_going_backwards_is_clamped() {
        let readings = Arc::new(AtomicI64::new(0));
        let clock: Clock = Arc::new(move || {
            // 100, then 50
            let n = readings.fetch_add(1, Ordering::SeqCst);
            Utc.timestamp_opt(if n == 0 { 100 } else { 50 }, 0).unwrap()
        });
        let mut detector =
            ChangeDetector::load(Arc::new(MemoryStateStore::new())).with_clock(clock);

        let first = detector.evaluate(Some(record(1))).await.event.last_change_time;
        let second = detector.evaluate(Some(record(2))).await.event.last_change_time;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_persistence_failure_keeps_observation_and_retries() {
        let store = MemoryStateStore::new();
        store.set_fail_saves(true);
        let mut detector = ChangeDetector::load(Arc::new(store.clone()));

        let evaluation = detector.evaluate(Some(record(1))).await;
        assert!(evaluation.event.changed);
        assert!(matches!(
            evaluation.persist_error,
            Some(MonitorError::Persistence(_))
        ));
        assert_eq!(detector.state().last_record, Some(record(1)));
        assert!(detector.is_dirty());

        // Still failing: unchanged cycle reports the lag again
        let evaluation = detector.evaluate(Some(record(1))).await;
        assert!(!evaluation.event.changed);
        assert!(evaluation.persist_error.is_some());

        store.set_fail_saves(false);
        let evaluation = detector.evaluate(None).await;
        assert!(evaluation.persist_error.is_none());
        assert!(!detector.is_dirty());
        assert_eq!(store.snapshot().unwrap().last_record, Some(record(1)));
    }

    #[tokio::test]
    async fn test_flush_only_writes_when_dirty() {
        let store = MemoryStateStore::new();
        let mut detector = ChangeDetector::load(Arc::new(store.clone()));

        detector.flush().await.unwrap();
        assert_eq!(store.save_count(), 0);

        store.set_fail_saves(true);
        detector.evaluate(Some(record(1))).await;
        store.set_fail_saves(false);

        detector.flush().await.unwrap();
        assert_eq!(store.save_count(), 1);
        assert!(!detector.is_dirty());
    }

    proptest! {
        #[test]
        fn prop_change_time_is_monotonic(
            steps in proptest::collection::vec(
                (proptest::option::of(0i64..4), 0i64..1_000),
                1..40,
            )
        ) {
            // Clock readings are random, so they can go backwards
            let readings: Vec<i64> = steps.iter().map(|(_, t)| *t).collect();
            let index = Arc::new(AtomicI64::new(0));
            let clock: Clock = Arc::new(move || {
                let i = index.fetch_add(1, Ordering::SeqCst) as usize;
                Utc.timestamp_opt(readings[i % readings.len()], 0).unwrap()
            });
            let mut detector =
                ChangeDetector::load(Arc::new(MemoryStateStore::new())).with_clock(clock);

            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            runtime.block_on(async move {
                let mut previous = None;
                for (value, _) in steps {
                    let before = detector.state().clone();
                    let fetched = value.map(record);
                    let evaluation = detector.evaluate(fetched.clone()).await;

                    let time = evaluation.event.last_change_time;
                    prop_assert!(time >= previous);
                    if !evaluation.event.changed {
                        prop_assert_eq!(detector.state(), &before);
                    }
                    if fetched.is_none() {
                        prop_assert!(!evaluation.event.changed);
                    }
                    previous = time;
                }
                Ok::<(), TestCaseError>(())
            })?;
        }
    }
}
