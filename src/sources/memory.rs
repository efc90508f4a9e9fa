//! Scripted in-memory data source.

use super::DataSource;
use crate::error::{MonitorError, Result};
use crate::record::Record;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use std::time::Duration;

/// One scripted fetch outcome.
#[derive(Debug, Clone)]
enum Step {
    Row(Record),
    Empty,
    Fail(String),
}

#[derive(Default)]
struct Inner {
    script: Mutex<VecDeque<Step>>,
    delay: Mutex<Option<Duration>>,
    fetches: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Data source that replays a scripted sequence of fetch outcomes.
///
/// Each call to `fetch_latest` consumes one step. Once the script runs out,
/// fetches return an empty result. Clones share the same script.
///
/// # Examples
///
/// ```rust
/// use pollwatch::record::Record;
/// use pollwatch::sources::{DataSource, MemorySource};
///
/// # async fn example() {
/// let source = MemorySource::new();
/// source.push_record(Record::new().with_field("temp", 20));
/// source.push_empty();
///
/// assert!(source.fetch_latest("cpu").await.unwrap().is_some());
/// assert!(source.fetch_latest("cpu").await.unwrap().is_none());
/// # }
/// ```
#[derive(Clone, Default)]
pub struct MemorySource {
    inner: Arc<Inner>,
}

impl MemorySource {
    /// Create a source with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a source that replays `records` in order.
    pub fn from_records(records: impl IntoIterator<Item = Option<Record>>) -> Self {
        let source = Self::new();
        for record in records {
            match record {
                Some(record) => source.push_record(record),
                None => source.push_empty(),
            }
        }
        source
    }

    /// Queue a fetch that returns `record`.
    pub fn push_record(&self, record: Record) {
        self.script().push_back(Step::Row(record));
    }

    /// Queue a fetch that returns no rows.
    pub fn push_empty(&self) {
        self.script().push_back(Step::Empty);
    }

    /// Queue a fetch that fails with a data source error.
    pub fn push_error(&self, message: impl Into<String>) {
        self.script().push_back(Step::Fail(message.into()));
    }

    /// Delay every fetch by `delay` before answering.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.inner.delay.lock() = delay;
    }

    /// Number of fetches started so far.
    pub fn fetch_count(&self) -> usize {
        self.inner.fetches.load(Ordering::SeqCst)
    }

    /// Highest number of fetches that were running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    fn script(&self) -> MutexGuard<'_, VecDeque<Step>> {
        self.inner.script.lock()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DataSource for MemorySource {
    async fn fetch_latest(&self, _measurement: &str) -> Result<Option<Record>> {
        self.inner.fetches.fetch_add(1, Ordering::SeqCst);
        let running = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_in_flight.fetch_max(running, Ordering::SeqCst);
        let _guard = InFlight(&self.inner.in_flight);

        let delay = *self.inner.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let step = self.script().pop_front();
        match step {
            Some(Step::Row(record)) => Ok(Some(record)),
            Some(Step::Empty) | None => Ok(None),
            Some(Step::Fail(message)) => Err(MonitorError::DataSource(message)),
        }
    }

    fn name(&self) -> String {
        "memory".to_string()
    }
}
