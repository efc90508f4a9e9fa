//! Fixed-interval cycle scheduler with skip-if-busy reentrancy control.

use crate::error::{MonitorError, Result};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

/// Callback invoked whenever a tick is dropped because a cycle is still running.
pub type SkipHook = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Idle,
    Started,
    Stopped,
}

struct Shared {
    run_state: Mutex<RunState>,
    wake: Notify,
    busy: AtomicBool,
    cycles: AtomicU64,
    skipped: AtomicU64,
}

/// Resets the busy flag when a cycle finishes, even if it panicked.
struct BusyGuard(Arc<Shared>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.busy.store(false, Ordering::Release);
    }
}

/// Drives a cycle function at a fixed interval until stopped.
///
/// The first cycle runs immediately on [`start`](Self::start). Cycles never
/// overlap: a tick that fires while the previous cycle is still running is
/// dropped and logged. [`stop`](Self::stop) prevents any further cycle from
/// starting but lets one already in flight finish; [`join`](Self::join)
/// waits for it.
///
/// # Examples
///
/// ```rust,no_run
/// use pollwatch::core::Scheduler;
/// use std::time::Duration;
///
/// # async fn example() -> pollwatch::error::Result<()> {
/// let scheduler = Scheduler::new(Duration::from_secs(10))?;
/// scheduler.start(|| async {
///     println!("poll");
/// })?;
///
/// // Later
/// scheduler.stop();
/// scheduler.join().await;
/// # Ok(())
/// # }
/// ```
pub struct Scheduler {
    interval: Duration,
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
    on_skip: Option<SkipHook>,
}

impl Scheduler {
    /// Create a scheduler firing every `interval`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `interval` is zero.
    pub fn new(interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(MonitorError::Config(
                "poll interval must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            interval,
            shared: Arc::new(Shared {
                run_state: Mutex::new(RunState::Idle),
                wake: Notify::new(),
                busy: AtomicBool::new(false),
                cycles: AtomicU64::new(0),
                skipped: AtomicU64::new(0),
            }),
            task: Mutex::new(None),
            on_skip: None,
        })
    }

    /// Create a scheduler from an interval in milliseconds.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `millis` is zero or negative.
    pub fn from_millis(millis: i64) -> Result<Self> {
        if millis <= 0 {
            return Err(MonitorError::Config(format!(
                "poll interval must be a positive number of milliseconds, got {}",
                millis
            )));
        }
        Self::new(Duration::from_millis(millis as u64))
    }

    /// Call `hook` every time a tick is skipped.
    pub fn with_skip_hook(mut self, hook: SkipHook) -> Self {
        self.on_skip = Some(hook);
        self
    }

    /// The configured interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start invoking `cycle`: once now, then every interval.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the scheduler was already started or stopped.
    pub fn start<F, Fut>(&self, cycle: F) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        {
            let mut state = self.shared.run_state.lock();
            match *state {
                RunState::Idle => *state = RunState::Started,
                RunState::Started => {
                    return Err(MonitorError::Other("scheduler already started".to_string()));
                }
                RunState::Stopped => {
                    return Err(MonitorError::Other("scheduler has been stopped".to_string()));
                }
            }
        }

        let shared = Arc::clone(&self.shared);
        let interval = self.interval;
        let on_skip = self.on_skip.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut in_flight: Option<JoinHandle<()>> = None;

            loop {
                tokio::select! {
                    _ = shared.wake.notified() => {}
                    _ = ticker.tick() => {}
                }

                {
                    // Holding the lock while launching means a cycle either
                    // starts before stop() returns or not at all.
                    let state = shared.run_state.lock();
                    if *state == RunState::Stopped {
                        break;
                    }

                    if shared.busy.swap(true, Ordering::AcqRel) {
                        let skipped = shared.skipped.fetch_add(1, Ordering::Relaxed) + 1;
                        warn!(skipped, "Previous cycle still running, skipping tick");
                        if let Some(hook) = &on_skip {
                            hook();
                        }
                        continue;
                    }

                    shared.cycles.fetch_add(1, Ordering::Relaxed);
                    let guard = BusyGuard(Arc::clone(&shared));
                    let fut = cycle();
                    in_flight = Some(tokio::spawn(async move {
                        let _guard = guard;
                        fut.await;
                    }));
                }
            }

            if let Some(handle) = in_flight {
                if let Err(e) = handle.await {
                    error!(error = %e, "Poll cycle task failed");
                }
            }
            debug!("Scheduler stopped");
        });

        *self.task.lock() = Some(handle);
        Ok(())
    }

    /// Stop scheduling cycles. Idempotent.
    ///
    /// Once this returns no new cycle will start. A cycle already running is
    /// not interrupted.
    pub fn stop(&self) {
        {
            let mut state = self.shared.run_state.lock();
            if *state == RunState::Stopped {
                return;
            }
            *state = RunState::Stopped;
        }
        self.shared.wake.notify_one();
    }

    /// Wait until the scheduler loop and any in-flight cycle have finished.
    ///
    /// Returns immediately if the scheduler was never started or has already
    /// been joined.
    pub async fn join(&self) {
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Scheduler task failed");
            }
        }
    }

    /// Whether [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        *self.shared.run_state.lock() == RunState::Stopped
    }

    /// Whether a cycle is currently running.
    pub fn is_busy(&self) -> bool {
        self.shared.busy.load(Ordering::Acquire)
    }

    /// Number of cycles started so far.
    pub fn cycles_started(&self) -> u64 {
        self.shared.cycles.load(Ordering::Relaxed)
    }

    /// Number of ticks dropped because a cycle was still running.
    pub fn skipped_ticks(&self) -> u64 {
        self.shared.skipped.load(Ordering::Relaxed)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
