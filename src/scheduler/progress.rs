//! Background progress monitor for batch runs.
//!
//! Periodically logs how many tasks have finished so operators can follow
//! long runs without reading per-task log lines.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

/// Snapshot of the progress counters at a point in time.
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    /// Tasks whose record was appended with an output.
    pub completed: usize,
    /// Tasks whose record was appended with an error.
    pub failed: usize,
    /// Tasks currently inside the executor.
    pub in_flight: usize,
    /// Wall-clock elapsed time since the monitor started.
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    /// Tasks with a terminal outcome.
    pub fn finished(&self) -> usize {
        self.completed + self.failed
    }
}

/// Shared atomic counters, cloned into every worker.
#[derive(Debug, Clone)]
pub struct ProgressCounters {
    /// Successful tasks.
    pub completed: Arc<AtomicUsize>,
    /// Failed tasks.
    pub failed: Arc<AtomicUsize>,
    /// Tasks being executed right now.
    pub in_flight: Arc<AtomicUsize>,
}

impl Default for ProgressCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressCounters {
    /// Create a new set of zeroed counters.
    pub fn new() -> Self {
        Self {
            completed: Arc::new(AtomicUsize::new(0)),
            failed: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Take a snapshot of the current counter values.
    pub fn snapshot(&self, start: Instant) -> ProgressSnapshot {
        ProgressSnapshot {
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            elapsed: start.elapsed(),
        }
    }
}

/// A background task that logs progress every `interval`.
///
/// Call [`ProgressMonitor::stop`] to cancel; dropping the monitor also
/// stops it at the next tick.
pub struct ProgressMonitor {
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressMonitor {
    /// Start a monitor for a run of `total` tasks.
    pub fn start(counters: ProgressCounters, total: usize, interval: Duration) -> Self {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let flag = stop_flag.clone();
        let start = Instant::now();

        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await; // skip the immediate first tick

            loop {
                tick.tick().await;
                if flag.load(Ordering::Relaxed) {
                    break;
                }

                let snap = counters.snapshot(start);
                let pct = if total > 0 {
                    (snap.finished() as f64 / total as f64 * 100.0).min(100.0)
                } else {
                    0.0
                };
                let elapsed_secs = snap.elapsed.as_secs_f64();
                let tasks_per_min = if elapsed_secs > 0.0 {
                    snap.finished() as f64 / elapsed_secs * 60.0
                } else {
                    0.0
                };

                tracing::info!(
                    completed = snap.completed,
                    failed = snap.failed,
                    in_flight = snap.in_flight,
                    total = total,
                    progress_pct = format!("{:.1}%", pct),
                    elapsed_secs = snap.elapsed.as_secs(),
                    tasks_per_min = format!("{:.2}", tasks_per_min),
                    "Batch progress"
                );
            }
        });

        Self {
            stop_flag,
            handle: Some(handle),
        }
    }

    /// Signal the monitor to stop and wait for it.
    pub async fn stop(mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Drop for ProgressMonitor {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
    }
}
