//! Fixed-size pool of workers that drain a [`WorkQueue`] into the ledger.
//!
//! Each worker runs as an independent tokio task. For every task pulled from
//! the queue it calls the injected [`TaskExecutor`], turns the outcome into a
//! [`ResultRecord`](crate::ledger::ResultRecord) and appends it before taking
//! the next one.
//!
//! # Features
//!
//! - Configurable number of workers
//! - Executor errors and panics become failed records
//! - Graceful shutdown with broadcast channel
//! - Pool statistics tracking

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::progress::{ProgressCounters, ProgressMonitor};
use super::queue::WorkQueue;
use crate::error::ExecutorError;
use crate::executor::{MarkerScan, ResultAggregator, TaskExecutor};
use crate::ledger::Ledger;
use crate::tasks::Task;

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool was configured with no workers.
    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),

    /// Some results could not be appended to the ledger.
    #[error("{failed} result(s) could not be persisted, last error: {last_error}")]
    Persistence { failed: u64, last_error: String },
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks to spawn.
    pub num_workers: usize,
    /// How often the progress monitor logs.
    pub progress_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 8,
            progress_interval: Duration::from_secs(30),
        }
    }
}

impl WorkerPoolConfig {
    /// Creates a new configuration with the specified number of workers.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    /// Sets the progress log interval.
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }
}

/// Statistics for one pool run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoolStats {
    /// Number of workers spawned.
    pub num_workers: usize,
    /// Tasks handed to the pool.
    pub total: usize,
    /// Tasks recorded with an output.
    pub completed: u64,
    /// Tasks recorded with an error.
    pub failed: u64,
    /// Tasks whose record could not be appended.
    pub persist_failed: u64,
    /// Tasks never dispatched because of a shutdown request.
    pub cancelled: usize,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

impl PoolStats {
    /// Returns the total number of tasks processed (completed + failed).
    pub fn total_processed(&self) -> u64 {
        self.completed + self.failed
    }

    /// Returns the success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_processed();
        if total == 0 {
            return 0.0;
        }
        (self.completed as f64 / total as f64) * 100.0
    }
}

/// Shared state for tracking pool statistics.
struct SharedPoolStats {
    completed: AtomicU64,
    failed: AtomicU64,
    persist_failed: AtomicU64,
    last_persist_error: Mutex<Option<String>>,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            persist_failed: AtomicU64::new(0),
            last_persist_error: Mutex::new(None),
        }
    }

    fn record_outcome(&self, success: bool) {
        if success {
            self.completed.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn record_persist_failure(&self, message: String) {
        self.persist_failed.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_persist_error.lock() {
            *last = Some(message);
        }
    }

    fn last_persist_error(&self) -> String {
        self.last_persist_error
            .lock()
            .ok()
            .and_then(|last| last.clone())
            .unwrap_or_else(|| "unknown error".to_string())
    }
}

/// Handle used to stop a running pool from outside.
///
/// After [`ShutdownHandle::shutdown`] workers take no new tasks; tasks
/// already executing finish and are recorded.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: broadcast::Sender<()>,
    requested: Arc<AtomicBool>,
}

impl ShutdownHandle {
    /// Requests shutdown. Safe to call more than once.
    pub fn shutdown(&self) {
        self.requested.store(true, Ordering::SeqCst);
        // Ignore send error - no worker may be subscribed yet
        let _ = self.tx.send(());
    }

    /// Returns whether shutdown has been requested.
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Worker pool that drains a task list through an executor.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    ledger: Arc<Ledger>,
    scan: MarkerScan,
    shutdown: ShutdownHandle,
    counters: ProgressCounters,
}

impl WorkerPool {
    /// Creates a new worker pool appending to `ledger`.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidConfig` if `num_workers` is zero.
    pub fn new(config: WorkerPoolConfig, ledger: Arc<Ledger>) -> Result<Self, PoolError> {
        if config.num_workers == 0 {
            return Err(PoolError::InvalidConfig(
                "num_workers must be at least 1".to_string(),
            ));
        }
        if config.progress_interval.is_zero() {
            return Err(PoolError::InvalidConfig(
                "progress_interval must be greater than 0".to_string(),
            ));
        }

        // Buffer size of 1 is sufficient since we only send once
        let (tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            ledger,
            scan: MarkerScan::default(),
            shutdown: ShutdownHandle {
                tx,
                requested: Arc::new(AtomicBool::new(false)),
            },
            counters: ProgressCounters::new(),
        })
    }

    /// Replaces the marker scan used when building records.
    pub fn with_marker_scan(mut self, scan: MarkerScan) -> Self {
        self.scan = scan;
        self
    }

    /// Returns a handle that stops dispatch when triggered.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Returns the live progress counters.
    pub fn counters(&self) -> &ProgressCounters {
        &self.counters
    }

    /// Returns the number of workers in the pool.
    pub fn num_workers(&self) -> usize {
        self.config.num_workers
    }

    /// Runs every task through `executor` and waits for all workers.
    ///
    /// Returns once each dispatched task has a terminal record in the
    /// ledger. Individual task failures are data, not errors.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Persistence` if any record failed to append.
    pub async fn run(
        &self,
        tasks: Vec<Task>,
        executor: Arc<dyn TaskExecutor>,
    ) -> Result<PoolStats, PoolError> {
        let start = Instant::now();
        let total = tasks.len();
        let num_workers = self.config.num_workers.min(total.max(1));

        let queue = Arc::new(WorkQueue::new(tasks));
        let stats = Arc::new(SharedPoolStats::new());
        let aggregator =
            Arc::new(ResultAggregator::new(executor.label()).with_scan(self.scan.clone()));
        let monitor =
            ProgressMonitor::start(self.counters.clone(), total, self.config.progress_interval);

        info!(
            total = total,
            num_workers = num_workers,
            ledger = %self.ledger.path().display(),
            "Worker pool started"
        );

        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(num_workers);
        for i in 0..num_workers {
            let worker = Worker {
                id: format!("worker-{}", i),
                queue: Arc::clone(&queue),
                executor: Arc::clone(&executor),
                aggregator: Arc::clone(&aggregator),
                ledger: Arc::clone(&self.ledger),
                shutdown_rx: self.shutdown.tx.subscribe(),
                shutdown: self.shutdown.clone(),
                counters: self.counters.clone(),
                stats: Arc::clone(&stats),
            };
            handles.push(tokio::spawn(worker.run()));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task terminated abnormally");
            }
        }
        monitor.stop().await;

        let pool_stats = PoolStats {
            num_workers,
            total,
            completed: stats.completed.load(Ordering::SeqCst),
            failed: stats.failed.load(Ordering::SeqCst),
            persist_failed: stats.persist_failed.load(Ordering::SeqCst),
            cancelled: queue.len().await,
            elapsed: start.elapsed(),
        };

        info!(
            completed = pool_stats.completed,
            failed = pool_stats.failed,
            persist_failed = pool_stats.persist_failed,
            cancelled = pool_stats.cancelled,
            elapsed_secs = pool_stats.elapsed.as_secs(),
            "Worker pool finished"
        );

        if pool_stats.persist_failed > 0 {
            return Err(PoolError::Persistence {
                failed: pool_stats.persist_failed,
                last_error: stats.last_persist_error(),
            });
        }

        Ok(pool_stats)
    }
}

/// A single worker pulling tasks until the queue is empty or shut down.
struct Worker {
    id: String,
    queue: Arc<WorkQueue>,
    executor: Arc<dyn TaskExecutor>,
    aggregator: Arc<ResultAggregator>,
    ledger: Arc<Ledger>,
    shutdown_rx: broadcast::Receiver<()>,
    shutdown: ShutdownHandle,
    counters: ProgressCounters,
    stats: Arc<SharedPoolStats>,
}

impl Worker {
    async fn run(mut self) {
        debug!(worker_id = %self.id, "Worker started");

        loop {
            if self.shutdown_received() {
                info!(worker_id = %self.id, "Worker received shutdown signal");
                break;
            }

            let Some(task) = self.queue.dequeue().await else {
                break;
            };
            self.process_task(task).await;
        }

        debug!(worker_id = %self.id, "Worker stopped");
    }

    /// Non-blocking check of the shutdown channel and flag.
    fn shutdown_received(&mut self) -> bool {
        match self.shutdown_rx.try_recv() {
            Ok(()) | Err(broadcast::error::TryRecvError::Lagged(_)) => true,
            Err(broadcast::error::TryRecvError::Closed)
            | Err(broadcast::error::TryRecvError::Empty) => self.shutdown.is_requested(),
        }
    }

    async fn process_task(&self, task: Task) {
        debug!(worker_id = %self.id, task_id = %task.id, "Processing task");

        let augmented = std::panic::catch_unwind(AssertUnwindSafe(|| self.executor.augment(&task)))
            .unwrap_or_else(|_| task.payload.clone());

        self.counters.in_flight.fetch_add(1, Ordering::Relaxed);
        let started_at = Utc::now();
        let outcome = match AssertUnwindSafe(self.executor.execute(&task))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => Err(ExecutorError::Panicked(panic_message(panic.as_ref()))),
        };
        let ended_at = Utc::now();
        self.counters.in_flight.fetch_sub(1, Ordering::Relaxed);

        if let Err(e) = &outcome {
            warn!(worker_id = %self.id, task_id = %task.id, error = %e, "Task failed");
        }

        let task_id = task.id.clone();
        let record = self
            .aggregator
            .to_result_record(task, augmented, outcome, started_at, ended_at);
        let success = record.is_success();

        match self.ledger.append(&record).await {
            Ok(()) => {
                self.stats.record_outcome(success);
                if success {
                    self.counters.completed.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                }
                debug!(
                    worker_id = %self.id,
                    task_id = %task_id,
                    success = success,
                    duration_ms = (ended_at - started_at).num_milliseconds(),
                    "Task recorded"
                );
            }
            Err(e) => {
                error!(
                    worker_id = %self.id,
                    task_id = %task_id,
                    error = %e,
                    "Failed to append result to ledger"
                );
                self.stats.record_persist_failure(e.to_string());
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
