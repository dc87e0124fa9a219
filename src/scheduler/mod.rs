//! Concurrent dispatch of tasks to an executor.
//!
//! This module provides the in-process worker pool:
//!
//! - **WorkQueue**: pull-only queue filled once with the pending tasks
//! - **WorkerPool**: fixed set of workers that execute tasks and append results
//! - **ProgressMonitor**: periodic progress logging while the pool runs
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────────┐
//!                      │  WorkQueue   │
//!                      └──────┬───────┘
//!                             │
//!         ┌───────────────────┼───────────────────┐
//!         │                   │                   │
//!         ▼                   ▼                   ▼
//!    ┌─────────┐         ┌─────────┐         ┌─────────┐
//!    │ Worker 1│         │ Worker 2│         │ Worker N│
//!    └────┬────┘         └────┬────┘         └────┬────┘
//!         │                   │                   │
//!         └───────────────────┼───────────────────┘
//!                             ▼
//!                      ┌──────────────┐
//!                      │    Ledger    │
//!                      └──────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use batch_eval::scheduler::{WorkerPool, WorkerPoolConfig};
//! use batch_eval::ledger::Ledger;
//! use std::sync::Arc;
//!
//! let ledger = Arc::new(Ledger::for_run("outputs", "baseline"));
//! let pool = WorkerPool::new(WorkerPoolConfig::new(8), ledger)?;
//!
//! let shutdown = pool.shutdown_handle();
//! tokio::spawn(async move {
//!     let _ = tokio::signal::ctrl_c().await;
//!     shutdown.shutdown();
//! });
//!
//! let stats = pool.run(tasks, executor).await?;
//! ```

pub mod progress;
pub mod queue;
pub mod worker_pool;

pub use progress::{ProgressCounters, ProgressMonitor, ProgressSnapshot};
pub use queue::WorkQueue;
pub use worker_pool::{PoolError, PoolStats, ShutdownHandle, WorkerPool, WorkerPoolConfig};
