//! Completion ledger: durable, append-only record of finished task outcomes.
//!
//! The ledger serves two purposes:
//!
//! - **Persistence**: each worker appends one JSON line per finished task
//! - **Resume**: at startup the whole ledger is read back and fed to
//!   [`tasks_remaining`] so completed work is not dispatched again
//!
//! # Usage
//!
//! ```rust,ignore
//! use batch_eval::ledger::{Ledger, ResumePolicy, tasks_remaining};
//!
//! let ledger = Ledger::for_run("outputs", "nightly");
//! let completed = ledger.load_all().await?;
//! let todo = tasks_remaining(&all_tasks, &completed, ResumePolicy::SkipAnswered);
//! ```

pub mod record;
pub mod resume;
pub mod store;
pub mod summary;

pub use record::{ResultRecord, TokenUsage};
pub use resume::{tasks_remaining, ResumePolicy};
pub use store::{ledger_path, Ledger, LEDGER_EXTENSION};
pub use summary::LedgerSummary;
