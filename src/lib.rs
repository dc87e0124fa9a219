//! batch-eval: concurrent, resumable batch evaluation of LLM agents.
//!
//! Tasks are read from a TSV file, dispatched to a pool of workers that call
//! a [`TaskExecutor`](executor::TaskExecutor), and every outcome is appended
//! to a JSONL ledger. Re-running a batch skips tasks the ledger already
//! answers.

// Core modules
pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod harness;
pub mod ledger;
pub mod llm;
pub mod scheduler;
pub mod tasks;

// Re-export commonly used types
pub use config::HarnessConfig;
pub use error::{ConfigError, ExecutorError, HarnessError, LedgerError, LlmError, TaskSourceError};
pub use executor::{RawOutcome, TaskExecutor};
pub use harness::{run_batch, BatchRunner, RunSummary};
pub use ledger::{Ledger, ResultRecord, ResumePolicy};
pub use tasks::Task;
