//! End-to-end batch run: load tasks, filter by the ledger, dispatch.
//!
//! [`BatchRunner`] owns the setup sequence. Every failure in it is fatal and
//! happens before the first task is dispatched; once the pool is running,
//! per-task failures are recorded as data.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::HarnessConfig;
use crate::error::HarnessError;
use crate::executor::TaskExecutor;
use crate::ledger::{ledger_path, tasks_remaining, Ledger, LedgerSummary, ResumePolicy};
use crate::scheduler::{ShutdownHandle, WorkerPool};
use crate::tasks::load_tasks;

/// Environment variables checked for the API credential, in order.
pub const API_KEY_ENV_VARS: [&str; 2] = ["OPENROUTER_API_KEY", "LITELLM_API_KEY"];

/// Outcome of one batch run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_name: String,
    pub ledger_path: PathBuf,
    pub resume_policy: ResumePolicy,
    /// Rows in the task file.
    pub total_tasks: usize,
    /// Rows skipped because the ledger already answers them.
    pub already_completed: usize,
    /// Rows handed to the pool.
    pub dispatched: usize,
    pub completed: u64,
    pub failed: u64,
    /// Rows left undispatched after a shutdown request.
    pub cancelled: usize,
    pub elapsed_secs: f64,
}

/// Ledger state for a run, as reported by `batch-eval status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub run_name: String,
    pub ledger_path: PathBuf,
    pub summary: LedgerSummary,
    /// Tasks still to run, when a task file was given.
    pub remaining: Option<usize>,
}

/// Runs one configured batch against an executor.
pub struct BatchRunner {
    config: HarnessConfig,
    ledger: Arc<Ledger>,
    pool: WorkerPool,
}

impl BatchRunner {
    /// Validates `config` and prepares the pool.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Config` or `HarnessError::Pool` for invalid
    /// settings.
    pub fn new(config: HarnessConfig) -> Result<Self, HarnessError> {
        config.validate()?;
        let ledger = Arc::new(Ledger::new(config.ledger_path()));
        let pool = WorkerPool::new(config.pool_config(), Arc::clone(&ledger))?;
        Ok(Self {
            config,
            ledger,
            pool,
        })
    }

    /// Handle that stops dispatch of further tasks.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.pool.shutdown_handle()
    }

    /// Returns the ledger this run appends to.
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Loads tasks, skips completed ones and runs the rest.
    ///
    /// # Errors
    ///
    /// Fails before dispatch if the task file is missing or malformed, or if
    /// the ledger directory cannot be created. Fails after the pool drains if
    /// any result could not be persisted.
    pub async fn run(&self, executor: Arc<dyn TaskExecutor>) -> Result<RunSummary, HarnessError> {
        let all_tasks = load_tasks(&self.config.tasks_file)?;
        self.ledger.prepare().await?;

        let prior = match self.ledger.load_all().await {
            Ok(records) => records,
            Err(e) => {
                warn!(
                    path = %self.ledger.path().display(),
                    error = %e,
                    "Could not read ledger, treating every task as pending"
                );
                Vec::new()
            }
        };

        let pending = tasks_remaining(&all_tasks, &prior, self.config.resume_policy);
        let already_completed = all_tasks.len() - pending.len();

        info!(
            run_name = %self.config.run_name,
            total = all_tasks.len(),
            already_completed = already_completed,
            pending = pending.len(),
            resume_policy = %self.config.resume_policy,
            "Resuming batch run"
        );

        let dispatched = pending.len();
        let stats = self.pool.run(pending, executor).await?;

        Ok(RunSummary {
            run_name: self.config.run_name.clone(),
            ledger_path: self.ledger.path().to_path_buf(),
            resume_policy: self.config.resume_policy,
            total_tasks: all_tasks.len(),
            already_completed,
            dispatched,
            completed: stats.completed,
            failed: stats.failed,
            cancelled: stats.cancelled,
            elapsed_secs: stats.elapsed.as_secs_f64(),
        })
    }
}

/// Convenience wrapper: build a [`BatchRunner`] and run it once.
pub async fn run_batch(
    config: HarnessConfig,
    executor: Arc<dyn TaskExecutor>,
) -> Result<RunSummary, HarnessError> {
    BatchRunner::new(config)?.run(executor).await
}

/// Summarizes the ledger for `run_name`, optionally against a task file.
pub async fn run_status(
    output_dir: &Path,
    run_name: &str,
    tasks_file: Option<&Path>,
    policy: ResumePolicy,
) -> Result<StatusReport, HarnessError> {
    let ledger = Ledger::new(ledger_path(output_dir, run_name));
    let records = ledger.load_all().await?;

    let remaining = match tasks_file {
        Some(path) => {
            let tasks = load_tasks(path)?;
            Some(tasks_remaining(&tasks, &records, policy).len())
        }
        None => None,
    };

    Ok(StatusReport {
        run_name: run_name.to_string(),
        ledger_path: ledger.path().to_path_buf(),
        summary: LedgerSummary::from_records(&records),
        remaining,
    })
}

/// Resolves the API credential from an explicit value or the environment.
///
/// # Errors
///
/// Returns `HarnessError::MissingCredential` if no non-empty key is found.
pub fn resolve_api_key(explicit: Option<String>) -> Result<String, HarnessError> {
    resolve_api_key_with(explicit, |key| std::env::var(key).ok())
}

/// Same as [`resolve_api_key`] with a custom variable source.
pub fn resolve_api_key_with<F>(explicit: Option<String>, lookup: F) -> Result<String, HarnessError>
where
    F: Fn(&str) -> Option<String>,
{
    explicit
        .into_iter()
        .chain(API_KEY_ENV_VARS.iter().filter_map(|var| lookup(var)))
        .map(|key| key.trim().to_string())
        .find(|key| !key.is_empty())
        .ok_or(HarnessError::MissingCredential)
}
