//! Harness configuration.
//!
//! All settings have defaults matching a typical evaluation run. Any of them
//! can be overridden from the environment with [`HarnessConfig::from_env`]
//! and then from the command line through the `with_*` builders.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::executor::LlmExecutorConfig;
use crate::ledger::{ledger_path, ResumePolicy};
use crate::scheduler::WorkerPoolConfig;

/// Configuration for one batch run.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Run name; selects the ledger file.
    pub run_name: String,
    /// Path to the TSV task file.
    pub tasks_file: PathBuf,
    /// Directory holding ledgers.
    pub output_dir: PathBuf,
    /// Number of concurrent workers.
    pub concurrency: usize,
    /// Model identifier, also recorded as the agent label.
    pub model_id: String,
    /// Optional OpenAI-compatible endpoint overriding OpenRouter.
    pub api_base: Option<String>,
    /// Maximum solver steps per task.
    pub max_steps: usize,
    /// Wall-clock limit per task.
    pub task_timeout: Duration,
    /// Which prior ledger entries count as done.
    pub resume_policy: ResumePolicy,
    /// How often progress is logged.
    pub progress_interval: Duration,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            run_name: String::new(),
            tasks_file: PathBuf::from("tasks.tsv"),
            output_dir: PathBuf::from("outputs"),
            concurrency: 8,
            model_id: "o1".to_string(),
            api_base: None,
            max_steps: 12,
            task_timeout: Duration::from_secs(1800), // 30 minutes
            resume_policy: ResumePolicy::default(),
            progress_interval: Duration::from_secs(30),
        }
    }
}

impl HarnessConfig {
    /// Creates a default configuration for `run_name`.
    pub fn new(run_name: impl Into<String>) -> Self {
        Self {
            run_name: run_name.into(),
            ..Default::default()
        }
    }

    /// Creates a configuration with environment overrides applied.
    ///
    /// Reads the following environment variables:
    /// - `HARNESS_CONCURRENCY`: Worker count (default: 8)
    /// - `HARNESS_MODEL_ID`: Model identifier (default: o1)
    /// - `HARNESS_OUTPUT_DIR`: Ledger directory (default: ./outputs)
    /// - `HARNESS_TASKS_FILE`: Task file (default: ./tasks.tsv)
    /// - `HARNESS_MAX_STEPS`: Solver step budget (default: 12)
    /// - `HARNESS_TASK_TIMEOUT_SECS`: Per-task timeout (default: 1800)
    /// - `HARNESS_RETRY_FAILED`: Re-run failed tasks (default: false)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(val) = lookup("HARNESS_CONCURRENCY") {
            config.concurrency = parse_env_value(&val, "HARNESS_CONCURRENCY")?;
        }

        if let Some(val) = lookup("HARNESS_MODEL_ID") {
            config.model_id = val;
        }

        if let Some(val) = lookup("HARNESS_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(val);
        }

        if let Some(val) = lookup("HARNESS_TASKS_FILE") {
            config.tasks_file = PathBuf::from(val);
        }

        if let Some(val) = lookup("HARNESS_MAX_STEPS") {
            config.max_steps = parse_env_value(&val, "HARNESS_MAX_STEPS")?;
        }

        if let Some(val) = lookup("HARNESS_TASK_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "HARNESS_TASK_TIMEOUT_SECS")?;
            config.task_timeout = Duration::from_secs(secs);
        }

        if let Some(val) = lookup("HARNESS_RETRY_FAILED") {
            if parse_env_bool(&val, "HARNESS_RETRY_FAILED")? {
                config.resume_policy = ResumePolicy::RetryFailed;
            }
        }

        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.run_name.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "run_name cannot be empty".to_string(),
            ));
        }

        if self.run_name.contains(['/', '\\']) {
            return Err(ConfigError::ValidationFailed(
                "run_name cannot contain path separators".to_string(),
            ));
        }

        if self.concurrency == 0 {
            return Err(ConfigError::ValidationFailed(
                "concurrency must be greater than 0".to_string(),
            ));
        }

        if self.max_steps == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_steps must be greater than 0".to_string(),
            ));
        }

        if self.task_timeout.as_secs() == 0 {
            return Err(ConfigError::ValidationFailed(
                "task_timeout must be greater than 0".to_string(),
            ));
        }

        if self.model_id.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "model_id cannot be empty".to_string(),
            ));
        }

        if self.progress_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "progress_interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Path of this run's ledger.
    pub fn ledger_path(&self) -> PathBuf {
        ledger_path(&self.output_dir, &self.run_name)
    }

    /// Worker pool settings derived from this configuration.
    pub fn pool_config(&self) -> WorkerPoolConfig {
        WorkerPoolConfig::new(self.concurrency).with_progress_interval(self.progress_interval)
    }

    /// LLM executor settings derived from this configuration.
    pub fn executor_config(&self) -> LlmExecutorConfig {
        LlmExecutorConfig::new(self.model_id.clone())
            .with_max_steps(self.max_steps)
            .with_task_timeout(self.task_timeout)
    }

    /// Builder method to set the run name.
    pub fn with_run_name(mut self, name: impl Into<String>) -> Self {
        self.run_name = name.into();
        self
    }

    /// Builder method to set the task file.
    pub fn with_tasks_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.tasks_file = path.into();
        self
    }

    /// Builder method to set the output directory.
    pub fn with_output_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_dir = path.into();
        self
    }

    /// Builder method to set the worker count.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Builder method to set the model identifier.
    pub fn with_model_id(mut self, model: impl Into<String>) -> Self {
        self.model_id = model.into();
        self
    }

    /// Builder method to set a custom API base URL.
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = Some(base.into());
        self
    }

    /// Builder method to set the solver step budget.
    pub fn with_max_steps(mut self, max: usize) -> Self {
        self.max_steps = max;
        self
    }

    /// Builder method to set the per-task timeout.
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    /// Builder method to set the resume policy.
    pub fn with_resume_policy(mut self, policy: ResumePolicy) -> Self {
        self.resume_policy = policy;
        self
    }

    /// Builder method to set the progress log interval.
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }
}

/// Parse an environment variable value into the target type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}
