//! Error types for batch-eval operations.
//!
//! Defines error types for the major subsystems:
//! - Task source loading and format validation
//! - Completion ledger persistence
//! - Task execution (per-task, recorded as data)
//! - LLM API interactions
//! - Harness configuration and startup

use std::path::PathBuf;

use thiserror::Error;

use crate::ledger::TokenUsage;
use crate::scheduler::PoolError;

/// Errors that can occur while reading the task source.
#[derive(Debug, Error)]
pub enum TaskSourceError {
    #[error("Task file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid row at line {line}: expected 2 columns, found {columns}")]
    InvalidRow { line: usize, columns: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to create ledger directory: {0}")]
    DirectoryCreationFailed(String),
}

/// Errors raised by a task executor for a single task.
///
/// These never escape the worker pool; they are converted into failed
/// ledger records.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Task execution timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Executor panicked: {0}")]
    Panicked(String),

    #[error("Execution failed: {0}")]
    Failed(String),

    /// A failure that happened after tokens were already spent.
    #[error("{source}")]
    WithUsage {
        source: Box<ExecutorError>,
        usage: TokenUsage,
    },
}

impl ExecutorError {
    /// Attaches the tokens spent before the failure. Zero usage leaves the
    /// error unchanged.
    pub fn with_usage(self, usage: TokenUsage) -> Self {
        if usage == TokenUsage::default() {
            return self;
        }
        match self {
            Self::WithUsage { source, usage: mut spent } => {
                spent.accumulate(usage);
                Self::WithUsage { source, usage: spent }
            }
            other => Self::WithUsage {
                source: Box::new(other),
                usage,
            },
        }
    }

    /// Tokens spent before the failure, zero if none were reported.
    pub fn usage(&self) -> TokenUsage {
        match self {
            Self::WithUsage { usage, .. } => *usage,
            _ => TokenUsage::default(),
        }
    }

    /// The underlying failure, without attached usage.
    pub fn root(&self) -> &ExecutorError {
        match self {
            Self::WithUsage { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: set OPENROUTER_API_KEY or LITELLM_API_KEY")]
    MissingApiKey,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}

/// Errors that can occur while building the harness configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Setup-level errors that abort a run before any task is dispatched.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("Missing API credential: pass --api-key or set OPENROUTER_API_KEY / LITELLM_API_KEY")]
    MissingCredential,

    #[error("Task source error: {0}")]
    TaskSource(#[from] TaskSourceError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Worker pool error: {0}")]
    Pool(#[from] PoolError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_row_display() {
        let err = TaskSourceError::InvalidRow {
            line: 4,
            columns: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("line 4"));
        assert!(msg.contains("found 3"));
    }

    #[test]
    fn test_executor_error_from_llm() {
        let err: ExecutorError = LlmError::RateLimited("slow down".to_string()).into();
        assert!(matches!(err, ExecutorError::Llm(_)));
        assert!(err.to_string().contains("slow down"));
    }

    #[test]
    fn test_executor_error_carries_usage() {
        let err = ExecutorError::Timeout { seconds: 5 }.with_usage(TokenUsage::new(10, 2));
        assert_eq!(err.usage(), TokenUsage::new(10, 2));
        assert!(matches!(err.root(), ExecutorError::Timeout { seconds: 5 }));
        assert_eq!(err.to_string(), "Task execution timed out after 5 seconds");

        let err = err.with_usage(TokenUsage::new(1, 1));
        assert_eq!(err.usage(), TokenUsage::new(11, 3));

        let plain = ExecutorError::Failed("x".to_string()).with_usage(TokenUsage::default());
        assert!(matches!(plain, ExecutorError::Failed(_)));
        assert_eq!(plain.usage(), TokenUsage::default());
    }

    #[test]
    fn test_harness_error_wraps_task_source() {
        let err: HarnessError = TaskSourceError::NotFound(PathBuf::from("tasks.tsv")).into();
        assert!(err.to_string().contains("tasks.tsv"));
    }
}
