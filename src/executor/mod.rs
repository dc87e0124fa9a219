//! Task executor contract and result aggregation.
//!
//! The worker pool is agnostic to how an answer is produced: anything that
//! implements [`TaskExecutor`] can be injected. [`LlmExecutor`] is the
//! default, LLM-backed implementation used by the CLI.

pub mod aggregate;
pub mod llm;

pub use aggregate::{MarkerScan, ResultAggregator, PARSE_ERROR_MARKER, STEP_LIMIT_MARKER};
pub use llm::{LlmExecutor, LlmExecutorConfig, AUGMENTATION_PREFIX};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ExecutorError;
use crate::ledger::TokenUsage;
use crate::tasks::Task;

/// Token counters reported by one internal sub-agent of an executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentUsage {
    /// Name of the sub-agent (e.g. "solver").
    pub agent: String,
    /// Tokens consumed by that sub-agent.
    pub usage: TokenUsage,
}

impl AgentUsage {
    /// Creates a usage entry for a named sub-agent.
    pub fn new(agent: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            agent: agent.into(),
            usage,
        }
    }
}

/// What an executor returns for a task it finished.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawOutcome {
    /// Final textual output.
    pub output: String,
    /// Ordered, opaque trace lines.
    pub trace: Vec<String>,
    /// Per-sub-agent usage; may be empty.
    pub usage: Vec<AgentUsage>,
}

impl RawOutcome {
    /// Creates an outcome with no trace and no usage.
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ..Default::default()
        }
    }

    /// Sets the trace.
    pub fn with_trace(mut self, trace: Vec<String>) -> Self {
        self.trace = trace;
        self
    }

    /// Adds a sub-agent usage entry.
    pub fn with_usage(mut self, usage: AgentUsage) -> Self {
        self.usage.push(usage);
        self
    }

    /// Sums usage across every sub-agent.
    pub fn total_usage(&self) -> TokenUsage {
        self.usage.iter().fold(TokenUsage::default(), |mut acc, u| {
            acc.accumulate(u.usage);
            acc
        })
    }
}

/// The opaque unit that answers a single task.
///
/// Implementations are shared by every worker and called concurrently, so
/// any internal state must be safe to use from several tasks at once.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Label recorded as `agent_name` in the ledger.
    fn label(&self) -> String;

    /// The payload as it will actually be sent. Defaults to the raw payload.
    fn augment(&self, task: &Task) -> String {
        task.payload.clone()
    }

    /// Produces an outcome for `task`, or fails.
    async fn execute(&self, task: &Task) -> Result<RawOutcome, ExecutorError>;
}
