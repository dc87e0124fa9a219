//! Task definitions and the tab-separated task source.

pub mod source;

pub use source::{load_tasks, parse_tasks};

use serde::{Deserialize, Serialize};

/// One unit of work: a stable identifier plus the payload the executor answers.
///
/// The payload is the deduplication key when resuming a run; two tasks with
/// the same payload are the same work even if their ids differ.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Task {
    /// Identifier from the first column of the task file.
    #[serde(rename = "task_id")]
    pub id: String,
    /// Question text from the second column of the task file.
    #[serde(rename = "question")]
    pub payload: String,
}

impl Task {
    /// Creates a new task.
    pub fn new(id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
        }
    }
}
