//! Ledger record types.
//!
//! Field names on the wire follow the JSONL layout produced by earlier
//! evaluation runs. Those runs wrote naive `%Y-%m-%d %H:%M:%S` timestamps and
//! message objects as trace items. Both are accepted on read, so their
//! ledgers remain resumable. New records always carry RFC 3339 timestamps.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::tasks::Task;

/// The normalized, persisted outcome of one task attempt.
///
/// Exactly one of `output` and `error` is set. Use [`ResultRecord::success`]
/// or [`ResultRecord::failure`] to build one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Label of the executor that produced this record (usually the model id).
    #[serde(rename = "agent_name")]
    pub agent_label: String,
    /// The task as read from the task source.
    #[serde(flatten)]
    pub task: Task,
    /// The payload as actually sent to the executor.
    #[serde(rename = "augmented_question")]
    pub augmented_payload: String,
    /// Final answer text; `None` when the attempt failed.
    #[serde(rename = "prediction")]
    pub output: Option<String>,
    /// Opaque executor trace lines, in order.
    #[serde(
        rename = "intermediate_steps",
        default,
        deserialize_with = "deserialize_trace"
    )]
    pub trace: Vec<String>,
    /// Whether the trace contains a parse-failure marker.
    #[serde(rename = "parsing_error", default)]
    pub had_parse_error: bool,
    /// Whether the trace or output contains a step/time-limit marker.
    #[serde(rename = "iteration_limit_exceeded", default)]
    pub hit_step_limit: bool,
    /// Stringified executor failure; `None` when the attempt succeeded.
    #[serde(rename = "agent_error")]
    pub error: Option<String>,
    /// When execution began.
    #[serde(rename = "start_time", deserialize_with = "deserialize_timestamp")]
    pub started_at: DateTime<Utc>,
    /// When execution finished.
    #[serde(rename = "end_time", deserialize_with = "deserialize_timestamp")]
    pub ended_at: DateTime<Utc>,
    /// Token usage summed over every sub-agent.
    #[serde(rename = "token_counts", default)]
    pub usage: TokenUsage,
}

impl ResultRecord {
    /// Creates a successful record.
    #[allow(clippy::too_many_arguments)]
    pub fn success(
        agent_label: impl Into<String>,
        task: Task,
        augmented_payload: impl Into<String>,
        output: impl Into<String>,
        trace: Vec<String>,
        had_parse_error: bool,
        hit_step_limit: bool,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        usage: TokenUsage,
    ) -> Self {
        Self {
            agent_label: agent_label.into(),
            task,
            augmented_payload: augmented_payload.into(),
            output: Some(output.into()),
            trace,
            had_parse_error,
            hit_step_limit,
            error: None,
            started_at,
            ended_at,
            usage,
        }
    }

    /// Creates a failed record. The trace is empty and both flags are false.
    pub fn failure(
        agent_label: impl Into<String>,
        task: Task,
        augmented_payload: impl Into<String>,
        error: impl Into<String>,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        usage: TokenUsage,
    ) -> Self {
        Self {
            agent_label: agent_label.into(),
            task,
            augmented_payload: augmented_payload.into(),
            output: None,
            trace: Vec::new(),
            had_parse_error: false,
            hit_step_limit: false,
            error: Some(error.into()),
            started_at,
            ended_at,
            usage,
        }
    }

    /// Returns true if the attempt produced an output.
    pub fn is_success(&self) -> bool {
        self.output.is_some() && self.error.is_none()
    }

    /// Returns true if exactly one of `output` and `error` is set.
    pub fn is_well_formed(&self) -> bool {
        self.output.is_some() != self.error.is_some()
    }

    /// Wall-clock duration of the attempt.
    pub fn duration(&self) -> chrono::Duration {
        self.ended_at - self.started_at
    }
}

/// Timestamp layout of ledgers written by earlier runs. No offset is stored;
/// it is read as UTC.
const LEGACY_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parses an RFC 3339 timestamp, falling back to the legacy naive layout.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => Ok(ts.with_timezone(&Utc)),
        Err(_) => NaiveDateTime::parse_from_str(raw, LEGACY_TIMESTAMP_FORMAT)
            .map(|naive| naive.and_utc()),
    }
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .map_err(|e| serde::de::Error::custom(format!("invalid timestamp {:?}: {}", raw, e)))
}

/// Trace items are kept as text. Structured items (message objects) are
/// stored as their compact JSON; `null` is an empty trace.
fn deserialize_trace<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let items = Option::<Vec<serde_json::Value>>::deserialize(deserializer)?;
    Ok(items
        .unwrap_or_default()
        .into_iter()
        .map(|item| match item {
            serde_json::Value::String(text) => text,
            other => other.to_string(),
        })
        .collect())
}

/// Token usage counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Input/prompt tokens.
    #[serde(rename = "input")]
    pub input_tokens: u64,
    /// Output/completion tokens.
    #[serde(rename = "output")]
    pub output_tokens: u64,
}

impl TokenUsage {
    /// Creates new token usage stats.
    pub fn new(input: u64, output: u64) -> Self {
        Self {
            input_tokens: input,
            output_tokens: output,
        }
    }

    /// Returns total tokens used.
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Adds another set of counters into this one.
    pub fn accumulate(&mut self, other: TokenUsage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
    }
}
