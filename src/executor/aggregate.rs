//! Normalizes executor outcomes into ledger records.
//!
//! Parse-error and step-limit detection is a plain substring scan over the
//! trace and output, isolated in [`MarkerScan`].

use chrono::{DateTime, Utc};

use super::RawOutcome;
use crate::error::ExecutorError;
use crate::ledger::ResultRecord;
use crate::tasks::Task;

/// Trace marker emitted when the agent produced output it could not parse.
pub const PARSE_ERROR_MARKER: &str = "AgentParsingError";

/// Marker emitted when the agent ran out of steps or time.
pub const STEP_LIMIT_MARKER: &str = "Agent stopped due to iteration limit or time limit.";

/// Substring markers searched for in executor traces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerScan {
    parse_error: String,
    step_limit: String,
}

impl Default for MarkerScan {
    fn default() -> Self {
        Self::new(PARSE_ERROR_MARKER, STEP_LIMIT_MARKER)
    }
}

impl MarkerScan {
    /// Creates a scan with custom markers.
    pub fn new(parse_error: impl Into<String>, step_limit: impl Into<String>) -> Self {
        Self {
            parse_error: parse_error.into(),
            step_limit: step_limit.into(),
        }
    }

    /// True if any trace line contains the parse-error marker.
    pub fn has_parse_error(&self, trace: &[String]) -> bool {
        trace.iter().any(|line| line.contains(&self.parse_error))
    }

    /// True if the output or any trace line contains the step-limit marker.
    pub fn hit_step_limit(&self, trace: &[String], output: &str) -> bool {
        output.contains(&self.step_limit) || trace.iter().any(|line| line.contains(&self.step_limit))
    }
}

/// Builds one [`ResultRecord`] per task attempt.
#[derive(Debug, Clone)]
pub struct ResultAggregator {
    agent_label: String,
    scan: MarkerScan,
}

impl ResultAggregator {
    /// Creates an aggregator that stamps records with `agent_label`.
    pub fn new(agent_label: impl Into<String>) -> Self {
        Self {
            agent_label: agent_label.into(),
            scan: MarkerScan::default(),
        }
    }

    /// Replaces the marker scan.
    pub fn with_scan(mut self, scan: MarkerScan) -> Self {
        self.scan = scan;
        self
    }

    /// Converts an executor outcome into a record.
    ///
    /// Success keeps the trace and derives both flags from it. Failure stores
    /// the stringified error with an empty trace, both flags false and
    /// whatever usage the error carries.
    pub fn to_result_record(
        &self,
        task: Task,
        augmented_payload: String,
        outcome: Result<RawOutcome, ExecutorError>,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> ResultRecord {
        match outcome {
            Ok(raw) => {
                let usage = raw.total_usage();
                let had_parse_error = self.scan.has_parse_error(&raw.trace);
                let hit_step_limit = self.scan.hit_step_limit(&raw.trace, &raw.output);
                ResultRecord::success(
                    self.agent_label.clone(),
                    task,
                    augmented_payload,
                    raw.output,
                    raw.trace,
                    had_parse_error,
                    hit_step_limit,
                    started_at,
                    ended_at,
                    usage,
                )
            }
            Err(err) => {
                let usage = err.usage();
                ResultRecord::failure(
                    self.agent_label.clone(),
                    task,
                    augmented_payload,
                    err.to_string(),
                    started_at,
                    ended_at,
                    usage,
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::AgentUsage;
    use crate::ledger::TokenUsage;

    fn aggregate(outcome: Result<RawOutcome, ExecutorError>) -> ResultRecord {
        let now = Utc::now();
        ResultAggregator::new("o1").to_result_record(
            Task::new("t1", "q"),
            "augmented q".to_string(),
            outcome,
            now,
            now,
        )
    }

    #[test]
    fn test_success_record() {
        let record = aggregate(Ok(RawOutcome::new("Paris")
            .with_trace(vec!["searched".to_string()])
            .with_usage(AgentUsage::new("manager", TokenUsage::new(7, 3)))
            .with_usage(AgentUsage::new("search", TokenUsage::new(5, 1)))));

        assert_eq!(record.agent_label, "o1");
        assert_eq!(record.output.as_deref(), Some("Paris"));
        assert!(record.error.is_none());
        assert_eq!(record.trace, vec!["searched".to_string()]);
        assert!(!record.had_parse_error);
        assert!(!record.hit_step_limit);
        assert_eq!(record.usage, TokenUsage::new(12, 4));
        assert_eq!(record.augmented_payload, "augmented q");
    }

    #[test]
    fn test_parse_error_marker_in_trace() {
        let record = aggregate(Ok(RawOutcome::new("x").with_trace(vec![
            "ok".to_string(),
            "step 2: AgentParsingError: bad code block".to_string(),
        ])));
        assert!(record.had_parse_error);
        assert!(!record.hit_step_limit);
    }

    #[test]
    fn test_step_limit_marker_in_output() {
        let record = aggregate(Ok(RawOutcome::new(format!(
            "{} Best guess: 7",
            STEP_LIMIT_MARKER
        ))));
        assert!(record.hit_step_limit);
        assert!(record.is_success());
    }

    #[test]
    fn test_step_limit_marker_in_trace() {
        let record =
            aggregate(Ok(RawOutcome::new("7").with_trace(vec![STEP_LIMIT_MARKER.to_string()])));
        assert!(record.hit_step_limit);
    }

    #[test]
    fn test_failure_record() {
        let record = aggregate(Err(ExecutorError::Failed("browser crashed".to_string())));

        assert!(record.output.is_none());
        assert_eq!(
            record.error.as_deref(),
            Some("Execution failed: browser crashed")
        );
        assert!(record.trace.is_empty());
        assert!(!record.had_parse_error);
        assert!(!record.hit_step_limit);
        assert_eq!(record.usage, TokenUsage::default());
    }

    #[test]
    fn test_failure_record_keeps_partial_usage() {
        let err = ExecutorError::Failed("browser crashed".to_string())
            .with_usage(TokenUsage::new(40, 8));
        let record = aggregate(Err(err));

        assert_eq!(
            record.error.as_deref(),
            Some("Execution failed: browser crashed")
        );
        assert_eq!(record.usage, TokenUsage::new(40, 8));
        assert!(record.trace.is_empty());
    }

    #[test]
    fn test_records_are_mutually_exclusive() {
        let outcomes = vec![
            Ok(RawOutcome::new("")),
            Ok(RawOutcome::new("answer")),
            Err(ExecutorError::Timeout { seconds: 5 }),
            Err(ExecutorError::Panicked("oops".to_string())),
        ];
        for outcome in outcomes {
            assert!(aggregate(outcome).is_well_formed());
        }
    }

    #[test]
    fn test_custom_markers() {
        let scan = MarkerScan::new("PARSE!", "LIMIT!");
        assert!(scan.has_parse_error(&["a PARSE! b".to_string()]));
        assert!(!scan.has_parse_error(&[PARSE_ERROR_MARKER.to_string()]));
        assert!(scan.hit_step_limit(&[], "LIMIT!"));

        let now = Utc::now();
        let record = ResultAggregator::new("o1").with_scan(scan).to_result_record(
            Task::new("t1", "q"),
            "q".to_string(),
            Ok(RawOutcome::new("LIMIT! reached")),
            now,
            now,
        );
        assert!(record.hit_step_limit);
    }
}
