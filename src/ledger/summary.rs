//! Aggregate counts over a ledger, used by `batch-eval status`.

use std::collections::HashSet;

use serde::Serialize;

use super::record::{ResultRecord, TokenUsage};

/// Summary statistics for a set of ledger records.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LedgerSummary {
    /// Number of entries.
    pub entries: usize,
    /// Number of distinct payloads.
    pub unique_payloads: usize,
    /// Entries with an output.
    pub succeeded: usize,
    /// Entries with an error.
    pub failed: usize,
    /// Successful entries whose trace held a parse-failure marker.
    pub parse_errors: usize,
    /// Successful entries that hit the step/time limit.
    pub step_limit_hits: usize,
    /// Token usage over all entries.
    pub usage: TokenUsage,
    /// Mean attempt duration in seconds.
    pub avg_duration_secs: f64,
}

impl LedgerSummary {
    /// Builds a summary from loaded records.
    pub fn from_records(records: &[ResultRecord]) -> Self {
        let mut summary = Self {
            entries: records.len(),
            ..Default::default()
        };

        let mut payloads = HashSet::new();
        let mut total_ms: i64 = 0;

        for record in records {
            payloads.insert(record.task.payload.as_str());
            if record.is_success() {
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
            }
            if record.had_parse_error {
                summary.parse_errors += 1;
            }
            if record.hit_step_limit {
                summary.step_limit_hits += 1;
            }
            summary.usage.accumulate(record.usage);
            total_ms += record.duration().num_milliseconds().max(0);
        }

        summary.unique_payloads = payloads.len();
        if !records.is_empty() {
            let avg = total_ms as f64 / records.len() as f64 / 1000.0;
            summary.avg_duration_secs = (avg * 10.0).round() / 10.0;
        }
        summary
    }

    /// Returns the success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        if self.entries == 0 {
            return 0.0;
        }
        (self.succeeded as f64 / self.entries as f64) * 100.0
    }
}
