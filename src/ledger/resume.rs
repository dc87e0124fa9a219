//! Resume filter: which tasks still need work given prior ledger state.
//!
//! Matching is by payload, not id, so a task whose id changed between runs
//! but whose question did not is still recognized as answered.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::record::ResultRecord;
use crate::tasks::Task;

/// Which prior ledger entries count as "completed" when resuming.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumePolicy {
    /// Any prior entry for a payload, successful or failed, excludes it.
    #[default]
    SkipAnswered,
    /// Only successful entries exclude a payload; failed tasks are retried.
    RetryFailed,
}

impl ResumePolicy {
    /// Returns whether `record` marks its payload as completed.
    pub fn counts_as_completed(&self, record: &ResultRecord) -> bool {
        match self {
            ResumePolicy::SkipAnswered => true,
            ResumePolicy::RetryFailed => record.is_success(),
        }
    }
}

impl std::fmt::Display for ResumePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResumePolicy::SkipAnswered => write!(f, "skip_answered"),
            ResumePolicy::RetryFailed => write!(f, "retry_failed"),
        }
    }
}

/// Returns the tasks whose payload has no completed entry, in original order.
pub fn tasks_remaining(
    all_tasks: &[Task],
    completed: &[ResultRecord],
    policy: ResumePolicy,
) -> Vec<Task> {
    if completed.is_empty() {
        return all_tasks.to_vec();
    }

    let answered: HashSet<&str> = completed
        .iter()
        .filter(|record| policy.counts_as_completed(record))
        .map(|record| record.task.payload.as_str())
        .collect();

    all_tasks
        .iter()
        .filter(|task| !answered.contains(task.payload.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::record::TokenUsage;
    use chrono::Utc;
    use proptest::prelude::*;

    fn done(task: &Task) -> ResultRecord {
        let now = Utc::now();
        ResultRecord::success(
            "agent",
            task.clone(),
            task.payload.clone(),
            "ok",
            Vec::new(),
            false,
            false,
            now,
            now,
            TokenUsage::default(),
        )
    }

    fn failed(task: &Task) -> ResultRecord {
        let now = Utc::now();
        ResultRecord::failure(
            "agent",
            task.clone(),
            task.payload.clone(),
            "boom",
            now,
            now,
            TokenUsage::default(),
        )
    }

    fn tasks(n: usize) -> Vec<Task> {
        (0..n)
            .map(|i| Task::new(format!("t{}", i), format!("question {}", i)))
            .collect()
    }

    #[test]
    fn test_empty_ledger_returns_all() {
        let all = tasks(4);
        assert_eq!(tasks_remaining(&all, &[], ResumePolicy::default()), all);
    }

    #[test]
    fn test_excludes_completed_and_keeps_order() {
        let all = tasks(5);
        let completed = vec![done(&all[3]), done(&all[0])];
        let remaining = tasks_remaining(&all, &completed, ResumePolicy::SkipAnswered);
        let ids: Vec<_> = remaining.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2", "t4"]);
    }

    #[test]
    fn test_dedup_is_content_keyed() {
        let first = Task::new("old-id", "same question");
        let second = Task::new("new-id", "same question");
        let remaining = tasks_remaining(
            &[second],
            &[done(&first)],
            ResumePolicy::SkipAnswered,
        );
        assert!(remaining.is_empty());
    }

    #[test]
    fn test_same_id_different_payload_is_pending() {
        let answered = Task::new("t1", "old wording");
        let reworded = Task::new("t1", "new wording");
        let remaining = tasks_remaining(
            &[reworded.clone()],
            &[done(&answered)],
            ResumePolicy::SkipAnswered,
        );
        assert_eq!(remaining, vec![reworded]);
    }

    #[test]
    fn test_skip_answered_excludes_failures() {
        let all = tasks(2);
        let remaining = tasks_remaining(&all, &[failed(&all[0])], ResumePolicy::SkipAnswered);
        assert_eq!(remaining, vec![all[1].clone()]);
    }

    #[test]
    fn test_retry_failed_keeps_failures() {
        let all = tasks(3);
        let completed = vec![failed(&all[0]), done(&all[1])];
        let remaining = tasks_remaining(&all, &completed, ResumePolicy::RetryFailed);
        let ids: Vec<_> = remaining.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t0", "t2"]);
    }

    #[test]
    fn test_retry_failed_then_success_is_done() {
        let all = tasks(1);
        let completed = vec![failed(&all[0]), done(&all[0])];
        assert!(tasks_remaining(&all, &completed, ResumePolicy::RetryFailed).is_empty());
    }

    #[test]
    fn test_policy_display() {
        assert_eq!(ResumePolicy::SkipAnswered.to_string(), "skip_answered");
        assert_eq!(ResumePolicy::RetryFailed.to_string(), "retry_failed");
    }

    proptest! {
        #[test]
        fn remaining_is_exactly_the_unanswered_subset(
            n in 0usize..40,
            mask in proptest::collection::vec(any::<bool>(), 40),
        ) {
            let all = tasks(n);
            let completed: Vec<_> = all
                .iter()
                .zip(&mask)
                .filter(|(_, answered)| **answered)
                .map(|(task, _)| done(task))
                .collect();
            let expected: Vec<_> = all
                .iter()
                .zip(&mask)
                .filter(|(_, answered)| !**answered)
                .map(|(task, _)| task.clone())
                .collect();

            let remaining = tasks_remaining(&all, &completed, ResumePolicy::SkipAnswered);
            prop_assert_eq!(&remaining, &expected);

            // Resuming again from the same ledger changes nothing.
            let again = tasks_remaining(&remaining, &completed, ResumePolicy::SkipAnswered);
            prop_assert_eq!(again, expected);
        }
    }
}
