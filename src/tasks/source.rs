//! Tab-separated task source.
//!
//! Each row is `task_id<TAB>question`. Any row with a different column
//! count is a fatal format error, surfaced before dispatch begins.

use std::path::Path;

use tracing::info;

use super::Task;
use crate::error::TaskSourceError;

/// Loads every task from a TSV file, preserving file order.
pub fn load_tasks(path: &Path) -> Result<Vec<Task>, TaskSourceError> {
    if !path.exists() {
        return Err(TaskSourceError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)?;
    let tasks = parse_tasks(&content)?;

    info!(path = %path.display(), count = tasks.len(), "Loaded tasks");
    Ok(tasks)
}

/// Parses TSV content into tasks.
///
/// Fields are taken verbatim, since the payload is the resume key and must
/// match the `question` already recorded in the ledger. Only a `\r` line
/// ending is removed. A trailing newline at the end of the content does not
/// count as a row.
pub fn parse_tasks(content: &str) -> Result<Vec<Task>, TaskSourceError> {
    let mut tasks = Vec::new();

    for (idx, raw) in content.lines().enumerate() {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        let columns: Vec<&str> = line.split('\t').collect();

        if columns.len() != 2 {
            return Err(TaskSourceError::InvalidRow {
                line: idx + 1,
                columns: columns.len(),
            });
        }

        tasks.push(Task::new(columns[0], columns[1]));
    }

    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_two_columns() {
        let tasks = parse_tasks("a\tfirst question\nb\tsecond question\n").expect("parse");
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0], Task::new("a", "first question"));
        assert_eq!(tasks[1], Task::new("b", "second question"));
    }

    #[test]
    fn test_parse_keeps_padding_and_strips_crlf() {
        let tasks = parse_tasks(" a \t  padded  \r\nb\tplain\r\n").expect("parse");
        assert_eq!(tasks[0], Task::new(" a ", "  padded  "));
        assert_eq!(tasks[1], Task::new("b", "plain"));
    }

    #[test]
    fn test_padded_payload_matches_its_ledger_question() {
        use crate::ledger::{tasks_remaining, ResultRecord, ResumePolicy, TokenUsage};

        let tasks = parse_tasks("t1\t What is 2+2? \nt2\tWhat is 3+3?\n").expect("parse");
        let now = chrono::Utc::now();
        let answered = ResultRecord::success(
            "o1",
            Task::new("t1", " What is 2+2? "),
            " What is 2+2? ",
            "4",
            Vec::new(),
            false,
            false,
            now,
            now,
            TokenUsage::default(),
        );

        let pending = tasks_remaining(&tasks, &[answered], ResumePolicy::SkipAnswered);
        assert_eq!(pending, vec![Task::new("t2", "What is 3+3?")]);
    }

    #[test]
    fn test_rejects_single_column_row() {
        let err = parse_tasks("a\tok\nmissing-payload\n").unwrap_err();
        assert!(matches!(
            err,
            TaskSourceError::InvalidRow {
                line: 2,
                columns: 1
            }
        ));
    }

    #[test]
    fn test_rejects_three_column_row() {
        let err = parse_tasks("a\tq\textra\n").unwrap_err();
        assert!(matches!(
            err,
            TaskSourceError::InvalidRow {
                line: 1,
                columns: 3
            }
        ));
    }

    #[test]
    fn test_rejects_blank_line() {
        let err = parse_tasks("a\tq\n\nb\tq2\n").unwrap_err();
        assert!(matches!(err, TaskSourceError::InvalidRow { line: 2, .. }));
    }

    #[test]
    fn test_empty_content_has_no_tasks() {
        assert!(parse_tasks("").expect("parse").is_empty());
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_tasks(Path::new("/nonexistent/tasks.tsv")).unwrap_err();
        assert!(matches!(err, TaskSourceError::NotFound(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().expect("temp file");
        writeln!(file, "t1\tWhat is the capital of France?").expect("write");
        writeln!(file, "t2\tHow many legs does a spider have?").expect("write");

        let tasks = load_tasks(file.path()).expect("load");
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[1].id, "t2");
    }
}
