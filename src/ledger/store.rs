//! Append-only JSONL storage for result records.
//!
//! Every record is one line. Concurrent writers share a single [`Ledger`]
//! and serialize through its write lock, so lines are never interleaved.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::record::ResultRecord;
use crate::error::LedgerError;

/// File extension used for run ledgers.
pub const LEDGER_EXTENSION: &str = "ledger";

/// Durable, ordered, append-only record of finished task attempts.
pub struct Ledger {
    /// Path of the ledger file.
    path: PathBuf,
    /// Held for the duration of exactly one append.
    write_lock: Mutex<()>,
}

impl Ledger {
    /// Creates a ledger backed by the given file. Nothing is touched on disk.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Creates the ledger for a named run: `<output_dir>/<run_name>.ledger`.
    pub fn for_run(output_dir: impl AsRef<Path>, run_name: &str) -> Self {
        Self::new(ledger_path(output_dir.as_ref(), run_name))
    }

    /// Returns the ledger file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates the parent directory so that an unwritable output location
    /// is detected before any work is dispatched.
    pub async fn prepare(&self) -> Result<(), LedgerError> {
        self.ensure_directory().await
    }

    async fn ensure_directory(&self) -> Result<(), LedgerError> {
        let Some(parent) = self.path.parent() else {
            return Ok(());
        };
        if parent.as_os_str().is_empty() || parent.exists() {
            return Ok(());
        }
        fs::create_dir_all(parent).await.map_err(|e| {
            LedgerError::DirectoryCreationFailed(format!(
                "Failed to create directory {:?}: {}",
                parent, e
            ))
        })
    }

    /// Appends one record as a single line.
    ///
    /// The record is serialized before the lock is taken; the lock covers
    /// open, write, and flush only. If an earlier write left an unterminated
    /// fragment, the new line starts after a fresh newline.
    pub async fn append(&self, record: &ResultRecord) -> Result<(), LedgerError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        self.ensure_directory().await?;

        let _guard = self.write_lock.lock().await;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .await?;
        if !ends_with_newline(&mut file).await? {
            line.insert(0, '\n');
        }
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!(
            path = %self.path.display(),
            task_id = %record.task.id,
            "Appended ledger entry"
        );
        Ok(())
    }

    /// Reads every record in append order.
    ///
    /// A missing file is an empty ledger. Lines that fail to parse, or that
    /// carry both or neither of output and error, are skipped with a warning.
    pub async fn load_all(&self) -> Result<Vec<ResultRecord>, LedgerError> {
        let content = match fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let records = parse_ledger(&content, &self.path);
        info!(
            path = %self.path.display(),
            records = records.len(),
            "Loaded ledger"
        );
        Ok(records)
    }
}

/// Path of the ledger for `run_name` inside `output_dir`.
pub fn ledger_path(output_dir: &Path, run_name: &str) -> PathBuf {
    output_dir.join(format!("{}.{}", run_name, LEDGER_EXTENSION))
}

/// True for an empty file or one whose last byte is `\n`.
async fn ends_with_newline(file: &mut fs::File) -> Result<bool, LedgerError> {
    if file.metadata().await?.len() == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    Ok(last[0] == b'\n')
}

/// Parses raw ledger bytes line by line. Invalid UTF-8 is confined to the
/// line it appears on.
fn parse_ledger(content: &[u8], path: &Path) -> Vec<ResultRecord> {
    let mut records = Vec::new();
    let mut skipped = 0usize;

    for (idx, line) in content.split(|byte| *byte == b'\n').enumerate() {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        match serde_json::from_slice::<ResultRecord>(line) {
            Ok(record) if record.is_well_formed() => records.push(record),
            Ok(record) => {
                skipped += 1;
                warn!(
                    path = %path.display(),
                    line = idx + 1,
                    task_id = %record.task.id,
                    "Skipping ledger entry with inconsistent output/error"
                );
            }
            Err(e) => {
                skipped += 1;
                warn!(
                    path = %path.display(),
                    line = idx + 1,
                    error = %e,
                    "Skipping malformed ledger line"
                );
            }
        }
    }

    if skipped > 0 {
        warn!(path = %path.display(), skipped, "Ledger contained unreadable entries");
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::record::TokenUsage;
    use crate::tasks::Task;
    use chrono::Utc;
    use std::collections::HashSet;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn record(id: &str, payload: &str) -> ResultRecord {
        let now = Utc::now();
        ResultRecord::success(
            "test-agent",
            Task::new(id, payload),
            payload,
            format!("answer to {}", payload),
            vec![format!("thinking about {}", payload)],
            false,
            false,
            now,
            now,
            TokenUsage::new(3, 4),
        )
    }

    #[test]
    fn test_ledger_path() {
        let path = ledger_path(Path::new("outputs"), "run-01");
        assert_eq!(path, PathBuf::from("outputs/run-01.ledger"));
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let ledger = Ledger::new(temp_dir.path().join("absent.ledger"));
        assert!(ledger.load_all().await.expect("load").is_empty());
    }

    #[tokio::test]
    async fn test_append_and_load_preserves_order() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let ledger = Ledger::for_run(temp_dir.path(), "ordered");

        let written: Vec<_> = (0..3)
            .map(|i| record(&format!("t{}", i), &format!("q{}", i)))
            .collect();
        for entry in &written {
            ledger.append(entry).await.expect("append");
        }

        let loaded = ledger.load_all().await.expect("load");
        assert_eq!(loaded, written);
    }

    #[tokio::test]
    async fn test_append_creates_parent_directory() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let nested = temp_dir.path().join("nested").join("dir");
        let ledger = Ledger::for_run(&nested, "run");

        assert!(!nested.exists());
        ledger.append(&record("t", "q")).await.expect("append");
        assert!(nested.exists());
        assert!(ledger.path().exists());
    }

    #[tokio::test]
    async fn test_prepare_creates_directory() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let nested = temp_dir.path().join("out");
        let ledger = Ledger::for_run(&nested, "run");
        ledger.prepare().await.expect("prepare");
        assert!(nested.is_dir());
        assert!(!ledger.path().exists());
    }

    #[tokio::test]
    async fn test_concurrent_appends_produce_whole_lines() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let ledger = Arc::new(Ledger::for_run(temp_dir.path(), "concurrent"));
        let n = 64;

        let mut handles = Vec::new();
        for i in 0..n {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                // Large payloads make interleaving visible if locking is broken.
                let payload = format!("{}-{}", i, "x".repeat(8192));
                ledger
                    .append(&record(&format!("t{}", i), &payload))
                    .await
                    .expect("append");
            }));
        }
        for handle in handles {
            handle.await.expect("join");
        }

        let raw = std::fs::read_to_string(ledger.path()).expect("read");
        assert_eq!(raw.lines().count(), n);
        for line in raw.lines() {
            serde_json::from_str::<ResultRecord>(line).expect("every line parses");
        }

        let loaded = ledger.load_all().await.expect("load");
        let ids: HashSet<_> = loaded.iter().map(|r| r.task.id.clone()).collect();
        let expected: HashSet<_> = (0..n).map(|i| format!("t{}", i)).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_corrupted_line_is_skipped() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let ledger = Ledger::for_run(temp_dir.path(), "corrupt");

        let mut content = String::new();
        for i in 0..9 {
            content.push_str(&serde_json::to_string(&record(&format!("t{}", i), "q")).expect("ser"));
            content.push('\n');
            if i == 4 {
                content.push_str("{\"agent_name\": \"trunc");
                content.push('\n');
            }
        }
        std::fs::write(ledger.path(), content).expect("write");

        let loaded = ledger.load_all().await.expect("load should not abort");
        assert_eq!(loaded.len(), 9);
    }

    #[tokio::test]
    async fn test_torn_multibyte_line_is_skipped() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let ledger = Ledger::for_run(temp_dir.path(), "torn");

        let mut content = Vec::new();
        for i in 0..9 {
            content.extend(serde_json::to_vec(&record(&format!("t{}", i), "q")).expect("ser"));
            content.push(b'\n');
        }
        // Write cut off after the first byte of "é".
        content.extend_from_slice(b"{\"question\":\"caf");
        content.push(0xC3);
        std::fs::write(ledger.path(), content).expect("write");

        let loaded = ledger.load_all().await.expect("load should not abort");
        assert_eq!(loaded.len(), 9);
        assert_eq!(loaded[8].task.id, "t8");
    }

    #[tokio::test]
    async fn test_append_after_unterminated_fragment() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let ledger = Ledger::for_run(temp_dir.path(), "fragment");

        ledger.append(&record("t0", "q0")).await.expect("append");
        let mut raw = std::fs::read(ledger.path()).expect("read");
        raw.extend_from_slice(b"{\"agent_name\":\"par");
        std::fs::write(ledger.path(), raw).expect("write");

        ledger.append(&record("t1", "q1")).await.expect("append");
        ledger.append(&record("t2", "q2")).await.expect("append");

        let ids: Vec<_> = ledger
            .load_all()
            .await
            .expect("load")
            .into_iter()
            .map(|r| r.task.id)
            .collect();
        assert_eq!(ids, vec!["t0", "t1", "t2"]);

        let raw = std::fs::read_to_string(ledger.path()).expect("read");
        assert!(raw.ends_with('\n'));
        assert_eq!(raw.lines().count(), 4);
    }

    #[tokio::test]
    async fn test_inconsistent_entry_is_skipped() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let ledger = Ledger::for_run(temp_dir.path(), "inconsistent");

        let mut bad = serde_json::to_value(record("t0", "q0")).expect("ser");
        bad["agent_error"] = serde_json::json!("also failed");
        let good = serde_json::to_string(&record("t1", "q1")).expect("ser");
        std::fs::write(ledger.path(), format!("{}\n\n{}\n", bad, good)).expect("write");

        let loaded = ledger.load_all().await.expect("load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].task.id, "t1");
    }
}
