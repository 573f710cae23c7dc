//! Telemetry recorder (spec §4.8).
//!
//! In-memory list of entries; at `finalize` computes an aggregate summary
//! and writes a run log, then prunes older run logs beyond the retention
//! window. The recorder never fails the run: logging failures are
//! captured and swallowed by design (spec §7) — the value of telemetry is
//! being present, not being gated.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;

/// A file read into a prompt, recorded via `amend_last_entry` (spec §4.4).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileRead {
    pub path: String,
    pub byte_size: u64,
}

/// One AI call's complete record (spec §3.1). Append-only; never mutated
/// after write, except for the single `amend_last_entry` back-reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryEntry {
    pub timestamp: DateTime<Utc>,
    /// Redacted input descriptor (e.g. task label), never the raw prompt.
    pub input_descriptor: String,
    pub response_text: String,
    pub model: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
    pub latency_ms: u64,
    pub exit_code: i32,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    #[serde(default)]
    pub files_read: Vec<FileRead>,
}

/// Aggregate summary over a `RunLog`'s entries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RunSummary {
    pub total_calls: usize,
    pub error_count: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cache_read_tokens: u64,
    pub total_cache_creation_tokens: u64,
    pub total_retries: u32,
    pub unique_files_read: usize,
}

/// One invocation's complete telemetry, as written to `logs/run-*.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunLog {
    pub entries: Vec<TelemetryEntry>,
    pub summary: RunSummary,
}

fn summarize(entries: &[TelemetryEntry]) -> RunSummary {
    let mut unique_files = HashSet::new();
    let mut summary = RunSummary::default();
    summary.total_calls = entries.len();
    for entry in entries {
        if entry.error_kind.is_some() {
            summary.error_count += 1;
        }
        summary.total_input_tokens += entry.input_tokens;
        summary.total_output_tokens += entry.output_tokens;
        summary.total_cache_read_tokens += entry.cache_read_tokens;
        summary.total_cache_creation_tokens += entry.cache_creation_tokens;
        summary.total_retries += entry.retry_count;
        for f in &entry.files_read {
            unique_files.insert(f.path.clone());
        }
    }
    summary.unique_files_read = unique_files.len();
    summary
}

/// Replace `:` and `.` with `-` so a timestamp is safe to use in a
/// filename across platforms (spec §4.8).
pub fn safe_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339().replace([':', '.'], "-")
}

/// Mutated only via its own lock — the "write chain" discipline of
/// spec §4.8 reduces, for an in-process recorder, to a mutex around the
/// append operation (spec §9 notes both are equivalent).
#[derive(Debug, Default)]
pub struct TelemetryRecorder {
    entries: Mutex<Vec<TelemetryEntry>>,
}

impl TelemetryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: TelemetryEntry) {
        self.entries.lock().unwrap().push(entry);
    }

    /// Append `files_read` to the most recent telemetry entry (spec §4.4
    /// `amendLastEntry`).
    pub fn amend_last_entry(&self, files_read: Vec<FileRead>) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(last) = entries.last_mut() {
            last.files_read.extend(files_read);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Compute the aggregate summary, write the run log to
    /// `<root>/logs/run-<safe-timestamp>.json`, and delete older run logs
    /// beyond `retention`. Never returns an error to the caller — I/O
    /// failures are logged and swallowed (spec §7).
    pub fn finalize(&self, root: &Path, logs_dir_name: &str, retention: usize) -> RunLog {
        let entries = self.entries.lock().unwrap().clone();
        let summary = summarize(&entries);
        let run_log = RunLog {
            entries,
            summary,
        };

        if let Err(e) = write_run_log(root, logs_dir_name, &run_log) {
            warn!(error = %e, "telemetry recorder: failed to write run log");
        }
        if let Err(e) = prune_old_run_logs(root, logs_dir_name, retention) {
            warn!(error = %e, "telemetry recorder: failed to prune old run logs");
        }

        run_log
    }
}

fn write_run_log(root: &Path, logs_dir_name: &str, run_log: &RunLog) -> Result<()> {
    let logs_dir = root.join(logs_dir_name);
    std::fs::create_dir_all(&logs_dir)?;
    let filename = format!("run-{}.json", safe_timestamp(Utc::now()));
    let path = logs_dir.join(filename);
    let json = serde_json::to_string_pretty(run_log)?;
    std::fs::write(path, json)?;
    Ok(())
}

fn prune_old_run_logs(root: &Path, logs_dir_name: &str, retention: usize) -> Result<()> {
    let logs_dir = root.join(logs_dir_name);
    if !logs_dir.exists() {
        return Ok(());
    }
    let mut entries: Vec<_> = std::fs::read_dir(&logs_dir)?
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_name()
                .to_string_lossy()
                .starts_with("run-")
        })
        .collect();

    entries.sort_by_key(|e| {
        e.metadata()
            .and_then(|m| m.modified())
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
    });

    if entries.len() > retention {
        let to_remove = entries.len() - retention;
        for entry in &entries[..to_remove] {
            let _ = std::fs::remove_file(entry.path());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(input_tokens: u64, error: bool) -> TelemetryEntry {
        TelemetryEntry {
            timestamp: Utc::now(),
            input_descriptor: "task".to_string(),
            response_text: "ok".to_string(),
            model: Some("model".to_string()),
            input_tokens,
            output_tokens: 1,
            cache_read_tokens: 0,
            cache_creation_tokens: 0,
            latency_ms: 10,
            exit_code: 0,
            error_kind: if error { Some("TIMEOUT".to_string()) } else { None },
            error_message: None,
            retry_count: 0,
            files_read: vec![],
        }
    }

    #[test]
    fn test_safe_timestamp_replaces_colons_and_dots() {
        let ts = DateTime::parse_from_rfc3339("2024-01-01T12:30:00.500Z")
            .unwrap()
            .with_timezone(&Utc);
        let safe = safe_timestamp(ts);
        assert!(!safe.contains(':'));
        assert!(!safe.contains('.'));
    }

    #[test]
    fn test_record_and_len() {
        let recorder = TelemetryRecorder::new();
        recorder.record(entry(100, false));
        recorder.record(entry(50, true));
        assert_eq!(recorder.len(), 2);
    }

    #[test]
    fn test_amend_last_entry_appends_to_most_recent() {
        let recorder = TelemetryRecorder::new();
        recorder.record(entry(100, false));
        recorder.amend_last_entry(vec![FileRead {
            path: "src/a.rs".to_string(),
            byte_size: 42,
        }]);
        let entries = recorder.entries.lock().unwrap();
        assert_eq!(entries.last().unwrap().files_read.len(), 1);
    }

    #[test]
    fn test_finalize_writes_run_log_and_returns_summary() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = TelemetryRecorder::new();
        recorder.record(entry(100, false));
        recorder.record(entry(50, true));
        let run_log = recorder.finalize(dir.path(), "logs", 50);
        assert_eq!(run_log.summary.total_calls, 2);
        assert_eq!(run_log.summary.error_count, 1);
        assert_eq!(run_log.summary.total_input_tokens, 150);

        let logs_dir = dir.path().join("logs");
        let files: Vec<_> = std::fs::read_dir(&logs_dir).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_finalize_round_trips_entries() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = TelemetryRecorder::new();
        recorder.record(entry(10, false));
        recorder.record(entry(20, false));
        recorder.record(entry(30, false));
        let run_log = recorder.finalize(dir.path(), "logs", 50);

        let logs_dir = dir.path().join("logs");
        let file = std::fs::read_dir(&logs_dir)
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        let raw = std::fs::read_to_string(file.path()).unwrap();
        let read_back: RunLog = serde_json::from_str(&raw).unwrap();
        assert_eq!(read_back.entries.len(), run_log.entries.len());
        assert_eq!(read_back.entries, run_log.entries);
    }

    #[test]
    fn test_prune_keeps_only_retention_count() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = TelemetryRecorder::new();
        for _ in 0..5 {
            recorder.record(entry(1, false));
            recorder.finalize(dir.path(), "logs", 2);
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let logs_dir = dir.path().join("logs");
        let count = std::fs::read_dir(&logs_dir).unwrap().count();
        assert!(count <= 2);
    }

    #[test]
    fn test_unique_files_read_counted_by_set_cardinality() {
        let mut e1 = entry(1, false);
        e1.files_read = vec![
            FileRead {
                path: "a.rs".to_string(),
                byte_size: 1,
            },
            FileRead {
                path: "b.rs".to_string(),
                byte_size: 2,
            },
        ];
        let mut e2 = entry(1, false);
        e2.files_read = vec![FileRead {
            path: "a.rs".to_string(),
            byte_size: 1,
        }];
        let summary = summarize(&[e1, e2]);
        assert_eq!(summary.unique_files_read, 2);
    }
}
