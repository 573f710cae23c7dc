//! Trace recorder (spec §4.8).
//!
//! One NDJSON line per lifecycle event. `seq` is assigned at emission
//! time on a shared counter, so the write chain discipline reduces to a
//! mutex around the append operation (spec §9) — concurrent emitters
//! never interleave within a line, and lines appear in emission order.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::telemetry::safe_timestamp;

/// The eleven lifecycle event kinds (spec §3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceEventKind {
    PhaseStart,
    PhaseEnd,
    WorkerStart,
    WorkerEnd,
    TaskPickup,
    TaskDone,
    SubprocessSpawn,
    SubprocessExit,
    Retry,
    PlanCreated,
    ConfigLoaded,
}

/// One NDJSON trace line.
#[derive(Debug, Clone, Serialize)]
pub struct TraceEvent {
    pub seq: u64,
    pub ts: chrono::DateTime<Utc>,
    pub pid: u32,
    pub elapsed_ms: u64,
    #[serde(rename = "type")]
    pub kind: TraceEventKind,
    #[serde(flatten)]
    pub payload: Value,
}

/// Trace recorder trait, so a null implementation can satisfy the
/// interface without side effects (spec §4.8 — "the common case").
pub trait TraceRecorder: Send + Sync {
    fn emit(&self, kind: TraceEventKind, payload: Value);
}

/// Writes NDJSON lines to `<root>/traces/trace-<safe-timestamp>.ndjson`.
pub struct FileTraceRecorder {
    seq: AtomicU64,
    start: Instant,
    pid: u32,
    writer: Mutex<std::fs::File>,
    path: PathBuf,
}

impl FileTraceRecorder {
    pub fn new(root: &Path, traces_dir_name: &str) -> std::io::Result<Self> {
        let dir = root.join(traces_dir_name);
        std::fs::create_dir_all(&dir)?;
        let filename = format!("trace-{}.ndjson", safe_timestamp(Utc::now()));
        let path = dir.join(filename);
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            seq: AtomicU64::new(0),
            start: Instant::now(),
            pid: std::process::id(),
            writer: Mutex::new(file),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TraceRecorder for FileTraceRecorder {
    fn emit(&self, kind: TraceEventKind, payload: Value) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let event = TraceEvent {
            seq,
            ts: Utc::now(),
            pid: self.pid,
            elapsed_ms: self.start.elapsed().as_millis() as u64,
            kind,
            payload,
        };

        let line = match serde_json::to_string(&event) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "trace recorder: failed to serialize event");
                return;
            }
        };

        // A single locked write of one complete line: the at-most-one
        // active write invariant that keeps lines whole and ordered.
        let mut guard = self.writer.lock().unwrap();
        if let Err(e) = writeln!(guard, "{line}") {
            warn!(error = %e, "trace recorder: failed to write event");
        }
    }
}

/// Satisfies [`TraceRecorder`] without any side effect (spec §4.8).
#[derive(Debug, Default)]
pub struct NullTraceRecorder;

impl TraceRecorder for NullTraceRecorder {
    fn emit(&self, _kind: TraceEventKind, _payload: Value) {}
}

/// Read an NDJSON trace file back into its events, for test assertions.
pub fn read_trace_events(path: &Path) -> std::io::Result<Vec<Value>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(raw
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect())
}
