//! Output handlers for a run's final report (spec §4.6's report, surfaced
//! here rather than in core since "how to print it" is an exec concern).

use std::io::Write;
use std::sync::Mutex;

use serde::Serialize;

/// One task failure, flattened to strings for display/serialization.
#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    pub task_id: String,
    pub error: String,
}

/// The final report of a `generate` or `update` run.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutput {
    pub dry_run: bool,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<FailureRecord>,
    /// Present only for dry runs: the rendered plan tree.
    pub plan_rendering: Option<String>,
}

impl RunOutput {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Mirrors the teacher's `OutputHandler` trait, minus the streaming
/// event half (this run has no mid-flight events worth surfacing beyond
/// the progress reporter).
pub trait OutputHandler: Send + Sync {
    fn print_result(&self, output: &RunOutput);
}

pub struct HumanOutputHandler<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> HumanOutputHandler<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl<W: Write + Send> OutputHandler for HumanOutputHandler<W> {
    fn print_result(&self, output: &RunOutput) {
        let mut writer = self.writer.lock().unwrap();
        if let Some(rendering) = &output.plan_rendering {
            let _ = writeln!(writer, "{rendering}");
            return;
        }
        let _ = writeln!(
            writer,
            "Done: {} succeeded, {} failed",
            output.succeeded, output.failed
        );
        for failure in &output.failures {
            let _ = writeln!(writer, "  FAIL {} — {}", failure.task_id, failure.error);
        }
    }
}

pub struct JsonOutputHandler<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonOutputHandler<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl<W: Write + Send> OutputHandler for JsonOutputHandler<W> {
    fn print_result(&self, output: &RunOutput) {
        if let Ok(json) = serde_json::to_string(output) {
            let mut writer = self.writer.lock().unwrap();
            let _ = writeln!(writer, "{json}");
        }
    }
}
