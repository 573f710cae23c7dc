//! Three-phase execution pipeline driver (spec §4.6).
//!
//! Phase 1 (file tasks) runs with bounded parallelism via a shared
//! cursor, mirroring [`crate::pool::run`]'s discipline but borrowing
//! `PipelineContext` directly rather than requiring `'static` futures,
//! since every task here is driven from a single call to `run_plan`
//! rather than spawned independently. Phase 2 (directory tasks) and
//! Phase 3 (root tasks) run sequentially, in the order `ExecutionPlan`
//! already established.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use thiserror::Error;

use crate::adapter::{AICallOptions, Adapter};
use crate::artifact::{content_hash, Artifact, DirectoryOverview};
use crate::call_service::{AiCallService, CallError};
use crate::task::{ExecutionPlan, Task};
use crate::trace::{TraceEventKind, TraceRecorder};

/// Failure writing a task's output to disk, distinct from a [`CallError`]:
/// the AI call itself succeeded.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Call(#[from] CallError),
    #[error("failed to write output: {0}")]
    Write(String),
}

/// Outcome of one task, independent of phase.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub task_id: String,
    pub output_path: std::path::PathBuf,
}

#[derive(Debug)]
pub struct TaskFailure {
    pub task_id: String,
    pub error: PipelineError,
}

/// Everything the driver needs to execute a plan against a live backend.
/// Dry-run mode (see [`render_dry_run`]) skips this entirely.
pub struct PipelineContext<'a> {
    pub root: &'a Path,
    pub service: Arc<AiCallService>,
    pub adapter: &'a dyn Adapter,
    pub trace: Arc<dyn TraceRecorder>,
    pub timeout: Duration,
    pub heap_mb: u64,
    pub concurrency: usize,
    pub fail_fast: bool,
}

/// Result of driving a full plan through all three phases.
#[derive(Debug, Default)]
pub struct PipelineReport {
    pub succeeded: Vec<TaskOutcome>,
    pub failed: Vec<TaskFailure>,
}

impl PipelineReport {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Drive `plan` through Phase 1 (parallel file tasks), Phase 2 (post-order
/// directory tasks), and Phase 3 (sequential root tasks). When
/// `ctx.fail_fast` is set, a failure in an earlier phase skips the phases
/// that follow, since directory and root tasks read the artifacts file
/// tasks are meant to have produced.
pub async fn run_plan(ctx: &PipelineContext<'_>, plan: ExecutionPlan) -> PipelineReport {
    let mut report = PipelineReport::default();

    run_phase1(ctx, &plan.file_tasks, &mut report).await;
    if ctx.fail_fast && report.has_failures() {
        return report;
    }

    run_phase2(ctx, &plan.directory_tasks, &plan.file_tasks, &mut report).await;
    if ctx.fail_fast && report.has_failures() {
        return report;
    }

    run_phase3(ctx, &plan.root_tasks, &mut report).await;

    report
}

async fn run_phase1(ctx: &PipelineContext<'_>, tasks: &[Task], report: &mut PipelineReport) {
    if tasks.is_empty() {
        return;
    }
    ctx.trace
        .emit(TraceEventKind::PhaseStart, json!({"phase": "file", "count": tasks.len()}));

    let cursor = AtomicUsize::new(0);
    let abort = AtomicBool::new(false);
    let results: std::sync::Mutex<Vec<Option<Result<TaskOutcome, TaskFailure>>>> =
        std::sync::Mutex::new((0..tasks.len()).map(|_| None).collect());

    let worker_count = ctx.concurrency.min(tasks.len()).max(1);

    let mut workers = Vec::with_capacity(worker_count);
    for worker_id in 0..worker_count {
        let cursor = &cursor;
        let abort = &abort;
        let results = &results;
        workers.push(async move {
            ctx.trace
                .emit(TraceEventKind::WorkerStart, json!({"worker": worker_id}));
            loop {
                if abort.load(Ordering::Acquire) {
                    break;
                }
                let index = cursor.fetch_add(1, Ordering::SeqCst);
                if index >= tasks.len() {
                    break;
                }
                let task = &tasks[index];
                ctx.trace
                    .emit(TraceEventKind::TaskPickup, json!({"task_id": task.id}));

                let outcome = run_file_task(ctx, task).await;
                ctx.trace.emit(
                    TraceEventKind::TaskDone,
                    json!({"task_id": task.id, "ok": outcome.is_ok()}),
                );

                let is_err = outcome.is_err();
                results.lock().unwrap()[index] = Some(outcome);

                if is_err && ctx.fail_fast {
                    abort.store(true, Ordering::Release);
                    break;
                }
            }
            ctx.trace
                .emit(TraceEventKind::WorkerEnd, json!({"worker": worker_id}));
        });
    }
    futures::future::join_all(workers).await;

    for result in results.into_inner().unwrap().into_iter().flatten() {
        match result {
            Ok(outcome) => report.succeeded.push(outcome),
            Err(failure) => report.failed.push(failure),
        }
    }

    ctx.trace.emit(TraceEventKind::PhaseEnd, json!({"phase": "file"}));
}

async fn run_file_task(
    ctx: &PipelineContext<'_>,
    task: &Task,
) -> Result<TaskOutcome, TaskFailure> {
    let mut options = AICallOptions::new(task.user_prompt.clone());
    options.system_prompt = Some(task.system_prompt.clone());
    options.task_label = Some(task.id.clone());

    let response = ctx
        .service
        .call(ctx.adapter, options, ctx.timeout, ctx.heap_mb)
        .await
        .map_err(|error| TaskFailure {
            task_id: task.id.clone(),
            error: error.into(),
        })?;

    let source_path = task
        .source_path
        .clone()
        .unwrap_or_else(|| ctx.root.join(&task.target_path));
    let bytes = std::fs::read(&source_path).unwrap_or_default();
    let hash = content_hash(&bytes);

    let artifact = Artifact::new(hash, task.id.clone(), response.text);
    let output_path = ctx.root.join(&task.output_path);
    if let Err(e) = artifact.write(&output_path) {
        return Err(TaskFailure {
            task_id: task.id.clone(),
            error: PipelineError::Write(e.to_string()),
        });
    }

    Ok(TaskOutcome {
        task_id: task.id.clone(),
        output_path,
    })
}

async fn run_phase2(
    ctx: &PipelineContext<'_>,
    tasks: &[Task],
    file_tasks: &[Task],
    report: &mut PipelineReport,
) {
    if tasks.is_empty() {
        return;
    }
    ctx.trace.emit(
        TraceEventKind::PhaseStart,
        json!({"phase": "directory", "count": tasks.len()}),
    );

    let file_tasks_by_id: HashMap<&str, &Task> =
        file_tasks.iter().map(|t| (t.id.as_str(), t)).collect();

    // Already sorted deepest-first by `ExecutionPlan::build`; processed
    // one at a time so a parent directory never starts before its
    // children have written their overviews.
    for task in tasks {
        ctx.trace
            .emit(TraceEventKind::TaskPickup, json!({"task_id": task.id}));

        if !directory_is_ready(ctx.root, task, &file_tasks_by_id) {
            let failure = TaskFailure {
                task_id: task.id.clone(),
                error: PipelineError::Write(
                    "readiness predicate failed: a file artifact is missing".to_string(),
                ),
            };
            ctx.trace
                .emit(TraceEventKind::TaskDone, json!({"task_id": task.id, "ok": false}));
            report.failed.push(failure);
            continue;
        }

        let mut options = AICallOptions::new(task.user_prompt.clone());
        options.system_prompt = Some(task.system_prompt.clone());
        options.task_label = Some(task.id.clone());

        let outcome = match ctx
            .service
            .call(ctx.adapter, options, ctx.timeout, ctx.heap_mb)
            .await
        {
            Ok(response) => {
                let output_path = ctx.root.join(&task.output_path);
                match DirectoryOverview::write_preserving_user_content(&output_path, &response.text)
                {
                    Ok(()) => Ok(TaskOutcome {
                        task_id: task.id.clone(),
                        output_path,
                    }),
                    Err(e) => Err(TaskFailure {
                        task_id: task.id.clone(),
                        error: PipelineError::Write(e.to_string()),
                    }),
                }
            }
            Err(error) => Err(TaskFailure {
                task_id: task.id.clone(),
                error: error.into(),
            }),
        };

        ctx.trace.emit(
            TraceEventKind::TaskDone,
            json!({"task_id": task.id, "ok": outcome.is_ok()}),
        );
        match outcome {
            Ok(o) => report.succeeded.push(o),
            Err(f) => report.failed.push(f),
        }
    }

    ctx.trace
        .emit(TraceEventKind::PhaseEnd, json!({"phase": "directory"}));
}

/// The readiness predicate (spec §4.6): every file task this directory
/// task depends on must already have its artifact on disk, probed
/// directly against `file_tasks_by_id` rather than relying on in-memory
/// bookkeeping (a file task may have failed without the directory task
/// knowing about it any other way). Dependency ids that resolve to a
/// child directory task, not a file task, are skipped here — phase 2's
/// deepest-first ordering already guarantees those ran first.
fn directory_is_ready(root: &Path, task: &Task, file_tasks_by_id: &HashMap<&str, &Task>) -> bool {
    for dep_id in &task.depends_on {
        let Some(file_task) = file_tasks_by_id.get(dep_id.as_str()) else {
            continue;
        };
        if !root.join(&file_task.output_path).exists() {
            return false;
        }
    }
    true
}

async fn run_phase3(ctx: &PipelineContext<'_>, tasks: &[Task], report: &mut PipelineReport) {
    if tasks.is_empty() {
        return;
    }
    ctx.trace
        .emit(TraceEventKind::PhaseStart, json!({"phase": "root", "count": tasks.len()}));

    for task in tasks {
        ctx.trace
            .emit(TraceEventKind::TaskPickup, json!({"task_id": task.id}));

        let mut options = AICallOptions::new(task.user_prompt.clone());
        options.system_prompt = Some(task.system_prompt.clone());
        options.task_label = Some(task.id.clone());

        let outcome = match ctx
            .service
            .call(ctx.adapter, options, ctx.timeout, ctx.heap_mb)
            .await
        {
            Ok(response) => {
                let output_path = ctx.root.join(&task.output_path);
                match std::fs::write(&output_path, &response.text) {
                    Ok(()) => Ok(TaskOutcome {
                        task_id: task.id.clone(),
                        output_path,
                    }),
                    Err(e) => Err(TaskFailure {
                        task_id: task.id.clone(),
                        error: PipelineError::Write(e.to_string()),
                    }),
                }
            }
            Err(error) => Err(TaskFailure {
                task_id: task.id.clone(),
                error: error.into(),
            }),
        };

        ctx.trace.emit(
            TraceEventKind::TaskDone,
            json!({"task_id": task.id, "ok": outcome.is_ok()}),
        );
        match outcome {
            Ok(o) => report.succeeded.push(o),
            Err(f) => report.failed.push(f),
        }
    }

    ctx.trace.emit(TraceEventKind::PhaseEnd, json!({"phase": "root"}));
}

/// Render a plan without calling the AI (dry-run mode, spec §4.6). Output
/// is deterministic with respect to the input plan.
pub fn render_dry_run(plan: &ExecutionPlan) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Phase 1 (file, parallel): {} tasks\n",
        plan.file_tasks.len()
    ));
    for t in &plan.file_tasks {
        out.push_str(&format!(
            "  - {} -> {}\n",
            t.target_path.display(),
            t.output_path.display()
        ));
    }
    out.push_str(&format!(
        "Phase 2 (directory, post-order): {} tasks\n",
        plan.directory_tasks.len()
    ));
    for t in &plan.directory_tasks {
        out.push_str(&format!(
            "  - {} (depth {}) -> {}\n",
            t.target_path.display(),
            t.depth(),
            t.output_path.display()
        ));
    }
    out.push_str(&format!(
        "Phase 3 (root, sequential): {} tasks\n",
        plan.root_tasks.len()
    ));
    for t in &plan.root_tasks {
        out.push_str(&format!(
            "  - {} -> {}\n",
            t.target_path.display(),
            t.output_path.display()
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::AIResponse;
    use crate::config::RetryConfig;
    use crate::task::TaskKind;
    use crate::telemetry::TelemetryRecorder;
    use crate::trace::NullTraceRecorder;
    use async_trait::async_trait;

    #[test]
    fn test_render_dry_run_is_deterministic() {
        let tasks = vec![Task::new("f1", TaskKind::File, "src/a.rs", "src/a.rs.sum")];
        let plan = ExecutionPlan::build(tasks).unwrap();
        let first = render_dry_run(&plan);
        let second = render_dry_run(&plan);
        assert_eq!(first, second);
        assert!(first.contains("src/a.rs"));
    }

    #[test]
    fn test_directory_is_ready_when_all_artifacts_present() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/a.rs"), b"fn a() {}").unwrap();
        Artifact::new(content_hash(b"fn a() {}"), "p", "body")
            .write(&dir.path().join("src/a.rs.sum"))
            .unwrap();

        let file_task = Task::new("file:src/a.rs", TaskKind::File, "src/a.rs", "src/a.rs.sum");
        let file_tasks_by_id: HashMap<&str, &Task> =
            [(file_task.id.as_str(), &file_task)].into_iter().collect();

        let mut task = Task::new("d1", TaskKind::Directory, "src", "src/OVERVIEW.md");
        task.depends_on = vec!["file:src/a.rs".to_string()];
        assert!(directory_is_ready(dir.path(), &task, &file_tasks_by_id));
    }

    #[test]
    fn test_directory_not_ready_when_artifact_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/a.rs"), b"fn a() {}").unwrap();

        let file_task = Task::new("file:src/a.rs", TaskKind::File, "src/a.rs", "src/a.rs.sum");
        let file_tasks_by_id: HashMap<&str, &Task> =
            [(file_task.id.as_str(), &file_task)].into_iter().collect();

        let mut task = Task::new("d1", TaskKind::Directory, "src", "src/OVERVIEW.md");
        task.depends_on = vec!["file:src/a.rs".to_string()];
        assert!(!directory_is_ready(dir.path(), &task, &file_tasks_by_id));
    }

    #[test]
    fn test_directory_is_ready_ignores_non_task_files() {
        // A directory containing OVERVIEW.md, ARCHITECTURE.md, or
        // .fieldnotes.toml (none of which are discovered source files or
        // have an associated file task) must still read as ready.
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/a.rs"), b"fn a() {}").unwrap();
        std::fs::write(dir.path().join("src/OVERVIEW.md"), b"generated").unwrap();
        Artifact::new(content_hash(b"fn a() {}"), "p", "body")
            .write(&dir.path().join("src/a.rs.sum"))
            .unwrap();

        let file_task = Task::new("file:src/a.rs", TaskKind::File, "src/a.rs", "src/a.rs.sum");
        let file_tasks_by_id: HashMap<&str, &Task> =
            [(file_task.id.as_str(), &file_task)].into_iter().collect();

        let mut task = Task::new("d1", TaskKind::Directory, "src", "src/OVERVIEW.md");
        task.depends_on = vec!["file:src/a.rs".to_string()];
        assert!(directory_is_ready(dir.path(), &task, &file_tasks_by_id));
    }

    struct EchoAdapter;

    #[async_trait]
    impl Adapter for EchoAdapter {
        fn name(&self) -> &'static str {
            "echo-adapter"
        }
        fn cli_command(&self) -> &'static str {
            "echo"
        }
        fn is_available(&self) -> bool {
            true
        }
        fn build_args(&self, options: &AICallOptions) -> Vec<String> {
            vec![format!("summary for {}", options.prompt)]
        }
        fn parse_response(
            &self,
            stdout: &[u8],
            wall_ms: u64,
            exit_code: i32,
        ) -> crate::error::Result<AIResponse> {
            let text = String::from_utf8_lossy(stdout).trim().to_string();
            Ok(AIResponse {
                text,
                model: None,
                input_tokens: 0,
                output_tokens: 0,
                cache_read_tokens: 0,
                cache_creation_tokens: 0,
                duration_ms: wall_ms,
                exit_code,
                raw: serde_json::Value::Null,
            })
        }
        fn install_instructions(&self) -> String {
            "echo is preinstalled".to_string()
        }
    }

    #[tokio::test]
    async fn test_run_plan_phase1_writes_artifact() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), b"fn a() {}").unwrap();

        let mut task = Task::new("f1", TaskKind::File, "a.rs", "a.rs.sum");
        task.source_path = Some(dir.path().join("a.rs"));
        task.user_prompt = "summarize a.rs".to_string();

        let plan = ExecutionPlan::build(vec![task]).unwrap();
        let adapter = EchoAdapter;
        let service = Arc::new(AiCallService::new(
            Arc::new(TelemetryRecorder::new()),
            Arc::new(NullTraceRecorder),
            RetryConfig::default(),
            dir.path().to_path_buf(),
        ));

        let ctx = PipelineContext {
            root: dir.path(),
            service,
            adapter: &adapter,
            trace: Arc::new(NullTraceRecorder),
            timeout: Duration::from_secs(5),
            heap_mb: 512,
            concurrency: 2,
            fail_fast: false,
        };

        let report = run_plan(&ctx, plan).await;
        assert_eq!(report.succeeded.len(), 1);
        assert!(!report.has_failures());
        assert!(dir.path().join("a.rs.sum").exists());
    }
}
