//! Shared internals behind `run_generate` and `run_update`: wiring a
//! [`FieldnotesConfig`] and a resolved [`Adapter`] into a live
//! [`PipelineContext`] and driving a plan through it, mirroring the
//! teacher's single `runner.rs` (we split the public entry points across
//! `generate.rs`/`update.rs` instead, since the two modes assemble their
//! task lists differently).

use std::sync::Arc;
use std::time::Duration;

use fieldnotes_core::adapters::default_registry;
use fieldnotes_core::call_service::AiCallService;
use fieldnotes_core::config::FieldnotesConfig;
use fieldnotes_core::pipeline::{render_dry_run, run_plan, PipelineContext};
use fieldnotes_core::task::ExecutionPlan;
use fieldnotes_core::telemetry::TelemetryRecorder;
use fieldnotes_core::trace::{FileTraceRecorder, NullTraceRecorder, TraceRecorder};

use crate::config::RunOptions;
use crate::error::Result;
use crate::output::{FailureRecord, RunOutput};

/// Resolve an adapter by name, or auto-detect the first available one.
fn resolve_adapter(
    registry: &fieldnotes_core::adapter::AdapterRegistry,
    options: &RunOptions,
) -> fieldnotes_core::error::Result<&dyn fieldnotes_core::adapter::Adapter> {
    match &options.backend {
        Some(name) => registry.resolve(name),
        None => registry.auto_detect(),
    }
}

/// Build a trace recorder for the run: a real NDJSON file unless the
/// filesystem write fails, in which case we fall back to a null recorder
/// rather than fail the whole run over a diagnostics sink.
fn build_trace_recorder(root: &std::path::Path, traces_dir_name: &str) -> Arc<dyn TraceRecorder> {
    match FileTraceRecorder::new(root, traces_dir_name) {
        Ok(recorder) => Arc::new(recorder),
        Err(e) => {
            tracing::warn!(error = %e, "falling back to a null trace recorder");
            Arc::new(NullTraceRecorder)
        }
    }
}

/// Drive `plan` to completion (or just render it, for a dry run) and
/// produce the caller-facing [`RunOutput`].
pub(crate) async fn execute_plan(
    root: &std::path::Path,
    plan: ExecutionPlan,
    config: &FieldnotesConfig,
    options: &RunOptions,
) -> Result<RunOutput> {
    if options.dry_run {
        return Ok(RunOutput {
            dry_run: true,
            succeeded: 0,
            failed: 0,
            failures: Vec::new(),
            plan_rendering: Some(render_dry_run(&plan)),
        });
    }

    let registry = default_registry();
    let adapter = resolve_adapter(&registry, options)?;
    adapter.ensure_project_config(root).await?;

    let telemetry = Arc::new(TelemetryRecorder::new());
    let trace = build_trace_recorder(root, &config.paths.traces_dir);

    let service = Arc::new(AiCallService::new(
        telemetry.clone(),
        trace.clone(),
        config.retry.clone(),
        root.to_path_buf(),
    ));

    let concurrency = options
        .concurrency
        .or(config.concurrency)
        .unwrap_or_else(fieldnotes_core::config::host_concurrency);
    let timeout = Duration::from_millis(options.timeout_ms.unwrap_or(config.subprocess.timeout_ms));

    let ctx = PipelineContext {
        root,
        service,
        adapter,
        trace,
        timeout,
        heap_mb: config.subprocess.child_heap_mb,
        concurrency,
        fail_fast: options.fail_fast,
    };

    let report = run_plan(&ctx, plan).await;
    telemetry.finalize(root, &config.paths.logs_dir, config.paths.retention);

    let failures = report
        .failed
        .iter()
        .map(|f| FailureRecord {
            task_id: f.task_id.clone(),
            error: f.error.to_string(),
        })
        .collect();

    Ok(RunOutput {
        dry_run: false,
        succeeded: report.succeeded.len(),
        failed: report.failed.len(),
        failures,
        plan_rendering: None,
    })
}
