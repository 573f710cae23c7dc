//! Incremental-update run mode: only tasks touched by a changed file
//! (spec §4.7) run; everything else is skipped without a backend call.

use std::collections::BTreeSet;
use std::path::PathBuf;

use fieldnotes_core::changes::{cleanup_deleted, detect_changes, ChangeKind};
use fieldnotes_core::config::FieldnotesConfig;
use fieldnotes_core::task::{ExecutionPlan, Task, TaskKind};

use crate::config::RunOptions;
use crate::error::Result;
use crate::output::RunOutput;
use crate::runner::execute_plan;

/// Everything `run_update` needs: the same full candidate task set a
/// `generate` run would use, plus enough of a project snapshot to run
/// change detection over it.
pub struct UpdateRequest {
    pub root: PathBuf,
    /// Every source file currently on disk, relative to `root` (the
    /// caller's discovery pass — an out-of-scope collaborator per
    /// spec.md §1).
    pub discovered: Vec<PathBuf>,
    /// Source paths of every artifact known from a prior run (e.g. a walk
    /// of existing `*.sum` files).
    pub known_artifact_sources: Vec<PathBuf>,
    /// The full candidate task set, as a `generate` run would build it;
    /// filtered down to only what changed.
    pub all_tasks: Vec<Task>,
    pub options: RunOptions,
}

/// Run an incremental update: classify `discovered` against on-disk
/// artifacts, clean up orphaned artifacts for deletions, and run only the
/// file tasks for added/modified sources plus the directory and root
/// tasks whose subtree was touched.
pub async fn run_update(request: UpdateRequest) -> Result<RunOutput> {
    let config = FieldnotesConfig::load(&request.root)?;

    let change_set = detect_changes(
        &request.root,
        &request.discovered,
        &request.known_artifact_sources,
    )?;
    cleanup_deleted(&request.root, &change_set)?;

    let anything_changed = change_set
        .changes
        .iter()
        .any(|c| c.kind != ChangeKind::Unchanged);

    if !anything_changed {
        return Ok(RunOutput {
            dry_run: request.options.dry_run,
            succeeded: 0,
            failed: 0,
            failures: Vec::new(),
            plan_rendering: request
                .options
                .dry_run
                .then(|| "No changes detected; nothing to do.".to_string()),
        });
    }

    let to_rerun: BTreeSet<PathBuf> = change_set.to_rerun().into_iter().collect();
    let tasks: Vec<Task> = request
        .all_tasks
        .into_iter()
        .filter(|t| match t.kind {
            TaskKind::File => to_rerun.contains(&t.target_path),
            TaskKind::Directory => change_set.affected_directories.contains(&t.target_path),
            TaskKind::Root => true,
        })
        .collect();

    let plan = ExecutionPlan::build(tasks)?;
    execute_plan(&request.root, plan, &config, &request.options).await
}
