//! Full-generation run mode: every task in `tasks` runs, unconditionally.

use std::path::PathBuf;

use fieldnotes_core::config::FieldnotesConfig;
use fieldnotes_core::task::{ExecutionPlan, Task};

use crate::config::RunOptions;
use crate::error::Result;
use crate::output::RunOutput;
use crate::runner::execute_plan;

/// Everything `run_generate` needs: a task set already composed by the
/// caller (discovery + prompt composition are out-of-scope collaborators,
/// per spec.md §1 — owned by `fieldnotes-cli`, not this crate).
pub struct GenerateRequest {
    pub root: PathBuf,
    pub tasks: Vec<Task>,
    pub options: RunOptions,
}

/// Run a full generation: assemble `request.tasks` into an
/// [`ExecutionPlan`] and drive every task through all three phases.
pub async fn run_generate(request: GenerateRequest) -> Result<RunOutput> {
    let config = FieldnotesConfig::load(&request.root)?;
    let plan = ExecutionPlan::build(request.tasks)?;
    execute_plan(&request.root, plan, &config, &request.options).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldnotes_core::task::TaskKind;

    #[tokio::test]
    async fn test_run_generate_dry_run_renders_plan() {
        let dir = tempfile::tempdir().unwrap();
        let tasks = vec![Task::new("f1", TaskKind::File, "a.rs", "a.rs.sum")];
        let request = GenerateRequest {
            root: dir.path().to_path_buf(),
            tasks,
            options: RunOptions {
                dry_run: true,
                ..Default::default()
            },
        };

        let output = run_generate(request).await.unwrap();
        assert!(output.dry_run);
        assert!(output.is_success());
    }

    #[tokio::test]
    async fn test_run_generate_rejects_invalid_plan() {
        let dir = tempfile::tempdir().unwrap();
        let mut bad = Task::new("f1", TaskKind::File, "a.rs", "a.rs.sum");
        bad.depends_on = vec!["missing".to_string()];
        let request = GenerateRequest {
            root: dir.path().to_path_buf(),
            tasks: vec![bad],
            options: RunOptions::default(),
        };

        assert!(run_generate(request).await.is_err());
    }
}
