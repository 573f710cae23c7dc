//! Task and execution-plan data model (spec §3.1).

use std::collections::HashMap;
use std::path::PathBuf;

use serde_json::Value;

/// Which of the three ordered phases a task belongs to.
///
/// Ordering is significant: `File < Directory < Root`, and a task's
/// dependencies must all belong to a strictly preceding kind (except
/// within `Directory`, where a task may depend on other directory tasks
/// of strictly greater path depth).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskKind {
    File,
    Directory,
    Root,
}

/// One unit of AI work. Immutable once created.
#[derive(Debug, Clone)]
pub struct Task {
    /// Stable identifier, unique within a plan.
    pub id: String,
    pub kind: TaskKind,
    /// Path relative to the project root.
    pub target_path: PathBuf,
    /// Absolute path to the source file. Only populated for `File` tasks.
    pub source_path: Option<PathBuf>,
    pub system_prompt: String,
    pub user_prompt: String,
    /// Where the produced artifact or overview should be written.
    pub output_path: PathBuf,
    /// Identifiers of tasks this task depends on.
    pub depends_on: Vec<String>,
    /// Opaque metadata the external caller may attach and later inspect.
    pub metadata: HashMap<String, Value>,
}

impl Task {
    pub fn new(
        id: impl Into<String>,
        kind: TaskKind,
        target_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            target_path: target_path.into(),
            source_path: None,
            system_prompt: String::new(),
            user_prompt: String::new(),
            output_path: output_path.into(),
            depends_on: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Depth of `target_path`, counted as the number of path components.
    /// Used by Phase 2's deepest-first ordering.
    pub fn depth(&self) -> usize {
        self.target_path.components().count()
    }
}

/// A validation failure discovered while assembling an [`ExecutionPlan`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("task {0:?} depends on unknown task {1:?}")]
    DanglingDependency(String, String),
    #[error("task {0:?} (kind {1:?}) depends on task {2:?} (kind {3:?}), violating phase order")]
    PhaseOrderViolation(String, TaskKind, String, TaskKind),
    #[error("duplicate task id {0:?}")]
    DuplicateId(String),
}

/// Three partitioned lists of tasks, ordered and validated.
#[derive(Debug, Clone, Default)]
pub struct ExecutionPlan {
    pub file_tasks: Vec<Task>,
    /// Ordered deepest-first (see [`Task::depth`]).
    pub directory_tasks: Vec<Task>,
    pub root_tasks: Vec<Task>,
}

impl ExecutionPlan {
    /// Build a plan from an unordered set of tasks, sorting directory tasks
    /// deepest-first and validating §3.1's invariants.
    pub fn build(tasks: Vec<Task>) -> Result<Self, PlanError> {
        let mut seen = std::collections::HashSet::new();
        let mut by_id: HashMap<String, TaskKind> = HashMap::new();
        for t in &tasks {
            if !seen.insert(t.id.clone()) {
                return Err(PlanError::DuplicateId(t.id.clone()));
            }
            by_id.insert(t.id.clone(), t.kind);
        }

        for t in &tasks {
            for dep in &t.depends_on {
                let dep_kind = by_id
                    .get(dep)
                    .ok_or_else(|| PlanError::DanglingDependency(t.id.clone(), dep.clone()))?;
                let ok = match (t.kind, *dep_kind) {
                    (TaskKind::Directory, TaskKind::File) => true,
                    (TaskKind::Directory, TaskKind::Directory) => true,
                    (TaskKind::Root, TaskKind::File) => true,
                    (TaskKind::Root, TaskKind::Directory) => true,
                    (TaskKind::Root, TaskKind::Root) => true,
                    _ => false,
                };
                if !ok {
                    return Err(PlanError::PhaseOrderViolation(
                        t.id.clone(),
                        t.kind,
                        dep.clone(),
                        *dep_kind,
                    ));
                }
            }
        }

        let mut file_tasks = Vec::new();
        let mut directory_tasks = Vec::new();
        let mut root_tasks = Vec::new();
        for t in tasks {
            match t.kind {
                TaskKind::File => file_tasks.push(t),
                TaskKind::Directory => directory_tasks.push(t),
                TaskKind::Root => root_tasks.push(t),
            }
        }

        // Deepest-first; ties broken by stable lexicographic path order,
        // which Rust's stable sort preserves from insertion order.
        directory_tasks.sort_by(|a, b| {
            b.depth()
                .cmp(&a.depth())
                .then_with(|| a.target_path.cmp(&b.target_path))
        });

        Ok(Self {
            file_tasks,
            directory_tasks,
            root_tasks,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.file_tasks.is_empty() && self.directory_tasks.is_empty() && self.root_tasks.is_empty()
    }

    pub fn total_tasks(&self) -> usize {
        self.file_tasks.len() + self.directory_tasks.len() + self.root_tasks.len()
    }
}
