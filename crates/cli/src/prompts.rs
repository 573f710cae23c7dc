//! Task construction and prompt composition (spec §1 names this an
//! out-of-scope collaborator too; implemented minimally so the binary is
//! runnable).
//!
//! Builds the full candidate task set for a project: one file task per
//! discovered source file, one directory task per directory that contains
//! (transitively) a discovered file, and a single root task synthesizing
//! the whole tree — ordered and validated by
//! [`fieldnotes_core::task::ExecutionPlan::build`].

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use fieldnotes_core::artifact::artifact_path_for;
use fieldnotes_core::task::{Task, TaskKind};

const ROOT_DOC: &str = "ARCHITECTURE.md";

fn file_system_prompt() -> String {
    "You are fieldnotes, a documentation assistant. Summarize the given \
     source file concisely for a developer unfamiliar with it."
        .to_string()
}

fn file_user_prompt(rel: &Path) -> String {
    format!(
        "Summarize the file at `{}`. Describe its purpose, key types or \
         functions, and any behavior a newcomer should know about.",
        rel.display()
    )
}

fn directory_system_prompt() -> String {
    "You are fieldnotes, a documentation assistant. Write a short overview \
     of a directory from its files' summaries."
        .to_string()
}

fn directory_user_prompt(dir: &Path) -> String {
    let label = if dir.as_os_str().is_empty() {
        "the project root".to_string()
    } else {
        format!("`{}`", dir.display())
    };
    format!(
        "Using the per-file summaries inside {label}, write a short overview \
         of this directory's contents and how its pieces fit together."
    )
}

fn root_system_prompt() -> String {
    "You are fieldnotes, a documentation assistant. Synthesize directory \
     overviews into top-level orientation documentation for a new \
     contributor."
        .to_string()
}

fn root_user_prompt() -> String {
    "Using the directory overviews below, write top-level orientation \
     documentation: what this project is, how it is organized, and where \
     a new contributor should start reading."
        .to_string()
}

fn directory_task_id(dir: &Path) -> String {
    if dir.as_os_str().is_empty() {
        "dir:.".to_string()
    } else {
        format!("dir:{}", dir.display())
    }
}

fn overview_path(dir: &Path) -> PathBuf {
    if dir.as_os_str().is_empty() {
        PathBuf::from("OVERVIEW.md")
    } else {
        dir.join("OVERVIEW.md")
    }
}

fn ancestors_including_root(dir: &Path) -> Vec<PathBuf> {
    let mut result = Vec::new();
    let mut current = Some(dir);
    while let Some(d) = current {
        result.push(d.to_path_buf());
        if d.as_os_str().is_empty() {
            break;
        }
        current = d.parent();
    }
    result
}

/// Build the full candidate task set for `discovered` (paths relative to
/// `root`). `root` is used only to populate each file task's absolute
/// `source_path`.
pub fn build_tasks(root: &Path, discovered: &[PathBuf]) -> Vec<Task> {
    if discovered.is_empty() {
        return Vec::new();
    }

    let mut tasks = Vec::new();
    let mut all_dirs: BTreeSet<PathBuf> = BTreeSet::new();
    let mut file_ids_by_dir: BTreeMap<PathBuf, Vec<String>> = BTreeMap::new();

    for rel in discovered {
        let id = format!("file:{}", rel.display());
        let abs_source = root.join(rel);
        let mut task = Task::new(id.clone(), TaskKind::File, rel.clone(), artifact_path_for(rel));
        task.source_path = Some(abs_source);
        task.system_prompt = file_system_prompt();
        task.user_prompt = file_user_prompt(rel);
        tasks.push(task);

        let parent = rel.parent().unwrap_or_else(|| Path::new("")).to_path_buf();
        file_ids_by_dir.entry(parent.clone()).or_default().push(id);
        for ancestor in ancestors_including_root(&parent) {
            all_dirs.insert(ancestor);
        }
    }

    let mut children_by_dir: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
    for dir in &all_dirs {
        if dir.as_os_str().is_empty() {
            continue;
        }
        let parent = dir.parent().unwrap_or_else(|| Path::new("")).to_path_buf();
        children_by_dir.entry(parent).or_default().push(dir.clone());
    }

    for dir in &all_dirs {
        let id = directory_task_id(dir);
        let mut task = Task::new(id.clone(), TaskKind::Directory, dir.clone(), overview_path(dir));
        task.system_prompt = directory_system_prompt();
        task.user_prompt = directory_user_prompt(dir);

        let mut deps: Vec<String> = file_ids_by_dir
            .get(dir)
            .cloned()
            .unwrap_or_default();
        if let Some(children) = children_by_dir.get(dir) {
            deps.extend(children.iter().map(|c| directory_task_id(c)));
        }
        task.depends_on = deps;
        tasks.push(task);
    }

    let mut root_task = Task::new("root", TaskKind::Root, PathBuf::new(), PathBuf::from(ROOT_DOC));
    root_task.system_prompt = root_system_prompt();
    root_task.user_prompt = root_user_prompt();
    root_task.depends_on = all_dirs.iter().map(|d| directory_task_id(d)).collect();
    tasks.push(root_task);

    tasks
}
