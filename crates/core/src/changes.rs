//! Incremental change detection (spec §4.7).
//!
//! Requires nothing outside the tree itself: no database, no state file.
//! The sole change-detection key is the content hash embedded in each
//! artifact's frontmatter.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::artifact::{artifact_path_for, content_hash, Artifact, DirectoryOverview};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

/// Result of running change detection over a discovered file list.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub changes: Vec<FileChange>,
    /// Union of ancestor directories of every non-`Unchanged` classification,
    /// up to and including the project root. Drives Phase 2 even when most
    /// file tasks were skipped (spec §4.7).
    pub affected_directories: BTreeSet<PathBuf>,
}

impl ChangeSet {
    pub fn added(&self) -> impl Iterator<Item = &FileChange> {
        self.changes.iter().filter(|c| c.kind == ChangeKind::Added)
    }

    pub fn modified(&self) -> impl Iterator<Item = &FileChange> {
        self.changes
            .iter()
            .filter(|c| c.kind == ChangeKind::Modified)
    }

    pub fn deleted(&self) -> impl Iterator<Item = &FileChange> {
        self.changes
            .iter()
            .filter(|c| c.kind == ChangeKind::Deleted)
    }

    /// File paths that require an AI call: added or modified.
    pub fn to_rerun(&self) -> Vec<PathBuf> {
        self.changes
            .iter()
            .filter(|c| matches!(c.kind, ChangeKind::Added | ChangeKind::Modified))
            .map(|c| c.path.clone())
            .collect()
    }
}

fn ancestors_up_to_root(path: &Path, root: &Path) -> Vec<PathBuf> {
    let mut result = Vec::new();
    let mut current = path.parent();
    while let Some(dir) = current {
        result.push(dir.to_path_buf());
        if dir == root {
            break;
        }
        current = dir.parent();
    }
    result
}

/// Classify every file in `discovered` (paths relative to `root`) against
/// its on-disk artifact, and detect deletions among `known_artifacts`
/// (artifact paths previously seen, e.g. from a prior run's manifest or a
/// directory walk of `*.sum` files).
///
/// `discovered` and `known_artifacts` are both relative to `root`.
pub fn detect_changes(
    root: &Path,
    discovered: &[PathBuf],
    known_artifact_sources: &[PathBuf],
) -> Result<ChangeSet> {
    let mut changes = Vec::new();
    let mut affected_directories = BTreeSet::new();
    let discovered_set: BTreeSet<&PathBuf> = discovered.iter().collect();

    for rel in discovered {
        let abs = root.join(rel);
        let artifact_path = artifact_path_for(&abs);
        let bytes = std::fs::read(&abs)?;
        let current = content_hash(&bytes);

        let kind = match Artifact::read(&artifact_path)? {
            None => ChangeKind::Added,
            Some(a) if a.content_hash != current => ChangeKind::Modified,
            Some(_) => ChangeKind::Unchanged,
        };

        if kind != ChangeKind::Unchanged {
            for dir in ancestors_up_to_root(rel, Path::new("")) {
                affected_directories.insert(dir);
            }
        }

        changes.push(FileChange {
            path: rel.clone(),
            kind,
        });
    }

    for rel in known_artifact_sources {
        if !discovered_set.contains(rel) {
            for dir in ancestors_up_to_root(rel, Path::new("")) {
                affected_directories.insert(dir);
            }
            changes.push(FileChange {
                path: rel.clone(),
                kind: ChangeKind::Deleted,
            });
        }
    }

    affected_directories.insert(PathBuf::new());

    Ok(ChangeSet {
        changes,
        affected_directories,
    })
}

/// Clean up orphaned artifacts for every `Deleted` classification, and
/// remove any directory overview that becomes empty of artifacts as a
/// result, provided it still bears the generated marker (spec §4.7
/// Cleanup). Never deletes user-authored overviews.
pub fn cleanup_deleted(root: &Path, change_set: &ChangeSet) -> Result<()> {
    let mut touched_dirs = BTreeSet::new();

    for change in change_set.deleted() {
        let abs = root.join(&change.path);
        let artifact_path = artifact_path_for(&abs);
        if artifact_path.exists() {
            std::fs::remove_file(&artifact_path)?;
        }
        if let Some(parent) = change.path.parent() {
            touched_dirs.insert(root.join(parent));
        }
    }

    for dir in touched_dirs {
        if dir_has_no_artifacts(&dir)? {
            let overview_path = dir.join("OVERVIEW.md");
            DirectoryOverview::remove_if_generated(&overview_path)?;
        }
    }

    Ok(())
}

fn dir_has_no_artifacts(dir: &Path) -> Result<bool> {
    if !dir.exists() {
        return Ok(true);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().ends_with(".sum") {
            return Ok(false);
        }
    }
    Ok(true)
}
