//! Gitignore-aware source discovery (spec §1 names this an out-of-scope
//! collaborator; implemented here only so the binary is runnable).

use std::io;
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;

fn is_relevant_source_file(path: &Path) -> bool {
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n,
        None => return false,
    };
    if name.ends_with(".sum") {
        return false;
    }
    if name == "OVERVIEW.md" || name == "ARCHITECTURE.md" || name == ".fieldnotes.toml" {
        return false;
    }
    true
}

/// Walk `root` respecting `.gitignore`/`.ignore`, returning every relevant
/// source file as a path relative to `root`, sorted.
pub fn discover_source_files(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for result in WalkBuilder::new(root).build() {
        let entry = result.map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let path = entry.path();
        if !is_relevant_source_file(path) {
            continue;
        }
        if let Ok(rel) = path.strip_prefix(root) {
            files.push(rel.to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

/// Walk `root` for existing `*.sum` artifacts, returning the source path
/// each one covers (relative to `root`, suffix stripped), sorted.
pub fn discover_known_artifact_sources(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut sources = Vec::new();
    for result in WalkBuilder::new(root).build() {
        let entry = result.map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(stripped) = name.strip_suffix(".sum") else {
            continue;
        };
        let source_path = path.with_file_name(stripped);
        if let Ok(rel) = source_path.strip_prefix(root) {
            sources.push(rel.to_path_buf());
        }
    }
    sources.sort();
    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, content: &str) {
        let abs = root.join(rel);
        std::fs::create_dir_all(abs.parent().unwrap()).unwrap();
        std::fs::write(abs, content).unwrap();
    }

    #[test]
    fn test_discover_skips_artifacts_and_overviews() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/a.rs", "fn a() {}");
        write(dir.path(), "src/a.rs.sum", "---\n---\n\nbody");
        write(dir.path(), "src/OVERVIEW.md", "<!-- Generated by fieldnotes -->\n");
        write(dir.path(), ".fieldnotes.toml", "");

        let files = discover_source_files(dir.path()).unwrap();
        assert_eq!(files, vec![PathBuf::from("src/a.rs")]);
    }

    #[test]
    fn test_discover_respects_gitignore() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), ".gitignore", "ignored.rs\n");
        write(dir.path(), "src/a.rs", "fn a() {}");
        write(dir.path(), "src/ignored.rs", "fn b() {}");

        let files = discover_source_files(dir.path()).unwrap();
        assert_eq!(files, vec![PathBuf::from("src/a.rs")]);
    }

    #[test]
    fn test_discover_known_artifact_sources_strips_suffix() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/a.rs.sum", "---\n---\n\nbody");

        let sources = discover_known_artifact_sources(dir.path()).unwrap();
        assert_eq!(sources, vec![PathBuf::from("src/a.rs")]);
    }
}
