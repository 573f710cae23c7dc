//! Artifact and directory-overview file formats (spec §3.1, §6).

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// The HTML-comment sentinel marking a file as tool-generated. Its absence
/// means the file is user-authored and must be preserved (spec §4.6, §6).
pub const GENERATED_MARKER: &str = "<!-- Generated by fieldnotes -->";

/// A per-file summary artifact (spec §3.1).
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub generated_at: DateTime<Utc>,
    /// 64-char lowercase hex SHA-256 of the source file's raw bytes.
    pub content_hash: String,
    pub purpose: String,
    pub body: String,
}

/// Compute the content hash for a file's raw bytes, per spec §3.1.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn is_valid_hash(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
}

impl Artifact {
    pub fn new(content_hash: String, purpose: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            generated_at: Utc::now(),
            content_hash,
            purpose: purpose.into(),
            body: body.into(),
        }
    }

    /// Serialize to the artifact file format:
    ///
    /// ```text
    /// ---
    /// generated_at: <ISO-8601>
    /// content_hash: <64 lowercase hex chars>
    /// purpose: <one line>
    /// ---
    ///
    /// <free-form summary body>
    /// ```
    pub fn render(&self) -> String {
        format!(
            "---\ngenerated_at: {}\ncontent_hash: {}\npurpose: {}\n---\n\n{}",
            self.generated_at.to_rfc3339(),
            self.content_hash,
            self.purpose,
            self.body
        )
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.render())?;
        Ok(())
    }

    /// Read an artifact back from disk with tolerant frontmatter parsing:
    /// keys are matched case-insensitively, values are trimmed, and any
    /// hash failing `^[0-9a-f]{64}$` is treated as absent (returns `Ok(None)`
    /// rather than an error, per spec §6).
    pub fn read(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(Self::parse(&raw))
    }

    fn parse(raw: &str) -> Option<Self> {
        let rest = raw.strip_prefix("---\n")?;
        let end = rest.find("\n---")?;
        let frontmatter = &rest[..end];
        let after = &rest[end + 4..];
        let body = after.strip_prefix('\n').unwrap_or(after);
        let body = body.strip_prefix('\n').unwrap_or(body);

        let mut generated_at = None;
        let mut content_hash = None;
        let mut purpose = None;

        for line in frontmatter.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim().to_string();
            match key.as_str() {
                "generated_at" => generated_at = DateTime::parse_from_rfc3339(&value).ok(),
                "content_hash" => content_hash = Some(value),
                "purpose" => purpose = Some(value),
                _ => {}
            }
        }

        let content_hash = content_hash.filter(|h| is_valid_hash(h))?;
        let generated_at = generated_at?.with_timezone(&Utc);

        Some(Self {
            generated_at,
            content_hash,
            purpose: purpose.unwrap_or_default(),
            body: body.to_string(),
        })
    }
}

/// Compute the artifact path for a source file: the source path with a
/// `.sum` suffix appended, stored beside it (spec §6).
pub fn artifact_path_for(source_path: &Path) -> std::path::PathBuf {
    let mut s = source_path.as_os_str().to_os_string();
    s.push(".sum");
    s.into()
}

/// A per-directory aggregated overview document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DirectoryOverview {
    pub body: String,
}

impl DirectoryOverview {
    /// True if `raw`'s first line is exactly [`GENERATED_MARKER`].
    pub fn is_generated(raw: &str) -> bool {
        raw.lines().next() == Some(GENERATED_MARKER)
    }

    pub fn render(body: &str) -> String {
        format!("{GENERATED_MARKER}\n\n{body}")
    }

    /// Write a freshly generated overview at `path`. If a file already
    /// exists at `path` and is user-authored (does not begin with the
    /// marker), it is renamed with a `.local` infix and its contents are
    /// prepended verbatim to the new content (spec §4.6). A re-run is
    /// idempotent: if `<path>.local` already exists and the current file at
    /// `path` is itself marked generated, no further rename occurs.
    pub fn write_preserving_user_content(path: &Path, body: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let local_path = local_sibling_path(path);
        let existing = if path.exists() {
            Some(std::fs::read_to_string(path)?)
        } else {
            None
        };

        let preserved = match existing {
            Some(raw) if !Self::is_generated(&raw) => {
                std::fs::write(&local_path, &raw)?;
                Some(raw)
            }
            _ => {
                if local_path.exists() {
                    Some(std::fs::read_to_string(&local_path)?)
                } else {
                    None
                }
            }
        };

        let rendered = Self::render(body);
        let full = match preserved {
            Some(prefix) => format!("{prefix}\n\n{rendered}"),
            None => rendered,
        };
        std::fs::write(path, full)?;
        Ok(())
    }

    /// Remove the overview at `path` only if it bears the generated marker;
    /// user-authored content is never deleted (spec §4.7 Cleanup).
    pub fn remove_if_generated(path: &Path) -> Result<bool> {
        if !path.exists() {
            return Ok(false);
        }
        let raw = std::fs::read_to_string(path)?;
        if Self::is_generated(&raw) {
            std::fs::remove_file(path)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

fn local_sibling_path(path: &Path) -> std::path::PathBuf {
    let stem = path.file_stem().unwrap_or_default().to_string_lossy();
    let ext = path.extension().map(|e| e.to_string_lossy().to_string());
    let mut name = format!("{stem}.local");
    if let Some(ext) = ext {
        name.push('.');
        name.push_str(&ext);
    }
    match path.parent() {
        Some(parent) => parent.join(name),
        None => std::path::PathBuf::from(name),
    }
}

/// Validate a hash read from untrusted input (e.g. VCS metadata) before
/// trusting it as a content hash.
pub fn validate_hash(h: &str) -> Result<()> {
    if is_valid_hash(h) {
        Ok(())
    } else {
        Err(Error::Config(format!("not a valid content hash: {h:?}")))
    }
}
