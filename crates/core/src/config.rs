//! Configuration for the fieldnotes execution core.
//!
//! Defaults are expressed as `impl Default` on each sub-config, mirroring the
//! teacher's `RetryConfig` / `ModelProviderInfo` pattern. Everything here is
//! loadable from a project-root `.fieldnotes.toml`; any field left absent in
//! the file falls back to its default via `#[serde(default)]`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Backoff / retry tunables for the retry controller (spec §4.3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Base delay before the first retry, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Ceiling on the computed delay, before jitter, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Exponential multiplier applied per attempt.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Maximum number of retries after the initial attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    8000
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_max_retries() -> u32 {
    3
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            max_retries: default_max_retries(),
        }
    }
}

/// Output directory layout, relative to the project root (spec §4.8, §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathsConfig {
    /// Directory run logs are written under.
    #[serde(default = "default_logs_dir")]
    pub logs_dir: String,
    /// Directory NDJSON traces are written under.
    #[serde(default = "default_traces_dir")]
    pub traces_dir: String,
    /// Number of most-recent run logs to retain; older ones are deleted.
    #[serde(default = "default_retention")]
    pub retention: usize,
}

fn default_logs_dir() -> String {
    "logs".to_string()
}
fn default_traces_dir() -> String {
    "traces".to_string()
}
fn default_retention() -> usize {
    50
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            logs_dir: default_logs_dir(),
            traces_dir: default_traces_dir(),
            retention: default_retention(),
        }
    }
}

/// Per-call subprocess timeouts and resource envelope (spec §4.1, §5).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubprocessConfig {
    /// Wall-clock timeout per AI call, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Grace period after the polite terminate signal before hard-kill.
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,
    /// Output buffer cap, in bytes, before `BUFFER_EXCEEDED`.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    /// Advisory heap ceiling communicated to the child via environment, in MB.
    #[serde(default = "default_child_heap_mb")]
    pub child_heap_mb: u64,
}

fn default_timeout_ms() -> u64 {
    5 * 60 * 1000
}
fn default_grace_ms() -> u64 {
    5000
}
fn default_max_output_bytes() -> usize {
    10 * 1024 * 1024
}
fn default_child_heap_mb() -> u64 {
    512
}

impl Default for SubprocessConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            grace_ms: default_grace_ms(),
            max_output_bytes: default_max_output_bytes(),
            child_heap_mb: default_child_heap_mb(),
        }
    }
}

/// Top-level configuration for a fieldnotes run, loadable from
/// `.fieldnotes.toml` at the project root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldnotesConfig {
    /// Explicit backend name; `None` means auto-detect (spec §4.2).
    #[serde(default)]
    pub backend: Option<String>,
    /// Concurrency override for Phase 1; `None` means derive from host
    /// resources via [`derive_concurrency`].
    #[serde(default)]
    pub concurrency: Option<usize>,
    /// Similarity threshold (0.0-1.0) above which a deleted+added pair of
    /// file tasks is treated as a rename rather than independent
    /// delete/add. Kept injectable per spec §9's open question.
    #[serde(default = "default_rename_similarity")]
    pub rename_similarity_threshold: f64,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub subprocess: SubprocessConfig,
}

fn default_rename_similarity() -> f64 {
    0.85
}

impl Default for FieldnotesConfig {
    fn default() -> Self {
        Self {
            backend: None,
            concurrency: None,
            rename_similarity_threshold: default_rename_similarity(),
            retry: RetryConfig::default(),
            paths: PathsConfig::default(),
            subprocess: SubprocessConfig::default(),
        }
    }
}

impl FieldnotesConfig {
    /// Load configuration from `<root>/.fieldnotes.toml`, falling back to
    /// defaults entirely if the file is absent.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(".fieldnotes.toml");
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)?;
        let config: Self = toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Collect all configuration problems rather than failing on the first
    /// one, matching the teacher's preference for reporting everything
    /// wrong in one pass.
    pub fn validate(&self) -> Result<()> {
        let mut issues = Vec::new();

        if self.retry.multiplier <= 1.0 {
            issues.push("retry.multiplier must be greater than 1.0".to_string());
        }
        if self.retry.base_delay_ms == 0 {
            issues.push("retry.base_delay_ms must be non-zero".to_string());
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            issues.push("retry.max_delay_ms must be >= retry.base_delay_ms".to_string());
        }
        if !(0.0..=1.0).contains(&self.rename_similarity_threshold) {
            issues.push("rename_similarity_threshold must be within [0.0, 1.0]".to_string());
        }
        if self.paths.retention == 0 {
            issues.push("paths.retention must be at least 1".to_string());
        }
        if let Some(c) = self.concurrency {
            if c == 0 {
                issues.push("concurrency override must be at least 1".to_string());
            }
        }
        if self.subprocess.timeout_ms == 0 {
            issues.push("subprocess.timeout_ms must be non-zero".to_string());
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(issues.join("; ")))
        }
    }

    pub fn logs_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.paths.logs_dir)
    }

    pub fn traces_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.paths.traces_dir)
    }
}

/// Derive Phase 1 concurrency from host resources (spec §5):
///
/// ```text
/// N = clamp(cores * 5, 2, min(20, floor(totalMemGB * 0.5 / 0.512)))
/// ```
///
/// The cores multiplier acknowledges that each worker spends most of its
/// time waiting on a subprocess's I/O, not computing; the memory ceiling
/// keeps us from spawning more children than the host can hold at the
/// ~512 MB advisory per child.
pub fn derive_concurrency(cores: usize, total_mem_gb: f64) -> usize {
    let by_cores = cores.saturating_mul(5);
    let by_mem = ((total_mem_gb * 0.5 / 0.512).floor() as i64).clamp(0, 20) as usize;
    by_cores.clamp(2, by_mem.max(2))
}

/// Read host core count and total memory, then apply [`derive_concurrency`].
pub fn host_concurrency() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    let mut sys = sysinfo::System::new();
    sys.refresh_memory();
    let total_mem_gb = sys.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0);

    derive_concurrency(cores, total_mem_gb)
}
