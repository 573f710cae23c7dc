//! Backend adapter layer (spec §4.2).
//!
//! Hides the shape of each external AI CLI behind one contract. The
//! adapter is the system's primary polymorphic boundary (spec §9):
//! adapter selection is runtime (auto-detect or by name) but the set of
//! adapters is closed at compile time.

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Options accepted by every adapter's `buildArgs`/`composeStdinInput`
/// (spec §4.2).
#[derive(Debug, Clone)]
pub struct AICallOptions {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub model: Option<String>,
    pub max_turns: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub task_label: Option<String>,
}

impl AICallOptions {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
            model: None,
            max_turns: None,
            timeout_ms: None,
            task_label: None,
        }
    }
}

/// A parsed response from a backend CLI (spec §4.2).
#[derive(Debug, Clone, PartialEq)]
pub struct AIResponse {
    pub text: String,
    pub model: Option<String>,
    /// Normalized: `raw_input - cache_read`, clamped to zero (spec §4.2
    /// token semantics — load-bearing for downstream cost calculation).
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
    pub duration_ms: u64,
    pub exit_code: i32,
    pub raw: serde_json::Value,
}

/// Normalize a CLI's raw reported input-token count against its reported
/// cache-read count, per spec §4.2 and the invariant checked in §8.1.7.
pub fn normalize_input_tokens(raw_input: u64, cache_read: u64) -> u64 {
    raw_input.saturating_sub(cache_read)
}

/// The adapter contract (spec §4.2). Implementations hide one external AI
/// CLI's argument shape, stdin convention, and response format.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Stable identifier, e.g. `"claude"`.
    fn name(&self) -> &'static str;

    /// The executable name this adapter looks for on `PATH`.
    fn cli_command(&self) -> &'static str;

    /// True iff `cli_command` resolves on `PATH` (platform-aware extension
    /// search, e.g. `.exe`/`.cmd` on Windows).
    fn is_available(&self) -> bool {
        which_on_path(self.cli_command()).is_some()
    }

    /// Construct the argument vector for a one-shot, non-interactive,
    /// no-session-persistence invocation producing machine-readable
    /// output.
    fn build_args(&self, options: &AICallOptions) -> Vec<String>;

    /// Produce the bytes to write to the child's stdin. The default is
    /// the user prompt; adapters without a dedicated system-prompt flag
    /// should override this to wrap the system prompt in delimiters and
    /// concatenate, per spec §4.2.
    fn compose_stdin_input(&self, options: &AICallOptions) -> Vec<u8> {
        options.prompt.clone().into_bytes()
    }

    /// Extract an [`AIResponse`] from the CLI's raw stdout.
    fn parse_response(&self, stdout: &[u8], wall_ms: u64, exit_code: i32) -> Result<AIResponse>;

    /// Human-readable remediation text shown when this adapter is not
    /// available.
    fn install_instructions(&self) -> String;

    /// One-time per-run provisioning of any files this adapter needs.
    /// Most adapters need nothing; the default is a no-op.
    async fn ensure_project_config(&self, _root: &std::path::Path) -> Result<()> {
        Ok(())
    }
}

fn which_on_path(command: &str) -> Option<std::path::PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    #[cfg(windows)]
    let extensions = [".exe", ".cmd", ".bat", ""];
    #[cfg(not(windows))]
    let extensions = [""];

    for dir in std::env::split_paths(&path_var) {
        for ext in extensions {
            let candidate = dir.join(format!("{command}{ext}"));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

/// Deduplicate text fragments while preserving first-seen order, per
/// spec §4.2 ("Across all strategies: deduplicate collected text
/// fragments preserving insertion order").
pub fn dedupe_preserving_order(fragments: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    fragments
        .into_iter()
        .filter(|f| seen.insert(f.clone()))
        .collect()
}

/// An ordered list of adapters (spec §4.2 Registry).
pub struct AdapterRegistry {
    adapters: Vec<Box<dyn Adapter>>,
}

impl AdapterRegistry {
    pub fn new(adapters: Vec<Box<dyn Adapter>>) -> Self {
        Self { adapters }
    }

    /// Iterate in registration order, returning the first adapter whose
    /// `is_available()` holds.
    pub fn auto_detect(&self) -> Result<&dyn Adapter> {
        self.adapters
            .iter()
            .find(|a| a.is_available())
            .map(|a| a.as_ref())
            .ok_or_else(|| Error::CliNotFound(self.install_instructions_summary()))
    }

    /// Return the named adapter, or `CLI_NOT_FOUND` carrying every
    /// registered adapter's install instructions.
    pub fn resolve(&self, name: &str) -> Result<&dyn Adapter> {
        self.adapters
            .iter()
            .find(|a| a.name() == name)
            .map(|a| a.as_ref())
            .ok_or_else(|| Error::CliNotFound(self.install_instructions_summary()))
    }

    fn install_instructions_summary(&self) -> String {
        self.adapters
            .iter()
            .map(|a| format!("{}: {}", a.name(), a.install_instructions()))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeAdapter {
        name: &'static str,
        available: bool,
    }

    #[async_trait]
    impl Adapter for FakeAdapter {
        fn name(&self) -> &'static str {
            self.name
        }
        fn cli_command(&self) -> &'static str {
            self.name
        }
        fn is_available(&self) -> bool {
            self.available
        }
        fn build_args(&self, _options: &AICallOptions) -> Vec<String> {
            vec![]
        }
        fn parse_response(&self, stdout: &[u8], wall_ms: u64, exit_code: i32) -> Result<AIResponse> {
            Ok(AIResponse {
                text: String::from_utf8_lossy(stdout).to_string(),
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
            format!("install {}", self.name)
        }
    }

    #[test]
    fn test_normalize_input_tokens() {
        assert_eq!(normalize_input_tokens(100, 30), 70);
        assert_eq!(normalize_input_tokens(10, 30), 0);
    }

    #[test]
    fn test_dedupe_preserving_order() {
        let result = dedupe_preserving_order(vec![
            "a".to_string(),
            "b".to_string(),
            "a".to_string(),
            "c".to_string(),
        ]);
        assert_eq!(result, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_auto_detect_returns_first_available() {
        let registry = AdapterRegistry::new(vec![
            Box::new(FakeAdapter {
                name: "one",
                available: false,
            }),
            Box::new(FakeAdapter {
                name: "two",
                available: true,
            }),
        ]);
        let adapter = registry.auto_detect().unwrap();
        assert_eq!(adapter.name(), "two");
    }

    #[test]
    fn test_auto_detect_fails_when_none_available() {
        let registry = AdapterRegistry::new(vec![Box::new(FakeAdapter {
            name: "one",
            available: false,
        })]);
        let err = registry.auto_detect().unwrap_err();
        assert!(matches!(err, Error::CliNotFound(_)));
    }

    #[test]
    fn test_resolve_by_name() {
        let registry = AdapterRegistry::new(vec![Box::new(FakeAdapter {
            name: "one",
            available: false,
        })]);
        assert!(registry.resolve("one").is_ok());
        assert!(registry.resolve("missing").is_err());
    }
}
