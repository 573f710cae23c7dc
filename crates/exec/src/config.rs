//! Shared configuration for the `generate` and `update` run modes.

use std::fmt;
use std::str::FromStr;

/// Output mode for a run's final report, mirroring the teacher's
/// `exec::config::OutputMode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    #[default]
    Human,
    Json,
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputMode::Human => write!(f, "human"),
            OutputMode::Json => write!(f, "json"),
        }
    }
}

impl FromStr for OutputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "human" => Ok(OutputMode::Human),
            "json" => Ok(OutputMode::Json),
            _ => Err(format!("unknown output mode: {s}. Use 'human' or 'json'")),
        }
    }
}

/// Options shared by `run_generate` and `run_update`, independent of which
/// tasks are actually run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Explicit backend name; `None` means auto-detect (spec §4.2).
    pub backend: Option<String>,
    /// Concurrency override for Phase 1; `None` derives from host resources.
    pub concurrency: Option<usize>,
    /// Per-call timeout override, in milliseconds; `None` uses the config default.
    pub timeout_ms: Option<u64>,
    /// Abort the run after the first task failure within a phase.
    pub fail_fast: bool,
    /// Render the plan and return without invoking any backend.
    pub dry_run: bool,
    pub output_mode: OutputMode,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            backend: None,
            concurrency: None,
            timeout_ms: None,
            fail_fast: false,
            dry_run: false,
            output_mode: OutputMode::Human,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_mode_default_is_human() {
        assert_eq!(OutputMode::default(), OutputMode::Human);
    }

    #[test]
    fn test_output_mode_from_str() {
        assert_eq!(OutputMode::from_str("json").unwrap(), OutputMode::Json);
        assert_eq!(OutputMode::from_str("HUMAN").unwrap(), OutputMode::Human);
        assert!(OutputMode::from_str("xml").is_err());
    }

    #[test]
    fn test_run_options_default_is_conservative() {
        let options = RunOptions::default();
        assert!(!options.fail_fast);
        assert!(!options.dry_run);
        assert!(options.backend.is_none());
    }
}
