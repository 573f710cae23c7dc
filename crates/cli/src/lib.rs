//! fieldnotes CLI library.
//!
//! This module provides the CLI's argument parsing and command
//! implementations, kept separate from the binary entry point so they can
//! be unit tested directly — mirroring the teacher's flat
//! `codex_dashflow_cli` crate (one `Args` struct, a `Command` subcommand
//! enum, and one `run_xxx_command` function per subcommand).

mod discovery;
mod prompts;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::Colorize;
use fieldnotes_core::adapters::default_registry;
use fieldnotes_exec::{
    run_generate, run_update, GenerateRequest, HumanOutputHandler, JsonOutputHandler,
    OutputHandler, RunOptions, UpdateRequest,
};

/// fieldnotes - brownfield documentation generator
#[derive(Parser, Debug, Clone)]
#[command(name = "fieldnotes")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Generate summaries, overviews, and orientation docs for every file
    Generate(GenerateArgs),
    /// Regenerate only what changed since the last run
    Update(UpdateArgs),
    /// Check that a backend CLI is available on PATH
    Doctor(DoctorArgs),
}

/// Arguments shared by `generate` and `update`.
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Project root to document
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Explicit backend name (claude, codex, gemini); default auto-detects
    #[arg(long)]
    pub backend: Option<String>,

    /// Override Phase 1 worker concurrency
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Override the per-call subprocess timeout, in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Abort the run after the first task failure within a phase
    #[arg(long)]
    pub fail_fast: bool,

    /// Render the plan and exit without invoking any backend
    #[arg(long)]
    pub dry_run: bool,

    /// Emit the final report as JSON instead of human-readable text
    #[arg(long)]
    pub json: bool,
}

impl RunArgs {
    fn to_run_options(&self) -> RunOptions {
        RunOptions {
            backend: self.backend.clone(),
            concurrency: self.concurrency,
            timeout_ms: self.timeout_ms,
            fail_fast: self.fail_fast,
            dry_run: self.dry_run,
            output_mode: if self.json {
                fieldnotes_exec::OutputMode::Json
            } else {
                fieldnotes_exec::OutputMode::Human
            },
        }
    }
}

/// Arguments for the `generate` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct GenerateArgs {
    #[command(flatten)]
    pub run: RunArgs,
}

/// Arguments for the `update` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct UpdateArgs {
    #[command(flatten)]
    pub run: RunArgs,
}

/// Arguments for the `doctor` subcommand.
#[derive(Parser, Debug, Clone, Default)]
pub struct DoctorArgs {
    /// Output results in JSON format for machine parsing
    #[arg(long)]
    pub json: bool,
}

/// Exit codes for the doctor command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoctorExitCode {
    /// At least one backend is available on `PATH`
    Ok = 0,
    /// No backend is available on `PATH`
    Errors = 2,
}

impl DoctorExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

fn print_handler(json: bool) -> Box<dyn OutputHandler> {
    if json {
        Box::new(JsonOutputHandler::new(std::io::stdout()))
    } else {
        Box::new(HumanOutputHandler::new(std::io::stdout()))
    }
}

/// Exit code for a finished run, per spec §6: 0 all succeeded, 1 partial
/// failure, 2 run-level failure (handled separately, before a run starts).
fn exit_code_for(output: &fieldnotes_exec::RunOutput) -> i32 {
    if output.dry_run || output.is_success() {
        0
    } else {
        1
    }
}

/// Run a full generation over every discovered file.
pub async fn run_generate_command(args: &GenerateArgs) -> i32 {
    let root = match args.run.path.canonicalize() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            return 2;
        }
    };

    let discovered = match discovery::discover_source_files(&root) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("{} failed to discover source files: {e}", "error:".red().bold());
            return 2;
        }
    };

    let tasks = prompts::build_tasks(&root, &discovered);
    let request = GenerateRequest {
        root,
        tasks,
        options: args.run.to_run_options(),
    };

    match run_generate(request).await {
        Ok(output) => {
            print_handler(args.run.json).print_result(&output);
            exit_code_for(&output)
        }
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            2
        }
    }
}

/// Run an incremental update restricted to what changed.
pub async fn run_update_command(args: &UpdateArgs) -> i32 {
    let root = match args.run.path.canonicalize() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            return 2;
        }
    };

    let discovered = match discovery::discover_source_files(&root) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("{} failed to discover source files: {e}", "error:".red().bold());
            return 2;
        }
    };
    let known_artifact_sources = match discovery::discover_known_artifact_sources(&root) {
        Ok(k) => k,
        Err(e) => {
            eprintln!("{} failed to scan existing artifacts: {e}", "error:".red().bold());
            return 2;
        }
    };

    let all_tasks = prompts::build_tasks(&root, &discovered);
    let request = UpdateRequest {
        root,
        discovered,
        known_artifact_sources,
        all_tasks,
        options: args.run.to_run_options(),
    };

    match run_update(request).await {
        Ok(output) => {
            print_handler(args.run.json).print_result(&output);
            exit_code_for(&output)
        }
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            2
        }
    }
}

/// Check which backend CLIs are available on `PATH`.
pub fn run_doctor_command(args: &DoctorArgs) -> DoctorExitCode {
    let registry = default_registry();
    let available = registry.auto_detect().is_ok();

    if args.json {
        let body = serde_json::json!({ "backend_available": available });
        println!("{body}");
    } else if available {
        println!("{} a backend CLI is available on PATH", "OK".green().bold());
    } else {
        println!(
            "{} no backend CLI found on PATH",
            "FAIL".red().bold()
        );
    }

    if available {
        DoctorExitCode::Ok
    } else {
        DoctorExitCode::Errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_for_dry_run_is_always_zero() {
        let output = fieldnotes_exec::RunOutput {
            dry_run: true,
            succeeded: 0,
            failed: 3,
            failures: Vec::new(),
            plan_rendering: Some(String::new()),
        };
        assert_eq!(exit_code_for(&output), 0);
    }

    #[test]
    fn test_exit_code_for_partial_failure_is_one() {
        let output = fieldnotes_exec::RunOutput {
            dry_run: false,
            succeeded: 1,
            failed: 1,
            failures: Vec::new(),
            plan_rendering: None,
        };
        assert_eq!(exit_code_for(&output), 1);
    }

    #[test]
    fn test_exit_code_for_full_success_is_zero() {
        let output = fieldnotes_exec::RunOutput {
            dry_run: false,
            succeeded: 2,
            failed: 0,
            failures: Vec::new(),
            plan_rendering: None,
        };
        assert_eq!(exit_code_for(&output), 0);
    }

    #[test]
    fn test_doctor_exit_code_values() {
        assert_eq!(DoctorExitCode::Ok.code(), 0);
        assert_eq!(DoctorExitCode::Errors.code(), 2);
    }
}
