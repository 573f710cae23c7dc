//! fieldnotes's two non-interactive run modes.
//!
//! `fieldnotes-core` is pure mechanism: it does not know what a "generate"
//! or "update" run is, only how to drive an [`fieldnotes_core::task::ExecutionPlan`]
//! through three phases. This crate assembles that plan for each of the
//! two modes and wires the core's services together, mirroring the
//! teacher's `codex-dashflow-exec` crate's `config.rs` / `error.rs` /
//! `output.rs` / `runner.rs` split.

mod config;
mod error;
mod generate;
mod output;
mod runner;
mod update;

pub use config::{OutputMode, RunOptions};
pub use error::{ExecError, Result};
pub use generate::{run_generate, GenerateRequest};
pub use output::{FailureRecord, HumanOutputHandler, JsonOutputHandler, OutputHandler, RunOutput};
pub use update::{run_update, UpdateRequest};
