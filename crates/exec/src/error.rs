//! Error types for the exec crate's two run modes.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("plan assembly failed: {0}")]
    Plan(#[from] fieldnotes_core::task::PlanError),

    #[error("{0}")]
    Core(#[from] fieldnotes_core::error::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ExecError>;
