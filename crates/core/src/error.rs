//! Error types for the fieldnotes execution core.

use thiserror::Error;

/// Errors surfaced by the execution core.
#[derive(Error, Debug)]
pub enum Error {
    #[error("no AI CLI found on PATH; tried: {0}")]
    CliNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("plan error: {0}")]
    Plan(String),
}

/// Result type alias for the execution core.
pub type Result<T> = std::result::Result<T, Error>;
