//! Error types for the analysis engine

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised by the analysis engine
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Failed to load grammar: {0}")]
    Grammar(#[from] tree_sitter::LanguageError),

    #[error("Parser worker unavailable: {0}")]
    WorkerUnavailable(String),

    #[error("Parser worker did not respond within {0:?}")]
    WorkerTimeout(Duration),

    #[error("Parser worker closed its output")]
    WorkerClosed,

    #[error("Parser worker protocol violation: {0}")]
    WorkerProtocol(String),
}

pub type Result<T> = std::result::Result<T, Error>;
