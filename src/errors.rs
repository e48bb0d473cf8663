//! Error types for sandbox operations

use pyo3::PyErr;
use std::io;
use thiserror::Error;

/// Result type for sandbox operations
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Errors raised by the sandbox itself.
///
/// Faults raised by the untrusted code never show up here; those are
/// classified into an [`ExecutionResult`](crate::ExecutionResult).
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Syscall error: {0}")]
    Syscall(String),

    #[error("Interpreter error: {0}")]
    Python(#[from] PyErr),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] serde_json::Error),

    #[error("Sandbox already running")]
    AlreadyRunning,

    #[error("Deadline watchdog error: {0}")]
    Deadline(String),
}
