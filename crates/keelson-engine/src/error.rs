//! Engine error types

use keelson_types::{ReplicaId, ReplicaRole};
use thiserror::Error;

/// Engine driver errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("replica not found: {0}")]
    ReplicaNotFound(ReplicaId),

    #[error("replica {service}#{ordinal} ({role}) is already running")]
    AlreadyRunning {
        service: String,
        ordinal: u32,
        role: ReplicaRole,
    },

    /// No existing container to derive a new replica's settings from
    #[error("no container of service '{0}' to use as a template")]
    NoTemplate(String),

    /// The engine refused the operation
    #[error("engine rejected {operation}: {reason}")]
    Rejected { operation: String, reason: String },

    /// An engine command exited unsuccessfully
    #[error("`{command}` failed with status {status}: {stderr}")]
    Command {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("unexpected engine output: {0}")]
    Output(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
