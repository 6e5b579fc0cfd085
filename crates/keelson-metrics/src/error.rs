//! Error types for keelson-metrics

use keelson_types::DeploymentId;
use thiserror::Error;

/// Errors from deployment recorders
#[derive(Debug, Error)]
pub enum RecorderError {
    /// No start was recorded for this deployment
    #[error("unknown deployment: {0}")]
    UnknownDeployment(DeploymentId),

    /// Backing file I/O failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored entry could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for recorder operations
pub type Result<T> = std::result::Result<T, RecorderError>;
