//! Error types for compose handling

use std::path::PathBuf;
use thiserror::Error;

/// Compose errors
#[derive(Debug, Error)]
pub enum ComposeError {
    /// Compose file could not be read
    #[error("failed to read compose file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Compose file is not valid YAML for the expected shape
    #[error("failed to parse compose file: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// `depends_on` edges form a cycle through this service
    #[error("circular dependency at service '{service}'")]
    CircularDependency { service: String },

    /// Line pattern failed to build
    #[error("invalid line pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// Backup or rewrite could not be written
    #[error("compose rewrite failed for {path}: {reason}")]
    RewriteFailed { path: PathBuf, reason: String },
}

/// Result type for compose operations
pub type Result<T> = std::result::Result<T, ComposeError>;
