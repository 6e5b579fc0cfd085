//! Error types for keelson-daemon

use keelson_compose::ComposeError;
use keelson_metrics::RecorderError;
use keelson_policy::PolicyError;
use thiserror::Error;

/// Errors that stop the daemon or abort a tick
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration could not be loaded or is invalid
    #[error("configuration error: {0}")]
    Config(String),

    /// An image policy does not compile
    #[error("policy error in {location}: {source}")]
    Policy {
        location: String,
        #[source]
        source: PolicyError,
    },

    /// Compose file could not be read, ordered or rewritten
    #[error(transparent)]
    Compose(#[from] ComposeError),

    /// Deployment history store failed to open
    #[error("deployment history error: {0}")]
    Recorder(#[from] RecorderError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for DaemonError {
    fn from(err: config::ConfigError) -> Self {
        DaemonError::Config(err.to_string())
    }
}

/// Result type for daemon operations
pub type DaemonResult<T> = std::result::Result<T, DaemonError>;
