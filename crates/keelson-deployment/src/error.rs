//! Error types for keelson-deployment

use keelson_engine::EngineError;
use keelson_health::HealthError;
use keelson_types::ConfigError;
use std::time::Duration;
use thiserror::Error;

/// Errors that abort (or accompany) a strategy run
#[derive(Debug, Error)]
pub enum StrategyError {
    /// The service has no live replicas
    #[error("service {service} has no replicas")]
    NoReplicas { service: String },

    /// A new replica did not become healthy before the deadline
    #[error("replica {replica} did not become healthy in time")]
    HealthTimeout { replica: String },

    /// A new replica reached the failure threshold
    #[error("replica {replica} is unhealthy")]
    HealthUnhealthy { replica: String },

    /// The pre-update command failed on a target replica
    #[error("pre-update command '{command}' failed on {replica}: {reason}")]
    PreCommandFailed {
        replica: String,
        command: String,
        reason: String,
    },

    /// The post-update command failed on a new replica (warn-only)
    #[error("post-update command '{command}' failed on {replica}: {reason}")]
    PostCommandFailed {
        replica: String,
        command: String,
        reason: String,
    },

    /// Restoring the pre-update replica set failed
    #[error("rollback of {service} failed: {reason}")]
    RollbackFailed { service: String, reason: String },

    /// The strategy timeout expired
    #[error("update of {service} cancelled after {timeout:?}")]
    Cancelled { service: String, timeout: Duration },

    /// Engine operation failed
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Strategy configuration is invalid
    #[error("invalid strategy configuration: {0}")]
    InvalidConfig(String),
}

impl From<ConfigError> for StrategyError {
    fn from(err: ConfigError) -> Self {
        StrategyError::InvalidConfig(err.to_string())
    }
}

impl From<HealthError> for StrategyError {
    fn from(err: HealthError) -> Self {
        StrategyError::InvalidConfig(err.to_string())
    }
}

/// Result type for strategy operations
pub type Result<T> = std::result::Result<T, StrategyError>;
