//! Error types for keelson-registry

use keelson_types::RegistryKind;
use thiserror::Error;

/// Registry client errors
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Credentials missing or rejected
    #[error("authentication failed for {registry}: {reason}")]
    Auth { registry: String, reason: String },

    /// Transport failure or unexpected response
    #[error("registry {registry} unreachable: {reason}")]
    Network { registry: String, reason: String },

    /// Repository does not exist (or is hidden from these credentials)
    #[error("repository not found: {repository}")]
    NotFound { repository: String },

    /// Credential shape this client cannot use
    #[error("unsupported credentials for {kind}: {reason}")]
    Unsupported { kind: RegistryKind, reason: String },

    /// Reading a credentials file failed
    #[error("reading credentials file {path}: {source}")]
    CredentialsFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl RegistryError {
    pub(crate) fn network(registry: &str, reason: impl ToString) -> Self {
        RegistryError::Network {
            registry: registry.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn auth(registry: &str, reason: impl ToString) -> Self {
        RegistryError::Auth {
            registry: registry.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether the failure is an authentication problem
    pub fn is_auth(&self) -> bool {
        matches!(self, RegistryError::Auth { .. } | RegistryError::Unsupported { .. })
    }
}

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;
