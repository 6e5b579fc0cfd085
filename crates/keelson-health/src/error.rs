//! Error types for keelson-health.

use keelson_types::HealthCheckKind;
use thiserror::Error;

/// Errors building a health checker.
///
/// Probe failures are not errors: they are reported as failed
/// [`ProbeResult`](crate::ProbeResult)s and fed to the health state machine.
#[derive(Debug, Error)]
pub enum HealthError {
    /// The check kind needs an endpoint and none was configured.
    #[error("health check '{0}' requires an endpoint")]
    MissingEndpoint(HealthCheckKind),

    /// HTTP client could not be built.
    #[error("http client error: {0}")]
    Client(#[from] reqwest::Error),
}

/// Result type for health operations.
pub type HealthResult<T> = Result<T, HealthError>;
