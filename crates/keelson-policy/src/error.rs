//! Error types for policy compilation

use thiserror::Error;

/// A policy that cannot be compiled.
///
/// Only an uncompilable filter pattern or an unparseable semver range is an
/// error; tags that fail to match or parse are simply not selected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// Filter pattern is not a valid regular expression
    #[error("invalid policy: pattern '{pattern}' does not compile: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Semver range is not a valid constraint
    #[error("invalid policy: range '{range}' does not parse: {reason}")]
    InvalidRange { range: String, reason: String },
}

/// Result type for policy operations
pub type Result<T> = std::result::Result<T, PolicyError>;
