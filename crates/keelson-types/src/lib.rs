//! Keelson Types - Core types for compose image reconciliation
//!
//! Keelson keeps a Docker Compose deployment in step with upstream container
//! registries. For each service it discovers published tags, selects the best
//! one under a declarative image policy, rolls replicas over to it and
//! rewrites the compose file.
//!
//! ## Key Concepts
//!
//! - **ImageRef**: A parsed `image:` string (registry kind, repository, tag)
//! - **ImagePolicy**: Filter + extraction + ordering over a tag list
//! - **Replica**: A running container instance of a service
//! - **StrategyConfig**: How replicas move from the old tag to the new one
//! - **UpdateDecision**: A service whose selected tag differs from its current tag

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod credentials;
pub mod decision;
pub mod duration;
pub mod ids;
pub mod image;
pub mod policy;
pub mod replica;
pub mod strategy;

// Re-export main types
pub use credentials::{RegistryCredentials, RegistrySettings};
pub use decision::{PolicySource, UpdateDecision};
pub use ids::{DeploymentId, ReplicaId};
pub use image::{ImageRef, ImageRefError, RegistryKind};
pub use policy::{
    AlphabeticalPolicy, ImagePolicy, NumericalPolicy, OrderingClause, SemverPolicy, SortOrder,
    TagFilter,
};
pub use replica::{HealthState, Replica, ReplicaRole, ReplicaSpec};
pub use strategy::{
    ConfigError, HealthCheckKind, HealthCheckSpec, StrategyConfig, StrategyKind,
    DEFAULT_CANARY_STEPS,
};
