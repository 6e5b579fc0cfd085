//! # Keelson Daemon
//!
//! Configuration loading and the reconcile loop behind the `keelson sync`
//! command. The loop periodically compares each compose service's image tag
//! with what its registry offers, rolls out the tags its image policy selects
//! and rewrites the compose file to match.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod config;
pub mod error;
pub mod reconciler;

pub use config::{DaemonConfig, RollingUpdateConfig, ServiceOverride};
pub use error::{DaemonError, DaemonResult};
pub use reconciler::{Reconciler, TickReport};
