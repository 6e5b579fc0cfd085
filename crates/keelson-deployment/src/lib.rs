//! # Keelson Deployment
//!
//! Moves the replicas of one compose service from its current image to a new
//! one. Four strategies share a single state machine (see
//! [`strategies::StrategyBase`]):
//!
//! - `one-at-a-time`: replace and verify replicas in ordinal order
//! - `all-at-once`: stop everything, start everything, verify
//! - `blue-green`: bring up a parallel set, switch, decommission the old set
//! - `canary`: migrate a growing percentage of replicas
//!
//! Every replica stop and start is journaled, so a failed run can be rolled
//! back to the replica set it started from.
//!
//! ## Usage
//!
//! ```no_run
//! use keelson_deployment::{create_strategy, UpdateRequest};
//! use keelson_engine::InMemoryEngine;
//! use keelson_types::{StrategyConfig, StrategyKind};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Arc::new(InMemoryEngine::new());
//! let strategy = create_strategy(StrategyConfig::new(StrategyKind::Canary), engine)?;
//!
//! let result = strategy
//!     .execute(&UpdateRequest::new("web", "web:1.0", "web:1.1").with_declared(4))
//!     .await;
//! println!("{}: {}", result.service, result.rollback);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod detector;
pub mod error;
pub mod journal;
pub mod phase;
pub mod result;
pub mod strategies;

pub use detector::{ReplicaDetector, ReplicaSet};
pub use error::{Result, StrategyError};
pub use journal::{JournalEntry, ReplicaSnapshot, RollbackJournal};
pub use phase::{log_phase, warn_phase, Phase};
pub use result::{RollbackStatus, UpdateRequest, UpdateResult};
pub use strategies::{
    create_strategy, AllAtOnceStrategy, BlueGreenStrategy, CanaryStrategy, OneAtATimeStrategy,
    StrategyBase, UpdateStrategy,
};
