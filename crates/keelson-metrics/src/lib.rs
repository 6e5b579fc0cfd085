//! # Keelson Metrics
//!
//! Deployment history. Every strategy run is recorded as a start followed by
//! a success or failure (and a rollback, when one ran). Records are kept in
//! memory or appended to a JSON-lines file for later inspection.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod error;
pub mod record;
pub mod recorder;

pub use error::{RecorderError, Result};
pub use record::{fold_history, DeploymentOutcome, DeploymentRecord, HistoryEntry, HistoryEvent};
pub use recorder::{DeploymentRecorder, InMemoryRecorder, JsonLinesRecorder};
