//! # Keelson Engine
//!
//! The container engine contract used by the update strategies, plus two
//! drivers:
//!
//! - [`InMemoryEngine`]: scriptable, for tests and dry runs
//! - [`DockerCliEngine`]: drives the local `docker` binary through compose labels

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod docker;
pub mod engine;
pub mod error;
pub mod memory;

pub use docker::DockerCliEngine;
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use memory::{EngineEvent, InMemoryEngine};
