//! # Keelson Health
//!
//! Replica health probing and health-gated waiting.
//!
//! A [`HealthChecker`] is built from a [`HealthCheckSpec`](keelson_types::HealthCheckSpec)
//! and probes one replica at a time. [`wait_for_health`] drives it at a fixed
//! interval until consecutive-pass or consecutive-fail thresholds are met or a
//! [`Deadline`] passes.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod error;
pub mod probes;
pub mod wait;

pub use error::{HealthError, HealthResult};
pub use probes::{
    CommandProbe, DockerProbe, HealthChecker, HttpProbe, Probe, ProbeResult, ProbeStatus,
    TcpProbe,
};
pub use wait::{wait_for_all, wait_for_health, Deadline, HealthCounter, HealthOutcome, WaitPolicy};
