//! Update requests and results

use crate::error::StrategyError;
use keelson_types::{StrategyKind, UpdateDecision};
use std::fmt;
use std::time::Duration;

/// One service to move to a new image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRequest {
    pub service: String,
    pub current_image: String,
    pub target_image: String,

    /// Replica count the compose file declares
    pub declared_replicas: u32,

    /// Services restarted when blue-green switches traffic
    pub dependents: Vec<String>,
}

impl UpdateRequest {
    pub fn new(
        service: impl Into<String>,
        current_image: impl Into<String>,
        target_image: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            current_image: current_image.into(),
            target_image: target_image.into(),
            declared_replicas: 1,
            dependents: Vec::new(),
        }
    }

    pub fn from_decision(decision: &UpdateDecision) -> Self {
        Self::new(
            decision.service.clone(),
            decision.current_image(),
            decision.target_image(),
        )
    }

    pub fn with_declared(mut self, declared: u32) -> Self {
        self.declared_replicas = declared;
        self
    }

    pub fn with_dependents(mut self, dependents: Vec<String>) -> Self {
        self.dependents = dependents;
        self
    }
}

/// What happened to the pre-update state after a failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackStatus {
    /// No failure, or rollback disabled
    NotAttempted,
    RolledBack,
    /// Failure after the point of no automatic return (blue-green switch)
    NotAutomatic,
    RollbackFailed(String),
}

impl fmt::Display for RollbackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RollbackStatus::NotAttempted => write!(f, "not attempted"),
            RollbackStatus::RolledBack => write!(f, "rolled back"),
            RollbackStatus::NotAutomatic => write!(f, "not automatic"),
            RollbackStatus::RollbackFailed(reason) => write!(f, "rollback failed: {}", reason),
        }
    }
}

/// Outcome of one Execute
#[derive(Debug)]
pub struct UpdateResult {
    pub service: String,
    pub strategy: StrategyKind,
    pub from_image: String,
    pub to_image: String,

    /// New replicas started
    pub started: usize,

    pub error: Option<StrategyError>,
    pub rollback: RollbackStatus,
    pub elapsed: Duration,
}

impl UpdateResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn rolled_back(&self) -> bool {
        self.rollback == RollbackStatus::RolledBack
    }
}
