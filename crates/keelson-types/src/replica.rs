//! Replica types
//!
//! A replica is one running container of a compose service. Within a service
//! and role, ordinals are dense (1..=N) and unique.

use crate::ReplicaId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role a replica plays during an update
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ReplicaRole {
    #[default]
    Stable,
    Green,
    Canary,
}

impl ReplicaRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplicaRole::Stable => "stable",
            ReplicaRole::Green => "green",
            ReplicaRole::Canary => "canary",
        }
    }
}

impl fmt::Display for ReplicaRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last-known health as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Unhealthy,
    Starting,
    #[default]
    Unknown,
}

impl HealthState {
    /// Map an engine health string; anything unrecognised or absent is `Unknown`
    pub fn from_engine(status: Option<&str>) -> Self {
        match status.map(str::trim) {
            Some("healthy") => HealthState::Healthy,
            Some("unhealthy") => HealthState::Unhealthy,
            Some("starting") => HealthState::Starting,
            _ => HealthState::Unknown,
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthState::Healthy)
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthState::Healthy => write!(f, "healthy"),
            HealthState::Unhealthy => write!(f, "unhealthy"),
            HealthState::Starting => write!(f, "starting"),
            HealthState::Unknown => write!(f, "unknown"),
        }
    }
}

/// A live container replica of a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replica {
    /// Container identifier
    pub id: ReplicaId,

    /// Compose service name
    pub service: String,

    /// 1-based ordinal within the service and role
    pub ordinal: u32,

    /// Image the container was started from
    pub image: String,

    /// Last-known health
    pub health: HealthState,

    /// Role during an update
    pub role: ReplicaRole,

    /// Network address (IP or hostname) for http/tcp probes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl Replica {
    /// What it would take to start this replica again
    pub fn spec(&self) -> ReplicaSpec {
        ReplicaSpec {
            service: self.service.clone(),
            ordinal: self.ordinal,
            image: self.image.clone(),
            role: self.role,
        }
    }

    /// `service#ordinal` label for logs
    pub fn label(&self) -> String {
        match self.role {
            ReplicaRole::Stable => format!("{}#{}", self.service, self.ordinal),
            role => format!("{}#{}({})", self.service, self.ordinal, role),
        }
    }
}

/// Request to start a replica
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplicaSpec {
    pub service: String,
    pub ordinal: u32,
    pub image: String,
    pub role: ReplicaRole,
}

impl ReplicaSpec {
    pub fn new(service: impl Into<String>, ordinal: u32, image: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            ordinal,
            image: image.into(),
            role: ReplicaRole::Stable,
        }
    }

    pub fn with_role(mut self, role: ReplicaRole) -> Self {
        self.role = role;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_from_engine() {
        assert_eq!(HealthState::from_engine(Some("healthy")), HealthState::Healthy);
        assert_eq!(
            HealthState::from_engine(Some("unhealthy")),
            HealthState::Unhealthy
        );
        assert_eq!(HealthState::from_engine(Some("starting")), HealthState::Starting);
        assert_eq!(HealthState::from_engine(None), HealthState::Unknown);
        assert_eq!(HealthState::from_engine(Some("")), HealthState::Unknown);
    }

    #[test]
    fn test_replica_spec_round_trip() {
        let replica = Replica {
            id: ReplicaId::new("abc"),
            service: "web".into(),
            ordinal: 2,
            image: "nginx:1.25".into(),
            health: HealthState::Healthy,
            role: ReplicaRole::Canary,
            address: None,
        };
        let spec = replica.spec();
        assert_eq!(spec.ordinal, 2);
        assert_eq!(spec.role, ReplicaRole::Canary);
        assert_eq!(replica.label(), "web#2(canary)");
    }
}
