//! Health probes for replicas.
//!
//! Four kinds, matching [`HealthCheckKind`]:
//! - Docker: the engine's own health status
//! - Http: GET an endpoint, 2xx is healthy
//! - Tcp: a connection can be opened
//! - Command: a command exec'd in the replica exits 0

mod command;
mod docker;
mod http;
mod tcp;

pub use command::CommandProbe;
pub use docker::DockerProbe;
pub use http::HttpProbe;
pub use tcp::TcpProbe;

use crate::error::{HealthError, HealthResult};
use async_trait::async_trait;
use keelson_engine::Engine;
use keelson_types::{HealthCheckKind, HealthCheckSpec, Replica, ReplicaId};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Verdict of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeStatus {
    /// Counts towards the success threshold.
    Pass,
    /// Counts towards the failure threshold.
    Fail,
    /// Not yet decided (container still starting); counts for neither.
    Pending,
}

/// Result of a probe execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub replica_id: ReplicaId,
    pub kind: HealthCheckKind,
    pub status: ProbeStatus,
    pub latency_ms: u64,
    pub message: Option<String>,
}

impl ProbeResult {
    pub fn pass(replica_id: ReplicaId, kind: HealthCheckKind, latency_ms: u64) -> Self {
        Self {
            replica_id,
            kind,
            status: ProbeStatus::Pass,
            latency_ms,
            message: None,
        }
    }

    pub fn fail(
        replica_id: ReplicaId,
        kind: HealthCheckKind,
        message: impl Into<String>,
        latency_ms: u64,
    ) -> Self {
        Self {
            replica_id,
            kind,
            status: ProbeStatus::Fail,
            latency_ms,
            message: Some(message.into()),
        }
    }

    pub fn pending(replica_id: ReplicaId, kind: HealthCheckKind, message: impl Into<String>) -> Self {
        Self {
            replica_id,
            kind,
            status: ProbeStatus::Pending,
            latency_ms: 0,
            message: Some(message.into()),
        }
    }

    pub fn timeout(replica_id: ReplicaId, kind: HealthCheckKind, timeout: Duration) -> Self {
        let timeout_ms = timeout.as_millis() as u64;
        Self::fail(
            replica_id,
            kind,
            format!("probe timed out after {}ms", timeout_ms),
            timeout_ms,
        )
    }
}

/// Trait for health probes.
#[async_trait]
pub trait Probe: Send + Sync {
    fn kind(&self) -> HealthCheckKind;

    /// Probe a replica once. Never fails; problems are a failed result.
    async fn probe(&self, replica: &Replica) -> ProbeResult;
}

/// Run `fut` under `timeout`, mapping expiry to a failed result.
pub(crate) async fn timed<F>(
    replica: &Replica,
    kind: HealthCheckKind,
    timeout: Duration,
    fut: F,
) -> ProbeResult
where
    F: std::future::Future<Output = Result<(), String>>,
{
    let start = Instant::now();
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(())) => ProbeResult::pass(replica.id.clone(), kind, elapsed_ms(start)),
        Ok(Err(reason)) => ProbeResult::fail(replica.id.clone(), kind, reason, elapsed_ms(start)),
        Err(_) => ProbeResult::timeout(replica.id.clone(), kind, timeout),
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Health checker selected by configuration.
pub enum HealthChecker {
    Docker(DockerProbe),
    Http(HttpProbe),
    Tcp(TcpProbe),
    Command(CommandProbe),
}

impl HealthChecker {
    /// Build the checker a health-check spec describes.
    pub fn from_spec(spec: &HealthCheckSpec, engine: Arc<dyn Engine>) -> HealthResult<Self> {
        let endpoint = || {
            spec.endpoint
                .as_deref()
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(str::to_string)
                .ok_or(HealthError::MissingEndpoint(spec.kind))
        };
        Ok(match spec.kind {
            HealthCheckKind::Docker => HealthChecker::Docker(DockerProbe::new(engine, spec.probe_timeout)),
            HealthCheckKind::Http => HealthChecker::Http(HttpProbe::new(endpoint()?, spec.probe_timeout)?),
            HealthCheckKind::Tcp => HealthChecker::Tcp(TcpProbe::new(endpoint()?, spec.probe_timeout)),
            HealthCheckKind::Command => {
                HealthChecker::Command(CommandProbe::new(engine, endpoint()?, spec.probe_timeout))
            }
        })
    }
}

#[async_trait]
impl Probe for HealthChecker {
    fn kind(&self) -> HealthCheckKind {
        match self {
            HealthChecker::Docker(p) => p.kind(),
            HealthChecker::Http(p) => p.kind(),
            HealthChecker::Tcp(p) => p.kind(),
            HealthChecker::Command(p) => p.kind(),
        }
    }

    async fn probe(&self, replica: &Replica) -> ProbeResult {
        match self {
            HealthChecker::Docker(p) => p.probe(replica).await,
            HealthChecker::Http(p) => p.probe(replica).await,
            HealthChecker::Tcp(p) => p.probe(replica).await,
            HealthChecker::Command(p) => p.probe(replica).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keelson_engine::InMemoryEngine;

    #[test]
    fn test_from_spec_requires_endpoint() {
        let engine: Arc<dyn Engine> = Arc::new(InMemoryEngine::new());
        for kind in [HealthCheckKind::Http, HealthCheckKind::Tcp, HealthCheckKind::Command] {
            let result = HealthChecker::from_spec(&HealthCheckSpec::new(kind), engine.clone());
            assert!(matches!(result, Err(HealthError::MissingEndpoint(k)) if k == kind));
        }
        let docker = HealthChecker::from_spec(&HealthCheckSpec::default(), engine).unwrap();
        assert_eq!(docker.kind(), HealthCheckKind::Docker);
    }
}
