//! Engine-reported health status.

use super::{Probe, ProbeResult};
use async_trait::async_trait;
use keelson_engine::Engine;
use keelson_types::{HealthCheckKind, HealthState, Replica};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

/// Asks the engine for the container's own HEALTHCHECK status.
///
/// A container without a HEALTHCHECK reports `Unknown`, which counts as a
/// pass: a running container is the best signal available. `Starting`
/// is pending and counts for neither threshold.
pub struct DockerProbe {
    engine: Arc<dyn Engine>,
    timeout: Duration,
}

impl DockerProbe {
    pub fn new(engine: Arc<dyn Engine>, timeout: Duration) -> Self {
        Self { engine, timeout }
    }
}

#[async_trait]
impl Probe for DockerProbe {
    fn kind(&self) -> HealthCheckKind {
        HealthCheckKind::Docker
    }

    #[instrument(skip(self, replica), fields(replica = %replica.label()))]
    async fn probe(&self, replica: &Replica) -> ProbeResult {
        let start = Instant::now();
        let inspected = tokio::time::timeout(self.timeout, self.engine.inspect_health(&replica.id)).await;
        let latency = start.elapsed().as_millis() as u64;

        let result = match inspected {
            Err(_) => ProbeResult::timeout(replica.id.clone(), self.kind(), self.timeout),
            Ok(Err(e)) => ProbeResult::fail(replica.id.clone(), self.kind(), e.to_string(), latency),
            Ok(Ok(HealthState::Healthy | HealthState::Unknown)) => {
                ProbeResult::pass(replica.id.clone(), self.kind(), latency)
            }
            Ok(Ok(HealthState::Unhealthy)) => {
                ProbeResult::fail(replica.id.clone(), self.kind(), "container unhealthy", latency)
            }
            Ok(Ok(HealthState::Starting)) => {
                ProbeResult::pending(replica.id.clone(), self.kind(), "container starting")
            }
        };
        debug!(status = ?result.status, "docker health probed");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probes::ProbeStatus;
    use keelson_engine::InMemoryEngine;
    use keelson_types::ReplicaSpec;

    #[tokio::test]
    async fn test_maps_engine_states() {
        let engine = Arc::new(InMemoryEngine::new());
        engine.script_health(
            "app:2",
            vec![HealthState::Starting, HealthState::Unhealthy, HealthState::Healthy],
        );
        let replica = engine
            .start_replica(&ReplicaSpec::new("app", 1, "app:2"))
            .await
            .unwrap();

        let probe = DockerProbe::new(engine, Duration::from_secs(1));
        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(probe.probe(&replica).await.status);
        }
        assert_eq!(
            seen,
            vec![ProbeStatus::Pending, ProbeStatus::Fail, ProbeStatus::Pass]
        );
    }

    #[tokio::test]
    async fn test_gone_replica_fails() {
        let engine = Arc::new(InMemoryEngine::new());
        let replica = engine.seed("app", 1, "app:1").remove(0);
        engine.stop_replica(&replica.id).await.unwrap();

        let result = DockerProbe::new(engine, Duration::from_secs(1))
            .probe(&replica)
            .await;
        assert_eq!(result.status, ProbeStatus::Fail);
        assert!(result.message.is_some());
    }
}
