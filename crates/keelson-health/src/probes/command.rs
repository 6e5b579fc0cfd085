//! Command exec'd inside the replica.

use super::{timed, Probe, ProbeResult};
use async_trait::async_trait;
use keelson_engine::Engine;
use keelson_types::{HealthCheckKind, Replica};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Runs a shell command in the replica; exit code 0 is healthy.
pub struct CommandProbe {
    engine: Arc<dyn Engine>,
    command: String,
    timeout: Duration,
}

impl CommandProbe {
    pub fn new(engine: Arc<dyn Engine>, command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            engine,
            command: command.into(),
            timeout,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

#[async_trait]
impl Probe for CommandProbe {
    fn kind(&self) -> HealthCheckKind {
        HealthCheckKind::Command
    }

    #[instrument(skip(self, replica), fields(replica = %replica.label(), command = %self.command))]
    async fn probe(&self, replica: &Replica) -> ProbeResult {
        let result = timed(replica, self.kind(), self.timeout, async {
            match self.engine.exec(&replica.id, &self.command).await {
                Ok(0) => Ok(()),
                Ok(code) => Err(format!("command exited with status {}", code)),
                Err(e) => Err(e.to_string()),
            }
        })
        .await;
        debug!(status = ?result.status, latency_ms = result.latency_ms, "command probe finished");
        result
    }
}
