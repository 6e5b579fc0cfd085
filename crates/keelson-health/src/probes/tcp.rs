//! TCP connect probe.

use super::{timed, Probe, ProbeResult};
use async_trait::async_trait;
use keelson_types::{HealthCheckKind, Replica};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, instrument};

/// Healthy when a TCP connection can be opened.
///
/// The endpoint is either `host:port` or a bare port, in which case the
/// replica's own address is used.
pub struct TcpProbe {
    endpoint: String,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout,
        }
    }

    /// Address to dial for a replica
    pub fn target(&self, replica: &Replica) -> Result<String, String> {
        let port = match self.endpoint.strip_prefix(':') {
            Some(port) => port,
            None if self.endpoint.contains(':') => return Ok(self.endpoint.clone()),
            None => self.endpoint.as_str(),
        };
        match replica.address.as_deref() {
            Some(address) => Ok(format!("{}:{}", address, port)),
            None => Err(format!("replica {} has no address", replica.label())),
        }
    }
}

#[async_trait]
impl Probe for TcpProbe {
    fn kind(&self) -> HealthCheckKind {
        HealthCheckKind::Tcp
    }

    #[instrument(skip(self, replica), fields(replica = %replica.label()))]
    async fn probe(&self, replica: &Replica) -> ProbeResult {
        let result = timed(replica, self.kind(), self.timeout, async {
            let target = self.target(replica)?;
            TcpStream::connect(&target)
                .await
                .map(|_| ())
                .map_err(|e| format!("connect {}: {}", target, e))
        })
        .await;
        debug!(status = ?result.status, "tcp probe finished");
        result
    }
}
