//! HTTP GET probe.

use super::{timed, Probe, ProbeResult};
use crate::error::HealthResult;
use async_trait::async_trait;
use keelson_types::{HealthCheckKind, Replica};
use std::time::Duration;
use tracing::{debug, instrument};

/// Healthy when a GET returns a 2xx status.
///
/// Endpoints are either absolute URLs or relative to the replica's address:
/// `/health` dials `http://{address}/health`, `:8080/health` dials
/// `http://{address}:8080/health`.
pub struct HttpProbe {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> HealthResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            timeout,
        })
    }

    /// URL to request for a replica
    pub fn url_for(&self, replica: &Replica) -> Result<String, String> {
        if self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://") {
            return Ok(self.endpoint.clone());
        }
        let address = replica
            .address
            .as_deref()
            .ok_or_else(|| format!("replica {} has no address", replica.label()))?;
        if self.endpoint.starts_with(':') || self.endpoint.starts_with('/') {
            Ok(format!("http://{}{}", address, self.endpoint))
        } else {
            Ok(format!("http://{}/{}", address, self.endpoint))
        }
    }
}

#[async_trait]
impl Probe for HttpProbe {
    fn kind(&self) -> HealthCheckKind {
        HealthCheckKind::Http
    }

    #[instrument(skip(self, replica), fields(replica = %replica.label()))]
    async fn probe(&self, replica: &Replica) -> ProbeResult {
        let result = timed(replica, self.kind(), self.timeout, async {
            let url = self.url_for(replica)?;
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| format!("GET {}: {}", url, e))?;
            let status = response.status();
            if status.is_success() {
                Ok(())
            } else {
                Err(format!("GET {} returned {}", url, status))
            }
        })
        .await;
        debug!(status = ?result.status, latency_ms = result.latency_ms, "http probe finished");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probes::ProbeStatus;
    use keelson_types::{HealthState, ReplicaId, ReplicaRole};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn replica(address: &str) -> Replica {
        Replica {
            id: ReplicaId::new("abc123"),
            service: "web".to_string(),
            ordinal: 1,
            image: "nginx:1.27".to_string(),
            health: HealthState::Healthy,
            role: ReplicaRole::Stable,
            address: Some(address.to_string()),
        }
    }

    #[test]
    fn test_url_for() {
        let r = replica("172.18.0.5");
        let probe = |e: &str| HttpProbe::new(e, Duration::from_secs(1)).unwrap();
        assert_eq!(probe("/health").url_for(&r).unwrap(), "http://172.18.0.5/health");
        assert_eq!(
            probe(":8080/ready").url_for(&r).unwrap(),
            "http://172.18.0.5:8080/ready"
        );
        assert_eq!(probe("status").url_for(&r).unwrap(), "http://172.18.0.5/status");
        assert_eq!(
            probe("https://example.com/up").url_for(&r).unwrap(),
            "https://example.com/up"
        );
    }

    #[tokio::test]
    async fn test_success_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let probe = HttpProbe::new(
            format!(":{}/health", server.address().port()),
            Duration::from_secs(2),
        )
        .unwrap();
        let result = probe.probe(&replica(&server.address().ip().to_string())).await;
        assert_eq!(result.status, ProbeStatus::Pass);
    }

    #[tokio::test]
    async fn test_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let probe = HttpProbe::new(format!("{}/health", server.uri()), Duration::from_secs(2)).unwrap();
        let result = probe.probe(&replica("unused")).await;
        assert_eq!(result.status, ProbeStatus::Fail);
        assert!(result.message.unwrap().contains("503"));
    }

    #[tokio::test]
    async fn test_slow_endpoint_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let probe = HttpProbe::new(server.uri(), Duration::from_millis(50)).unwrap();
        let result = probe.probe(&replica("unused")).await;
        assert_eq!(result.status, ProbeStatus::Fail);
    }
}
