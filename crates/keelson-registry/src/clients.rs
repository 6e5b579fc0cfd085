//! Per-registry client set
//!
//! Picks the endpoint and credentials for an image from its registry kind
//! and keeps one [`DistributionClient`] per endpoint.

use crate::auth::Auth;
use crate::client::DistributionClient;
use crate::error::Result;
use crate::lister::TagLister;
use async_trait::async_trait;
use dashmap::DashMap;
use keelson_types::{ImageRef, RegistryCredentials, RegistryKind};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Tag lister dispatching to the right registry endpoint
#[derive(Default)]
pub struct RegistryClients {
    credentials: BTreeMap<RegistryKind, RegistryCredentials>,
    clients: DashMap<String, Arc<DistributionClient>>,
}

impl RegistryClients {
    pub fn new(credentials: BTreeMap<RegistryKind, RegistryCredentials>) -> Self {
        Self {
            credentials,
            clients: DashMap::new(),
        }
    }

    /// Endpoint serving an image's repository
    pub fn endpoint_for(&self, image: &ImageRef) -> String {
        match image.kind {
            RegistryKind::DockerHub => return "https://registry-1.docker.io".to_string(),
            RegistryKind::Ghcr => return "https://ghcr.io".to_string(),
            RegistryKind::Quay => return "https://quay.io".to_string(),
            RegistryKind::Docr => return "https://registry.digitalocean.com".to_string(),
            _ => {}
        }

        let host = image.registry_host();
        let configured = self
            .credentials
            .get(&image.kind)
            .and_then(|c| match c {
                RegistryCredentials::Hosted { url, .. } => Some(url.trim_end_matches('/')),
                _ => None,
            })
            .filter(|url| strip_scheme(url).eq_ignore_ascii_case(host));

        match configured {
            Some(url) if url.contains("://") => url.to_string(),
            _ => format!("https://{}", host),
        }
    }

    fn client_for(&self, image: &ImageRef) -> Result<Arc<DistributionClient>> {
        let endpoint = self.endpoint_for(image);
        if let Some(client) = self.clients.get(&endpoint) {
            return Ok(client.clone());
        }

        let auth = match self.credentials.get(&image.kind) {
            Some(credentials) => Auth::from_credentials(image.kind, credentials)?,
            None => Auth::Anonymous,
        };
        debug!(endpoint = %endpoint, kind = %image.kind, ?auth, "registry client created");

        let client = Arc::new(DistributionClient::new(endpoint.clone(), auth)?);
        self.clients.insert(endpoint, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl TagLister for RegistryClients {
    async fn list_tags(&self, image: &ImageRef) -> Result<Vec<String>> {
        self.client_for(image)?.list_tags(image).await
    }

    fn name(&self) -> &str {
        "registry"
    }
}

fn strip_scheme(url: &str) -> &str {
    url.split_once("://").map_or(url, |(_, rest)| rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryError;
    use wiremock::matchers::{basic_auth, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_endpoints() {
        let clients = RegistryClients::default();
        let endpoint = |image: &str| clients.endpoint_for(&ImageRef::parse(image).unwrap());

        assert_eq!(endpoint("nginx:1.25"), "https://registry-1.docker.io");
        assert_eq!(endpoint("docker.io/library/nginx"), "https://registry-1.docker.io");
        assert_eq!(endpoint("ghcr.io/org/app:v1"), "https://ghcr.io");
        assert_eq!(endpoint("myreg.azurecr.io/app:1"), "https://myreg.azurecr.io");
        assert_eq!(endpoint("registry.local:5000/app:1"), "https://registry.local:5000");
    }

    #[test]
    fn test_configured_url_supplies_scheme() {
        let mut credentials = BTreeMap::new();
        credentials.insert(
            RegistryKind::Custom,
            RegistryCredentials::Hosted {
                url: "http://registry.local:5000/".to_string(),
                username: "u".to_string(),
                password: "p".to_string(),
            },
        );
        let clients = RegistryClients::new(credentials);

        let local = ImageRef::parse("registry.local:5000/app:1").unwrap();
        assert_eq!(clients.endpoint_for(&local), "http://registry.local:5000");

        let other = ImageRef::parse("other.example:5000/app:1").unwrap();
        assert_eq!(clients.endpoint_for(&other), "https://other.example:5000");
    }

    #[tokio::test]
    async fn test_lists_with_kind_credentials() {
        let server = MockServer::start().await;
        Mock::given(path("/v2/team/app/tags/list"))
            .and(basic_auth("u", "p"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"name": "team/app", "tags": ["1.0"]})),
            )
            .mount(&server)
            .await;

        let mut credentials = BTreeMap::new();
        credentials.insert(
            RegistryKind::Custom,
            RegistryCredentials::Hosted {
                url: server.uri(),
                username: "u".to_string(),
                password: "p".to_string(),
            },
        );
        let clients = RegistryClients::new(credentials);

        let host = server.uri().trim_start_matches("http://").to_string();
        let image = ImageRef::parse(&format!("{}/team/app:1.0", host)).unwrap();
        assert_eq!(clients.list_tags(&image).await.unwrap(), vec!["1.0"]);
    }

    #[tokio::test]
    async fn test_unsupported_credentials_surface_per_image() {
        let mut credentials = BTreeMap::new();
        credentials.insert(
            RegistryKind::Ecr,
            RegistryCredentials::AccessKeys {
                access_key_id: "a".to_string(),
                secret_access_key: "s".to_string(),
                region: "us-east-1".to_string(),
                registry: "1.dkr.ecr.us-east-1.amazonaws.com".to_string(),
            },
        );
        let clients = RegistryClients::new(credentials);
        let image = ImageRef::parse("1.dkr.ecr.us-east-1.amazonaws.com/app:1").unwrap();
        assert!(matches!(
            clients.list_tags(&image).await,
            Err(RegistryError::Unsupported { .. })
        ));
    }
}
