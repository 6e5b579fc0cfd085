//! Registry credential bundles
//!
//! Each `registry.<kind>` block holds one credential shape plus an optional
//! image policy. Shapes are tried in declaration order, most specific first.
//! Multiword keys also accept their all-lowercase spelling, which is what
//! layered config loaders hand over.

use crate::ImagePolicy;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the recognised credential shapes
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegistryCredentials {
    /// Self-hosted registry (Harbor, custom): `{url, username, password}`
    #[serde(rename_all = "camelCase")]
    Hosted {
        url: String,
        username: String,
        password: String,
    },

    /// Azure service principal: `{tenantId, clientId, clientSecret, registry}`
    #[serde(rename_all = "camelCase")]
    ServicePrincipal {
        #[serde(alias = "tenantid")]
        tenant_id: String,
        #[serde(alias = "clientid")]
        client_id: String,
        #[serde(alias = "clientsecret")]
        client_secret: String,
        registry: String,
    },

    /// AWS access keys: `{accessKeyId, secretAccessKey, region, registry}`
    #[serde(rename_all = "camelCase")]
    AccessKeys {
        #[serde(alias = "accesskeyid")]
        access_key_id: String,
        #[serde(alias = "secretaccesskey")]
        secret_access_key: String,
        region: String,
        registry: String,
    },

    /// `{username, password}`
    #[serde(rename_all = "camelCase")]
    Basic { username: String, password: String },

    /// `{token}`
    #[serde(rename_all = "camelCase")]
    Token { token: String },

    /// Service-account key file: `{credentialsFile}`
    #[serde(rename_all = "camelCase")]
    KeyFile {
        #[serde(alias = "credentialsfile")]
        credentials_file: String,
    },
}

impl RegistryCredentials {
    /// Registry host named by the bundle itself, if any
    pub fn declared_host(&self) -> Option<String> {
        match self {
            RegistryCredentials::Hosted { url, .. } => Some(strip_scheme(url)),
            RegistryCredentials::ServicePrincipal { registry, .. }
            | RegistryCredentials::AccessKeys { registry, .. } => Some(strip_scheme(registry)),
            _ => None,
        }
    }

    pub fn shape(&self) -> &'static str {
        match self {
            RegistryCredentials::Hosted { .. } => "hosted",
            RegistryCredentials::ServicePrincipal { .. } => "service-principal",
            RegistryCredentials::AccessKeys { .. } => "access-keys",
            RegistryCredentials::Basic { .. } => "basic",
            RegistryCredentials::Token { .. } => "token",
            RegistryCredentials::KeyFile { .. } => "key-file",
        }
    }
}

// Secrets never reach logs.
impl fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryCredentials::Hosted { url, username, .. } => f
                .debug_struct("Hosted")
                .field("url", url)
                .field("username", username)
                .finish_non_exhaustive(),
            RegistryCredentials::ServicePrincipal {
                tenant_id,
                client_id,
                registry,
                ..
            } => f
                .debug_struct("ServicePrincipal")
                .field("tenant_id", tenant_id)
                .field("client_id", client_id)
                .field("registry", registry)
                .finish_non_exhaustive(),
            RegistryCredentials::AccessKeys {
                region, registry, ..
            } => f
                .debug_struct("AccessKeys")
                .field("region", region)
                .field("registry", registry)
                .finish_non_exhaustive(),
            RegistryCredentials::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .finish_non_exhaustive(),
            RegistryCredentials::Token { .. } => f.debug_struct("Token").finish_non_exhaustive(),
            RegistryCredentials::KeyFile { credentials_file } => f
                .debug_struct("KeyFile")
                .field("credentials_file", credentials_file)
                .finish(),
        }
    }
}

fn strip_scheme(url: &str) -> String {
    url.trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/')
        .to_string()
}

/// Contents of a `registry.<kind>` block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySettings {
    #[serde(default, flatten, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<RegistryCredentials>,

    #[serde(default, skip_serializing_if = "Option::is_none", alias = "imagepolicy")]
    pub image_policy: Option<ImagePolicy>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shapes() {
        let cases = [
            ("username: u\npassword: p", "basic"),
            ("token: t", "token"),
            ("credentialsFile: /keys/gcr.json", "key-file"),
            (
                "tenantId: t\nclientId: c\nclientSecret: s\nregistry: r.azurecr.io",
                "service-principal",
            ),
            (
                "accessKeyId: a\nsecretAccessKey: s\nregion: us-east-1\nregistry: x",
                "access-keys",
            ),
            ("url: https://harbor.local\nusername: u\npassword: p", "hosted"),
        ];
        for (yaml, shape) in cases {
            let creds: RegistryCredentials = serde_yaml::from_str(yaml).unwrap();
            assert_eq!(creds.shape(), shape, "{}", yaml);
        }
    }

    #[test]
    fn test_settings_with_policy() {
        let yaml = r#"
token: abc
imagePolicy:
  semver:
    range: ">=1.0.0"
"#;
        let settings: RegistrySettings = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            settings.credentials,
            Some(RegistryCredentials::Token { .. })
        ));
        assert!(settings.image_policy.is_some());
    }

    #[test]
    fn test_lowercased_keys() {
        let yaml = r#"
tenantid: t
clientid: c
clientsecret: s
registry: r.azurecr.io
imagepolicy:
  semver: {}
"#;
        let settings: RegistrySettings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            settings.credentials.as_ref().map(RegistryCredentials::shape),
            Some("service-principal")
        );
        assert!(settings.image_policy.is_some());
    }

    #[test]
    fn test_settings_policy_only() {
        let settings: RegistrySettings =
            serde_yaml::from_str("imagePolicy:\n  alphabetical:\n    order: desc").unwrap();
        assert!(settings.credentials.is_none());
        assert!(settings.image_policy.is_some());
    }

    #[test]
    fn test_debug_hides_secrets() {
        let creds = RegistryCredentials::Basic {
            username: "user".into(),
            password: "hunter2".into(),
        };
        assert!(!format!("{:?}", creds).contains("hunter2"));
    }

    #[test]
    fn test_declared_host() {
        let creds = RegistryCredentials::Hosted {
            url: "https://harbor.corp.local/".into(),
            username: "u".into(),
            password: "p".into(),
        };
        assert_eq!(creds.declared_host().as_deref(), Some("harbor.corp.local"));
    }
}
