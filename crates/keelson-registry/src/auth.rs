//! Registry authentication
//!
//! Credential bundles map onto two wire forms: HTTP basic credentials
//! (also presented to a token realm) and a static bearer token. Registries
//! that answer 401 with a `Bearer` challenge are then asked for a
//! short-lived pull token.

use crate::error::{RegistryError, Result};
use keelson_types::{RegistryCredentials, RegistryKind};
use std::fmt;

/// Username presented with a GHCR/DOCR token used as a password
const TOKEN_USERNAME: &str = "token";

/// Username for service-account key files
const KEY_FILE_USERNAME: &str = "_json_key";

/// How requests to a registry are authenticated
#[derive(Clone, PartialEq, Eq, Default)]
pub enum Auth {
    #[default]
    Anonymous,
    Basic { username: String, password: String },
    Bearer(String),
}

impl Auth {
    /// Map a credential bundle for a registry kind
    pub fn from_credentials(kind: RegistryKind, credentials: &RegistryCredentials) -> Result<Self> {
        Ok(match credentials {
            RegistryCredentials::Basic { username, password }
            | RegistryCredentials::Hosted {
                username, password, ..
            } => Auth::Basic {
                username: username.clone(),
                password: password.clone(),
            },
            RegistryCredentials::Token { token } => match kind {
                RegistryKind::Ghcr | RegistryKind::Docr => Auth::Basic {
                    username: TOKEN_USERNAME.to_string(),
                    password: token.clone(),
                },
                _ => Auth::Bearer(token.clone()),
            },
            RegistryCredentials::KeyFile { credentials_file } => {
                let contents = std::fs::read_to_string(credentials_file).map_err(|source| {
                    RegistryError::CredentialsFile {
                        path: credentials_file.clone(),
                        source,
                    }
                })?;
                Auth::Basic {
                    username: KEY_FILE_USERNAME.to_string(),
                    password: contents.trim_end().to_string(),
                }
            }
            RegistryCredentials::ServicePrincipal {
                client_id,
                client_secret,
                ..
            } => Auth::Basic {
                username: client_id.clone(),
                password: client_secret.clone(),
            },
            RegistryCredentials::AccessKeys { .. } => {
                return Err(RegistryError::Unsupported {
                    kind,
                    reason: "access keys need a cloud SDK exchange; configure a pre-fetched token"
                        .to_string(),
                })
            }
        })
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Auth::Anonymous)
    }

    /// Attach these credentials to a request
    pub fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Auth::Anonymous => request,
            Auth::Basic { username, password } => request.basic_auth(username, Some(password)),
            Auth::Bearer(token) => request.bearer_auth(token),
        }
    }
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::Anonymous => write!(f, "Anonymous"),
            Auth::Basic { username, .. } => write!(f, "Basic({}, ***)", username),
            Auth::Bearer(_) => write!(f, "Bearer(***)"),
        }
    }
}

/// A parsed `WWW-Authenticate: Bearer ...` challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub realm: String,
    pub service: Option<String>,
    pub scope: Option<String>,
}

impl Challenge {
    /// Parse a bearer challenge; `None` for other schemes or without a realm
    pub fn parse(header: &str) -> Option<Self> {
        let (scheme, params) = header.trim().split_once(char::is_whitespace)?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }

        let mut realm = None;
        let mut service = None;
        let mut scope = None;
        for (key, value) in auth_params(params) {
            match key.to_ascii_lowercase().as_str() {
                "realm" => realm = Some(value),
                "service" => service = Some(value),
                "scope" => scope = Some(value),
                _ => {}
            }
        }

        Some(Self {
            realm: realm?,
            service,
            scope,
        })
    }

    /// Scope to request, defaulting to pull access on `repository`
    pub fn scope_for(&self, repository: &str) -> String {
        self.scope
            .clone()
            .unwrap_or_else(|| format!("repository:{}:pull", repository))
    }
}

/// Split `key=value, key="quoted, value"` auth parameters
fn auth_params(input: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace() || *c == ',').is_some() {}

        let key: String = std::iter::from_fn(|| chars.next_if(|c| *c != '=')).collect();
        if key.trim().is_empty() || chars.next() != Some('=') {
            break;
        }

        let value = if chars.next_if_eq(&'"').is_some() {
            let mut value = String::new();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => value.extend(chars.next()),
                    '"' => break,
                    _ => value.push(c),
                }
            }
            value
        } else {
            let raw: String = std::iter::from_fn(|| chars.next_if(|c| *c != ',')).collect();
            raw.trim().to_string()
        };

        params.push((key.trim().to_string(), value));
    }

    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_docker_hub_challenge() {
        let challenge = Challenge::parse(
            r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/nginx:pull""#,
        )
        .unwrap();
        assert_eq!(challenge.realm, "https://auth.docker.io/token");
        assert_eq!(challenge.service.as_deref(), Some("registry.docker.io"));
        assert_eq!(challenge.scope_for("ignored"), "repository:library/nginx:pull");
    }

    #[test]
    fn test_parse_scope_with_comma_and_spaces() {
        let challenge = Challenge::parse(
            r#"bearer realm="https://ghcr.io/token", scope="repository:org/app:pull,push""#,
        )
        .unwrap();
        assert_eq!(challenge.scope.as_deref(), Some("repository:org/app:pull,push"));
        assert_eq!(challenge.service, None);
    }

    #[test]
    fn test_parse_rejects_other_schemes() {
        assert!(Challenge::parse(r#"Basic realm="registry""#).is_none());
        assert!(Challenge::parse(r#"Bearer service="x""#).is_none());
        assert!(Challenge::parse("").is_none());
    }

    #[test]
    fn test_default_scope() {
        let challenge = Challenge::parse("Bearer realm=https://quay.io/v2/auth").unwrap();
        assert_eq!(challenge.realm, "https://quay.io/v2/auth");
        assert_eq!(challenge.scope_for("org/app"), "repository:org/app:pull");
    }

    #[test]
    fn test_credential_mapping() {
        let basic = |u: &str, p: &str| Auth::Basic {
            username: u.to_string(),
            password: p.to_string(),
        };
        let token = RegistryCredentials::Token {
            token: "t0k".to_string(),
        };
        assert_eq!(
            Auth::from_credentials(RegistryKind::Ghcr, &token).unwrap(),
            basic("token", "t0k")
        );
        assert_eq!(
            Auth::from_credentials(RegistryKind::Quay, &token).unwrap(),
            Auth::Bearer("t0k".to_string())
        );

        let principal = RegistryCredentials::ServicePrincipal {
            tenant_id: "t".to_string(),
            client_id: "c".to_string(),
            client_secret: "s".to_string(),
            registry: "r.azurecr.io".to_string(),
        };
        assert_eq!(
            Auth::from_credentials(RegistryKind::Acr, &principal).unwrap(),
            basic("c", "s")
        );

        let keys = RegistryCredentials::AccessKeys {
            access_key_id: "a".to_string(),
            secret_access_key: "s".to_string(),
            region: "us-east-1".to_string(),
            registry: "1.dkr.ecr.us-east-1.amazonaws.com".to_string(),
        };
        assert!(matches!(
            Auth::from_credentials(RegistryKind::Ecr, &keys),
            Err(RegistryError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gcr.json");
        std::fs::write(&path, "{\"type\":\"service_account\"}\n").unwrap();

        let creds = RegistryCredentials::KeyFile {
            credentials_file: path.display().to_string(),
        };
        assert_eq!(
            Auth::from_credentials(RegistryKind::Gcr, &creds).unwrap(),
            Auth::Basic {
                username: "_json_key".to_string(),
                password: "{\"type\":\"service_account\"}".to_string(),
            }
        );

        let missing = RegistryCredentials::KeyFile {
            credentials_file: dir.path().join("nope.json").display().to_string(),
        };
        assert!(matches!(
            Auth::from_credentials(RegistryKind::Gcr, &missing),
            Err(RegistryError::CredentialsFile { .. })
        ));
    }

    #[test]
    fn test_debug_hides_secrets() {
        let auth = Auth::Basic {
            username: "bot".to_string(),
            password: "hunter2".to_string(),
        };
        assert!(!format!("{:?}", auth).contains("hunter2"));
    }
}
