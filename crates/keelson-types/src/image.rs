//! Image references
//!
//! Splits compose `image:` strings into registry kind, repository path and
//! tag, and renders them back. Parsing is total over any string that passes
//! the shape check, and `render(parse(s)) == s`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Tag assumed when an image string carries none
pub const DEFAULT_TAG: &str = "latest";

/// Host used for Docker Hub when the reference names none
pub const DOCKER_HUB_HOST: &str = "docker.io";

/// Registry family an image is hosted on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryKind {
    DockerHub,
    Ghcr,
    Gcr,
    Acr,
    Ecr,
    Docr,
    Harbor,
    Quay,
    Custom,
}

impl RegistryKind {
    pub const ALL: [RegistryKind; 9] = [
        RegistryKind::DockerHub,
        RegistryKind::Ghcr,
        RegistryKind::Gcr,
        RegistryKind::Acr,
        RegistryKind::Ecr,
        RegistryKind::Docr,
        RegistryKind::Harbor,
        RegistryKind::Quay,
        RegistryKind::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RegistryKind::DockerHub => "dockerhub",
            RegistryKind::Ghcr => "ghcr",
            RegistryKind::Gcr => "gcr",
            RegistryKind::Acr => "acr",
            RegistryKind::Ecr => "ecr",
            RegistryKind::Docr => "docr",
            RegistryKind::Harbor => "harbor",
            RegistryKind::Quay => "quay",
            RegistryKind::Custom => "custom",
        }
    }

    /// Classify a registry host. `None` means the reference carried no host.
    pub fn classify(host: Option<&str>, harbor_hosts: &[String]) -> Self {
        let Some(host) = host else {
            return RegistryKind::DockerHub;
        };
        let host = host.to_ascii_lowercase();

        if host == "registry.digitalocean.com" {
            RegistryKind::Docr
        } else if host == "ghcr.io" {
            RegistryKind::Ghcr
        } else if host == "gcr.io" || host.ends_with(".gcr.io") {
            RegistryKind::Gcr
        } else if host.ends_with(".azurecr.io") {
            RegistryKind::Acr
        } else if host.contains(".dkr.ecr.") && host.ends_with(".amazonaws.com") {
            RegistryKind::Ecr
        } else if host == "quay.io" {
            RegistryKind::Quay
        } else if host.starts_with("harbor.")
            || harbor_hosts.iter().any(|h| h.eq_ignore_ascii_case(&host))
        {
            RegistryKind::Harbor
        } else if matches!(
            host.as_str(),
            "docker.io" | "index.docker.io" | "registry-1.docker.io"
        ) {
            RegistryKind::DockerHub
        } else {
            RegistryKind::Custom
        }
    }
}

impl fmt::Display for RegistryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegistryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dockerhub" | "docker" | "docker.io" => Ok(RegistryKind::DockerHub),
            "ghcr" => Ok(RegistryKind::Ghcr),
            "gcr" => Ok(RegistryKind::Gcr),
            "acr" => Ok(RegistryKind::Acr),
            "ecr" => Ok(RegistryKind::Ecr),
            "docr" => Ok(RegistryKind::Docr),
            "harbor" => Ok(RegistryKind::Harbor),
            "quay" => Ok(RegistryKind::Quay),
            "custom" => Ok(RegistryKind::Custom),
            other => Err(format!("unknown registry kind: {}", other)),
        }
    }
}

/// Image reference parse failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid image reference '{reference}': {reason}")]
pub struct ImageRefError {
    pub reference: String,
    pub reason: String,
}

impl ImageRefError {
    fn new(reference: &str, reason: impl Into<String>) -> Self {
        Self {
            reference: reference.to_string(),
            reason: reason.into(),
        }
    }
}

/// A parsed image reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    /// Registry family
    pub kind: RegistryKind,

    /// Registry host exactly as written (`None` for bare Docker Hub names)
    pub host: Option<String>,

    /// Repository path; single-segment Docker Hub names get `library/`
    pub repository: String,

    /// Current tag (`latest` when absent)
    pub tag: String,

    /// Content digest, when pinned with `@sha256:...`
    pub digest: Option<String>,

    explicit_tag: bool,
    implicit_library: bool,
}

impl ImageRef {
    /// Parse an image string with no user-declared Harbor hosts
    pub fn parse(reference: &str) -> Result<Self, ImageRefError> {
        Self::parse_with(reference, &[])
    }

    /// Parse an image string, treating `harbor_hosts` as Harbor registries
    pub fn parse_with(reference: &str, harbor_hosts: &[String]) -> Result<Self, ImageRefError> {
        if reference.is_empty() {
            return Err(ImageRefError::new(reference, "empty reference"));
        }
        if let Some(bad) = reference
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/' | ':' | '@')))
        {
            return Err(ImageRefError::new(
                reference,
                format!("unexpected character '{}'", bad),
            ));
        }

        let (name, digest) = match reference.split_once('@') {
            Some((name, digest)) => {
                if digest.contains('@') {
                    return Err(ImageRefError::new(reference, "more than one '@'"));
                }
                match digest.split_once(':') {
                    Some((algo, hex)) if !algo.is_empty() && !hex.is_empty() => {}
                    _ => return Err(ImageRefError::new(reference, "malformed digest")),
                }
                (name, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        // A colon after the last slash separates the tag; earlier colons
        // belong to a host:port pair.
        let last_slash = name.rfind('/');
        let (path, tag) = match name.rfind(':') {
            Some(colon) if last_slash.map_or(true, |slash| colon > slash) => {
                let tag = &name[colon + 1..];
                if tag.is_empty() {
                    return Err(ImageRefError::new(reference, "empty tag"));
                }
                (&name[..colon], Some(tag))
            }
            _ => (name, None),
        };

        let segments: Vec<&str> = path.split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(ImageRefError::new(reference, "empty path segment"));
        }

        let first = segments[0];
        let has_host = segments.len() > 1
            && (first.contains('.') || first.contains(':') || first == "localhost");
        let (host, repo_segments) = if has_host {
            (Some(first.to_string()), &segments[1..])
        } else {
            (None, &segments[..])
        };
        if repo_segments.iter().any(|s| s.contains(':')) {
            return Err(ImageRefError::new(reference, "misplaced ':' in repository"));
        }

        let kind = RegistryKind::classify(host.as_deref(), harbor_hosts);
        let mut repository = repo_segments.join("/");
        let implicit_library = kind == RegistryKind::DockerHub && repo_segments.len() == 1;
        if implicit_library {
            repository = format!("library/{}", repository);
        }

        Ok(Self {
            kind,
            host,
            repository,
            tag: tag.unwrap_or(DEFAULT_TAG).to_string(),
            digest,
            explicit_tag: tag.is_some(),
            implicit_library,
        })
    }

    /// Registry host to talk to (Docker Hub when none was written)
    pub fn registry_host(&self) -> &str {
        self.host.as_deref().unwrap_or(DOCKER_HUB_HOST)
    }

    /// Whether the reference is pinned by digest
    pub fn is_digest_pinned(&self) -> bool {
        self.digest.is_some()
    }

    /// Whether the tag was written explicitly
    pub fn has_explicit_tag(&self) -> bool {
        self.explicit_tag
    }

    /// Image name without tag or digest, as written
    pub fn name(&self) -> String {
        let path = if self.implicit_library {
            self.repository
                .strip_prefix("library/")
                .unwrap_or(&self.repository)
        } else {
            &self.repository
        };
        match &self.host {
            Some(host) => format!("{}/{}", host, path),
            None => path.to_string(),
        }
    }

    /// Same image at another tag; drops any digest pin
    pub fn with_tag(&self, tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            digest: None,
            explicit_tag: true,
            ..self.clone()
        }
    }

    /// Render back to an image string
    pub fn render(&self) -> String {
        let mut out = self.name();
        if self.explicit_tag {
            out.push(':');
            out.push_str(&self.tag);
        }
        if let Some(digest) = &self.digest {
            out.push('@');
            out.push_str(digest);
        }
        out
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl FromStr for ImageRef {
    type Err = ImageRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Whether a registry tag is a digest artifact rather than a version label.
///
/// Covers `sha256:<hex>` and the `sha256-<hex>[.sig|.att|...]` tags that
/// signing tools push next to images.
pub fn is_digest_tag(tag: &str) -> bool {
    let rest = match tag
        .strip_prefix("sha256:")
        .or_else(|| tag.strip_prefix("sha256-"))
    {
        Some(rest) => rest,
        None => return false,
    };
    let hex_len = rest.chars().take_while(|c| c.is_ascii_hexdigit()).count();
    hex_len == 64
}
