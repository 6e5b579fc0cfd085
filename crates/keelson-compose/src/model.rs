//! Compose file model
//!
//! Only the keys the reconciler reads are modelled; everything else in the
//! file is ignored on read and left untouched on rewrite.

use crate::error::{ComposeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// `depends_on`: a list of names or a mapping keyed by name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependsOn {
    List(Vec<String>),
    Map(BTreeMap<String, serde_yaml::Value>),
}

impl Default for DependsOn {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

impl DependsOn {
    /// Dependency names; mapping values (conditions) are ignored
    pub fn names(&self) -> Vec<&str> {
        match self {
            Self::List(names) => names.iter().map(String::as_str).collect(),
            Self::Map(map) => map.keys().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Deploy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<u32>,
}

/// One entry under `services:`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy: Option<Deploy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<DependsOn>,
}

impl ServiceDef {
    /// Declared replica count: `max(scale, deploy.replicas, 1)`
    pub fn declared_replicas(&self) -> u32 {
        let scale = self.scale.unwrap_or(0);
        let replicas = self
            .deploy
            .as_ref()
            .and_then(|d| d.replicas)
            .unwrap_or(0);
        scale.max(replicas).max(1)
    }

    /// Image string with surrounding whitespace removed, if non-empty
    pub fn image(&self) -> Option<&str> {
        self.image.as_deref().map(str::trim).filter(|i| !i.is_empty())
    }

    pub fn dependencies(&self) -> Vec<&str> {
        self.depends_on
            .as_ref()
            .map(DependsOn::names)
            .unwrap_or_default()
    }
}

/// A parsed compose file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComposeFile {
    #[serde(default)]
    pub services: BTreeMap<String, ServiceDef>,
}

impl ComposeFile {
    pub fn parse(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ComposeError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn service(&self, name: &str) -> Option<&ServiceDef> {
        self.services.get(name)
    }

    /// Services with a non-empty `image:`, in name order
    pub fn images(&self) -> impl Iterator<Item = (&str, &str)> {
        self.services
            .iter()
            .filter_map(|(name, def)| def.image().map(|image| (name.as_str(), image)))
    }
}
