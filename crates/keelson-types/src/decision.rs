//! Update decisions

use crate::ImageRef;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which ordering produced a selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicySource {
    Semver,
    Numerical,
    Alphabetical,
    Fallback,
}

impl fmt::Display for PolicySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicySource::Semver => write!(f, "semver"),
            PolicySource::Numerical => write!(f, "numerical"),
            PolicySource::Alphabetical => write!(f, "alphabetical"),
            PolicySource::Fallback => write!(f, "fallback"),
        }
    }
}

/// A service whose selected tag differs from the one it runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateDecision {
    pub service: String,
    pub image: ImageRef,
    pub current_tag: String,
    pub selected_tag: String,
    pub source: PolicySource,
}

impl UpdateDecision {
    /// Returns `None` when the selection equals the current tag
    pub fn new(
        service: impl Into<String>,
        image: ImageRef,
        selected_tag: impl Into<String>,
        source: PolicySource,
    ) -> Option<Self> {
        let selected_tag = selected_tag.into();
        if selected_tag == image.tag {
            return None;
        }
        Some(Self {
            service: service.into(),
            current_tag: image.tag.clone(),
            image,
            selected_tag,
            source,
        })
    }

    /// Image string currently deployed
    pub fn current_image(&self) -> String {
        self.image.render()
    }

    /// Image string to roll out
    pub fn target_image(&self) -> String {
        self.image.with_tag(&self.selected_tag).render()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_decision_when_unchanged() {
        let image = ImageRef::parse("ghcr.io/org/app:v1.2.3").unwrap();
        assert!(UpdateDecision::new("app", image, "v1.2.3", PolicySource::Semver).is_none());
    }

    #[test]
    fn test_target_image() {
        let image = ImageRef::parse("ghcr.io/org/app:v1.2.3").unwrap();
        let decision = UpdateDecision::new("app", image, "v1.2.4", PolicySource::Semver).unwrap();
        assert_eq!(decision.current_tag, "v1.2.3");
        assert_eq!(decision.current_image(), "ghcr.io/org/app:v1.2.3");
        assert_eq!(decision.target_image(), "ghcr.io/org/app:v1.2.4");
    }

    #[test]
    fn test_implicit_latest() {
        let image = ImageRef::parse("nginx").unwrap();
        let decision = UpdateDecision::new("web", image, "1.27", PolicySource::Fallback).unwrap();
        assert_eq!(decision.current_tag, "latest");
        assert_eq!(decision.target_image(), "nginx:1.27");
    }
}
