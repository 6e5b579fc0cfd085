//! Tag listing contract and a static lister

use crate::error::{RegistryError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use keelson_types::ImageRef;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Lists the tags published for an image's repository
#[async_trait]
pub trait TagLister: Send + Sync {
    async fn list_tags(&self, image: &ImageRef) -> Result<Vec<String>>;

    fn name(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    Auth,
    Network,
}

/// Fixed tag lists keyed by image name (`ImageRef::name`)
///
/// Unknown names answer `NotFound`. Used by tests and dry runs.
#[derive(Default)]
pub struct StaticTagLister {
    tags: DashMap<String, Vec<String>>,
    failures: DashMap<String, Failure>,
    calls: AtomicUsize,
}

impl StaticTagLister {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<S: Into<String>>(&self, name: &str, tags: impl IntoIterator<Item = S>) {
        self.tags
            .insert(name.to_string(), tags.into_iter().map(Into::into).collect());
    }

    pub fn with_tags<S: Into<String>>(self, name: &str, tags: impl IntoIterator<Item = S>) -> Self {
        self.insert(name, tags);
        self
    }

    /// Listing `name` fails with an authentication error
    pub fn deny(&self, name: &str) {
        self.failures.insert(name.to_string(), Failure::Auth);
    }

    /// Listing `name` fails with a network error
    pub fn disconnect(&self, name: &str) {
        self.failures.insert(name.to_string(), Failure::Network);
    }

    /// Number of `list_tags` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TagLister for StaticTagLister {
    async fn list_tags(&self, image: &ImageRef) -> Result<Vec<String>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let name = image.name();

        if let Some(failure) = self.failures.get(&name) {
            return Err(match *failure {
                Failure::Auth => RegistryError::auth(image.registry_host(), "denied"),
                Failure::Network => RegistryError::network(image.registry_host(), "connection refused"),
            });
        }

        self.tags
            .get(&name)
            .map(|tags| tags.clone())
            .ok_or_else(|| RegistryError::NotFound {
                repository: image.repository.clone(),
            })
    }

    fn name(&self) -> &str {
        "static"
    }
}
