//! Replica detection
//!
//! Binds a service's declared ordinals (1..=N) to the containers the engine
//! reports for it. Containers numbered past N are surplus: they are reported
//! but never updated.

use crate::error::Result;
use keelson_engine::Engine;
use keelson_types::{Replica, ReplicaRole};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Live replicas of one service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaSet {
    pub service: String,
    pub declared: u32,

    /// Live replicas on a declared ordinal, by ordinal then role
    pub replicas: Vec<Replica>,

    /// Live replicas numbered past `declared`
    pub surplus: Vec<Replica>,
}

impl ReplicaSet {
    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    pub fn roles(&self) -> BTreeSet<ReplicaRole> {
        self.replicas.iter().map(|r| r.role).collect()
    }

    pub fn with_role(&self, role: ReplicaRole) -> Vec<Replica> {
        self.replicas
            .iter()
            .filter(|r| r.role == role)
            .cloned()
            .collect()
    }

    /// Role of the set currently serving.
    ///
    /// When more than one role is live (a standby set left over from an
    /// interrupted blue-green run), the set running `current_image` wins,
    /// then the stable set.
    pub fn primary_role(&self, current_image: &str) -> Option<ReplicaRole> {
        let roles = self.roles();
        if roles.len() <= 1 {
            return roles.into_iter().next();
        }
        let on_current = roles.iter().copied().find(|role| {
            self.replicas
                .iter()
                .filter(|r| r.role == *role)
                .all(|r| r.image == current_image)
        });
        on_current.or_else(|| roles.iter().copied().find(|r| *r == ReplicaRole::Stable))
            .or_else(|| roles.into_iter().next())
    }

    /// Split into (primary, others)
    pub fn partition(&self, current_image: &str) -> (Vec<Replica>, Vec<Replica>) {
        match self.primary_role(current_image) {
            Some(role) => self.replicas.iter().cloned().partition(|r| r.role == role),
            None => (Vec::new(), Vec::new()),
        }
    }

    /// Declared ordinals with no live replica in any role
    pub fn missing_ordinals(&self) -> Vec<u32> {
        let live: BTreeSet<u32> = self.replicas.iter().map(|r| r.ordinal).collect();
        (1..=self.declared).filter(|o| !live.contains(o)).collect()
    }
}

/// Finds the live replicas of compose services
pub struct ReplicaDetector {
    engine: Arc<dyn Engine>,
}

impl ReplicaDetector {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self { engine }
    }

    /// Live replicas of `service`, which declares `declared` replicas
    pub async fn detect(&self, service: &str, declared: u32) -> Result<ReplicaSet> {
        let declared = declared.max(1);
        let (replicas, surplus): (Vec<_>, Vec<_>) = self
            .engine
            .list_replicas(service)
            .await?
            .into_iter()
            .partition(|r| (1..=declared).contains(&r.ordinal));
        let set = ReplicaSet {
            service: service.to_string(),
            declared,
            replicas,
            surplus,
        };

        let missing = set.missing_ordinals();
        if !set.is_empty() && !missing.is_empty() {
            warn!(service, ?missing, "declared replicas not running");
        }
        if !set.surplus.is_empty() {
            let ordinals: Vec<u32> = set.surplus.iter().map(|r| r.ordinal).collect();
            warn!(service, ?ordinals, "replicas beyond the declared count are left alone");
        }
        debug!(
            service,
            declared = set.declared,
            live = set.len(),
            "replicas detected"
        );
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keelson_engine::InMemoryEngine;
    use keelson_types::ReplicaSpec;

    #[tokio::test]
    async fn test_detect_binds_ordinals() {
        let engine = Arc::new(InMemoryEngine::new());
        engine.seed("web", 2, "nginx:1.25");
        let detector = ReplicaDetector::new(engine);

        let set = detector.detect("web", 3).await.unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.missing_ordinals(), vec![3]);

        assert!(set.surplus.is_empty());

        let empty = detector.detect("db", 1).await.unwrap();
        assert!(empty.is_empty());
        assert_eq!(empty.primary_role("postgres:16"), None);
    }

    #[tokio::test]
    async fn test_undeclared_ordinals_are_surplus() {
        let engine = Arc::new(InMemoryEngine::new());
        engine.seed("web", 3, "nginx:1.25");
        let set = ReplicaDetector::new(engine).detect("web", 2).await.unwrap();

        let ordinals: Vec<u32> = set.replicas.iter().map(|r| r.ordinal).collect();
        assert_eq!(ordinals, vec![1, 2]);
        assert_eq!(set.surplus.len(), 1);
        assert_eq!(set.surplus[0].ordinal, 3);

        let (targets, others) = set.partition("nginx:1.25");
        assert_eq!(targets.len(), 2);
        assert!(others.is_empty());
    }

    #[tokio::test]
    async fn test_primary_prefers_current_image() {
        let engine = Arc::new(InMemoryEngine::new());
        engine.seed("web", 2, "nginx:1.25");
        for ordinal in 1..=2 {
            engine
                .start_replica(
                    &ReplicaSpec::new("web", ordinal, "nginx:1.27").with_role(ReplicaRole::Green),
                )
                .await
                .unwrap();
        }
        let set = ReplicaDetector::new(engine).detect("web", 2).await.unwrap();

        assert_eq!(set.primary_role("nginx:1.25"), Some(ReplicaRole::Stable));
        assert_eq!(set.primary_role("nginx:1.27"), Some(ReplicaRole::Green));
        assert_eq!(set.primary_role("nginx:other"), Some(ReplicaRole::Stable));

        let (primary, standby) = set.partition("nginx:1.27");
        assert!(primary.iter().all(|r| r.role == ReplicaRole::Green));
        assert_eq!(standby.len(), 2);
    }
}
