//! Engine driver contract

use crate::error::Result;
use async_trait::async_trait;
use keelson_types::{HealthState, Replica, ReplicaId, ReplicaSpec};

/// Container lifecycle operations the update strategies rely on.
///
/// Replicas are addressed by service and ordinal when started and by
/// container id afterwards. Stopping a replica also removes its container.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Live replicas of a service, sorted by ordinal then role
    async fn list_replicas(&self, service: &str) -> Result<Vec<Replica>>;

    /// Start a replica at the given ordinal, role and image
    async fn start_replica(&self, spec: &ReplicaSpec) -> Result<Replica>;

    /// Stop and remove a replica
    async fn stop_replica(&self, id: &ReplicaId) -> Result<()>;

    /// The engine's own health verdict for a replica
    async fn inspect_health(&self, id: &ReplicaId) -> Result<HealthState>;

    /// Run a shell command inside a replica, returning its exit code
    async fn exec(&self, id: &ReplicaId, command: &str) -> Result<i32>;

    /// Restart a replica in place
    async fn restart_replica(&self, id: &ReplicaId) -> Result<()>;

    /// Remove dangling images
    async fn prune_images(&self) -> Result<()>;

    /// Engine name for logs
    fn name(&self) -> &str;
}
