//! One-at-a-time (rolling) strategy

use super::base::{Run, StrategyBase, Transition};
use crate::error::Result;
use async_trait::async_trait;
use keelson_engine::Engine;
use keelson_types::{StrategyConfig, StrategyKind};
use std::sync::Arc;

/// Replaces replicas in ordinal order, each verified before the next.
///
/// At most one replica is down at any time. `step_delay` is paused between
/// replicas.
pub struct OneAtATimeStrategy {
    base: StrategyBase,
}

impl OneAtATimeStrategy {
    pub fn new(config: StrategyConfig, engine: Arc<dyn Engine>) -> Result<Self> {
        Ok(Self {
            base: StrategyBase::new(config, engine)?,
        })
    }
}

#[async_trait]
impl Transition for OneAtATimeStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::OneAtATime
    }

    async fn transition(&self, run: &mut Run<'_>) -> Result<()> {
        let targets = run.targets.clone();
        for (index, old) in targets.iter().enumerate() {
            if index > 0 {
                run.pause(run.config().step_delay).await?;
            }
            let new = run.replace(old).await?;
            run.verify(std::slice::from_ref(&new)).await?;
        }
        Ok(())
    }
}

impl_update_strategy!(OneAtATimeStrategy);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::{RollbackStatus, UpdateRequest};
    use crate::strategies::UpdateStrategy;
    use crate::StrategyError;
    use keelson_engine::InMemoryEngine;
    use keelson_types::{HealthState, ReplicaRole};

    fn seeded(replicas: u32) -> Arc<InMemoryEngine> {
        let engine = Arc::new(InMemoryEngine::new());
        engine.seed("web", replicas, "web:1");
        engine
    }

    #[tokio::test(start_paused = true)]
    async fn test_replaces_every_replica() {
        let engine = seeded(3);
        let strategy = OneAtATimeStrategy::new(StrategyConfig::default(), engine.clone()).unwrap();

        let result = strategy
            .execute(&UpdateRequest::new("web", "web:1", "web:2").with_declared(3))
            .await;
        assert!(result.is_success(), "{:?}", result.error);
        assert_eq!(result.started, 3);
        assert_eq!(
            engine.snapshot("web"),
            vec![
                (1, "web:2".to_string(), ReplicaRole::Stable),
                (2, "web:2".to_string(), ReplicaRole::Stable),
                (3, "web:2".to_string(), ReplicaRole::Stable),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_at_first_unhealthy_without_rollback() {
        let engine = seeded(3);
        engine.script_replica_health("web:2", 2, vec![HealthState::Unhealthy]);
        let strategy = OneAtATimeStrategy::new(StrategyConfig::default(), engine.clone()).unwrap();

        let result = strategy
            .execute(&UpdateRequest::new("web", "web:1", "web:2").with_declared(3))
            .await;
        assert!(matches!(
            result.error,
            Some(StrategyError::HealthUnhealthy { ref replica }) if replica == "web#2"
        ));
        assert_eq!(result.rollback, RollbackStatus::NotAttempted);
        assert_eq!(
            engine.snapshot("web"),
            vec![
                (1, "web:2".to_string(), ReplicaRole::Stable),
                (2, "web:2".to_string(), ReplicaRole::Stable),
                (3, "web:1".to_string(), ReplicaRole::Stable),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_leaves_undeclared_replicas_alone() {
        let engine = seeded(3);
        let strategy = OneAtATimeStrategy::new(StrategyConfig::default(), engine.clone()).unwrap();

        let result = strategy
            .execute(&UpdateRequest::new("web", "web:1", "web:2").with_declared(2))
            .await;
        assert!(result.is_success(), "{:?}", result.error);
        assert_eq!(result.started, 2);
        assert_eq!(
            engine.snapshot("web"),
            vec![
                (1, "web:2".to_string(), ReplicaRole::Stable),
                (2, "web:2".to_string(), ReplicaRole::Stable),
                (3, "web:1".to_string(), ReplicaRole::Stable),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_replicas() {
        let engine = Arc::new(InMemoryEngine::new());
        let strategy = OneAtATimeStrategy::new(StrategyConfig::default(), engine).unwrap();

        let result = strategy.execute(&UpdateRequest::new("web", "web:1", "web:2")).await;
        assert!(matches!(result.error, Some(StrategyError::NoReplicas { .. })));
        assert_eq!(result.started, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pre_command_failure_aborts_before_any_change() {
        let engine = seeded(2);
        engine.script_exec("drain", 7);
        let mut config = StrategyConfig::default().with_rollback(true);
        config.pre_update_command = Some("drain".to_string());
        let strategy = OneAtATimeStrategy::new(config, engine.clone()).unwrap();

        let result = strategy
            .execute(&UpdateRequest::new("web", "web:1", "web:2").with_declared(2))
            .await;
        assert!(matches!(
            result.error,
            Some(StrategyError::PreCommandFailed { .. })
        ));
        assert_eq!(result.started, 0);
        assert!(engine
            .snapshot("web")
            .iter()
            .all(|(_, image, _)| image == "web:1"));
    }
}
