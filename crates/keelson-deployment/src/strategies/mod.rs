//! Update strategy implementations

/// Implement [`UpdateStrategy`] for a strategy holding a `base: StrategyBase`
macro_rules! impl_update_strategy {
    ($strategy:ty) => {
        #[async_trait::async_trait]
        impl $crate::strategies::UpdateStrategy for $strategy {
            fn kind(&self) -> keelson_types::StrategyKind {
                $crate::strategies::base::Transition::kind(self)
            }

            fn config(&self) -> &keelson_types::StrategyConfig {
                self.base.config()
            }

            fn configure(&mut self, config: keelson_types::StrategyConfig) -> $crate::error::Result<()> {
                self.base.configure(config)
            }

            async fn execute(
                &self,
                request: &$crate::result::UpdateRequest,
            ) -> $crate::result::UpdateResult {
                $crate::strategies::base::drive(self, &self.base, request).await
            }

            async fn rollback(&self, service: &str) -> $crate::error::Result<()> {
                self.base.rollback(service).await
            }
        }
    };
}

mod all_at_once;
mod base;
mod blue_green;
mod canary;
mod one_at_a_time;

pub use all_at_once::AllAtOnceStrategy;
pub use base::StrategyBase;
pub use blue_green::BlueGreenStrategy;
pub use canary::CanaryStrategy;
pub use one_at_a_time::OneAtATimeStrategy;

use crate::error::Result;
use crate::result::{UpdateRequest, UpdateResult};
use async_trait::async_trait;
use keelson_engine::Engine;
use keelson_types::{StrategyConfig, StrategyKind};
use std::sync::Arc;

/// Moves a service's replicas from one image to another
#[async_trait]
pub trait UpdateStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    fn config(&self) -> &StrategyConfig;

    /// Replace the configuration (same kind only)
    fn configure(&mut self, config: StrategyConfig) -> Result<()>;

    /// Run the update. Failures are reported in the result, never raised.
    async fn execute(&self, request: &UpdateRequest) -> UpdateResult;

    /// Undo whatever the last Execute for `service` left journaled
    async fn rollback(&self, service: &str) -> Result<()>;
}

/// Factory for creating update strategies
pub fn create_strategy(
    config: StrategyConfig,
    engine: Arc<dyn Engine>,
) -> Result<Box<dyn UpdateStrategy>> {
    Ok(match config.kind {
        StrategyKind::OneAtATime => Box::new(OneAtATimeStrategy::new(config, engine)?),
        StrategyKind::AllAtOnce => Box::new(AllAtOnceStrategy::new(config, engine)?),
        StrategyKind::BlueGreen => Box::new(BlueGreenStrategy::new(config, engine)?),
        StrategyKind::Canary => Box::new(CanaryStrategy::new(config, engine)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use keelson_engine::InMemoryEngine;
    use keelson_types::{HealthCheckKind, HealthCheckSpec};

    #[test]
    fn test_factory_kinds() {
        let engine: Arc<dyn Engine> = Arc::new(InMemoryEngine::new());
        for kind in [
            StrategyKind::OneAtATime,
            StrategyKind::AllAtOnce,
            StrategyKind::BlueGreen,
            StrategyKind::Canary,
        ] {
            let strategy = create_strategy(StrategyConfig::new(kind), engine.clone()).unwrap();
            assert_eq!(strategy.kind(), kind);
        }
    }

    #[test]
    fn test_factory_normalizes_config() {
        let engine: Arc<dyn Engine> = Arc::new(InMemoryEngine::new());
        let strategy =
            create_strategy(StrategyConfig::new(StrategyKind::Canary).with_steps(vec![20, 60]), engine)
                .unwrap();
        assert_eq!(strategy.config().step_percentages, vec![20, 60, 100]);
        assert_eq!(strategy.config().health_check.failure_threshold, 3);
    }

    #[test]
    fn test_factory_rejects_missing_endpoint() {
        let engine: Arc<dyn Engine> = Arc::new(InMemoryEngine::new());
        let config = StrategyConfig::new(StrategyKind::OneAtATime)
            .with_health_check(HealthCheckSpec::new(HealthCheckKind::Http));
        assert!(create_strategy(config, engine).is_err());
    }

    #[test]
    fn test_configure_keeps_kind() {
        let engine: Arc<dyn Engine> = Arc::new(InMemoryEngine::new());
        let mut strategy = create_strategy(StrategyConfig::default(), engine).unwrap();
        assert!(strategy
            .configure(StrategyConfig::new(StrategyKind::Canary))
            .is_err());
        strategy
            .configure(StrategyConfig::default().with_rollback(true))
            .unwrap();
        assert!(strategy.config().rollback_on_failure);
    }
}
