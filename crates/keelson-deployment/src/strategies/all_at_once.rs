//! All-at-once (recreate) strategy

use super::base::{Run, StrategyBase, Transition};
use crate::error::Result;
use crate::phase::{log_phase, Phase};
use async_trait::async_trait;
use keelson_engine::Engine;
use keelson_types::{StrategyConfig, StrategyKind};
use std::sync::Arc;

/// Stops every target replica, then starts every new replica.
///
/// The service is down between the two steps.
pub struct AllAtOnceStrategy {
    base: StrategyBase,
}

impl AllAtOnceStrategy {
    pub fn new(config: StrategyConfig, engine: Arc<dyn Engine>) -> Result<Self> {
        Ok(Self {
            base: StrategyBase::new(config, engine)?,
        })
    }
}

#[async_trait]
impl Transition for AllAtOnceStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::AllAtOnce
    }

    async fn transition(&self, run: &mut Run<'_>) -> Result<()> {
        let targets = run.targets.clone();
        let specs = targets.iter().map(|old| run.successor(old)).collect();

        run.stop_all(&targets).await?;
        let started = run.start_all(specs).await?;
        log_phase(
            run.service(),
            Phase::Transition,
            format!("{} replicas recreated", started.len()),
        );
        run.verify(&started).await
    }
}

impl_update_strategy!(AllAtOnceStrategy);
