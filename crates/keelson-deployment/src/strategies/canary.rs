//! Canary strategy

use super::base::{Run, StrategyBase, Transition};
use crate::error::Result;
use crate::phase::{log_phase, Phase};
use async_trait::async_trait;
use keelson_engine::Engine;
use keelson_types::{StrategyConfig, StrategyKind};
use std::sync::Arc;

/// Migrates a growing share of replicas through the configured steps.
///
/// At a step of `pct` percent, `ceil(pct * N / 100)` replicas (at least one)
/// run the new image. Every migrated replica is verified at each step, and
/// `step_delay` is paused between steps.
pub struct CanaryStrategy {
    base: StrategyBase,
}

impl CanaryStrategy {
    pub fn new(config: StrategyConfig, engine: Arc<dyn Engine>) -> Result<Self> {
        Ok(Self {
            base: StrategyBase::new(config, engine)?,
        })
    }
}

/// Replicas that should be migrated once `pct` percent is reached
pub(crate) fn step_goal(pct: u32, total: usize) -> usize {
    if total == 0 {
        return 0;
    }
    let goal = (pct as usize * total).div_ceil(100);
    goal.clamp(1, total)
}

#[async_trait]
impl Transition for CanaryStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Canary
    }

    async fn transition(&self, run: &mut Run<'_>) -> Result<()> {
        let targets = run.targets.clone();
        let steps = run.config().step_percentages.clone();
        let mut migrated = Vec::with_capacity(targets.len());

        for (index, pct) in steps.iter().copied().enumerate() {
            if index > 0 {
                run.pause(run.config().step_delay).await?;
            }

            let goal = step_goal(pct, targets.len());
            for old in &targets[migrated.len().min(goal)..goal] {
                migrated.push(run.replace(old).await?);
            }
            run.verify(&migrated).await?;
            log_phase(
                run.service(),
                Phase::Transition,
                format!("step {}%: {}/{} migrated", pct, migrated.len(), targets.len()),
            );

            if migrated.len() == targets.len() {
                break;
            }
        }
        Ok(())
    }
}

impl_update_strategy!(CanaryStrategy);
