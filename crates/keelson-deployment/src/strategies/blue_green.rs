//! Blue-green strategy
//!
//! The serving ("blue") set keeps running while a parallel set of equal
//! cardinality comes up on the new image under the other color. Once the new
//! set is healthy, dependents are restarted so they reconnect to it, the new
//! set is observed for the verification period, and blue is decommissioned.
//!
//! Host ports are bound only by [`ReplicaRole::Stable`] replicas, so a green
//! set that survives is promoted: once blue is gone, stable replicas of the
//! new image take over its ports and green is retired. A green set found
//! serving (an interrupted promotion) is replaced by stable directly.

use super::base::{Run, StrategyBase, Transition};
use crate::error::{Result, StrategyError};
use crate::phase::{log_phase, warn_phase, Phase};
use async_trait::async_trait;
use futures::future::join_all;
use keelson_engine::Engine;
use keelson_health::{Probe, ProbeStatus};
use keelson_types::{Replica, ReplicaRole, StrategyConfig, StrategyKind};
use std::sync::Arc;

pub struct BlueGreenStrategy {
    base: StrategyBase,
}

impl BlueGreenStrategy {
    pub fn new(config: StrategyConfig, engine: Arc<dyn Engine>) -> Result<Self> {
        Ok(Self {
            base: StrategyBase::new(config, engine)?,
        })
    }

    /// Color the new set takes given the serving set's role
    fn standby_role(serving: ReplicaRole) -> ReplicaRole {
        match serving {
            ReplicaRole::Green => ReplicaRole::Stable,
            _ => ReplicaRole::Green,
        }
    }

    async fn restart_dependents(&self, run: &Run<'_>) {
        for dependent in &run.request.dependents {
            let replicas = match run.engine().list_replicas(dependent).await {
                Ok(replicas) => replicas,
                Err(e) => {
                    warn_phase(run.service(), Phase::Switch, format!("{}: {}", dependent, e));
                    continue;
                }
            };
            let engine = run.engine();
            let results = join_all(replicas.iter().map(|r| engine.restart_replica(&r.id))).await;
            for (replica, result) in replicas.iter().zip(results) {
                if let Err(e) = result {
                    warn_phase(
                        run.service(),
                        Phase::Switch,
                        format!("restart of {} failed: {}", replica.label(), e),
                    );
                }
            }
        }
    }

    /// Move a green set onto the stable role, which owns the published ports
    async fn promote(&self, run: &mut Run<'_>) -> Result<()> {
        let green: Vec<Replica> = run
            .activated
            .iter()
            .filter(|r| r.role == ReplicaRole::Green)
            .cloned()
            .collect();
        if green.is_empty() {
            return Ok(());
        }

        let specs = green
            .iter()
            .map(|r| run.successor(r).with_role(ReplicaRole::Stable))
            .collect();
        let stable = run.start_all(specs).await?;
        run.verify(&stable).await?;
        run.stop_all(&green).await?;
        run.activated.retain(|r| r.role == ReplicaRole::Stable);
        log_phase(
            run.service(),
            Phase::Finalize,
            format!("{} replicas promoted to {}", stable.len(), ReplicaRole::Stable),
        );
        Ok(())
    }

    /// Probe every new replica once at the end of the verification period
    async fn observe(&self, run: &Run<'_>, green: &[Replica]) -> Result<()> {
        let checker = self.base.checker();
        let results = join_all(green.iter().map(|r| checker.probe(r))).await;
        for (replica, result) in green.iter().zip(results) {
            if result.status == ProbeStatus::Fail {
                warn_phase(
                    run.service(),
                    Phase::VerifyHealth,
                    format!(
                        "{} failed after switch: {}",
                        replica.label(),
                        result.message.unwrap_or_default()
                    ),
                );
                return Err(StrategyError::HealthUnhealthy {
                    replica: replica.label(),
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Transition for BlueGreenStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::BlueGreen
    }

    async fn transition(&self, run: &mut Run<'_>) -> Result<()> {
        let serving = run.targets.first().map(|r| r.role).unwrap_or_default();
        let color = Self::standby_role(serving);

        let leftovers: Vec<Replica> = run
            .others
            .iter()
            .filter(|r| r.role == color)
            .cloned()
            .collect();
        if !leftovers.is_empty() {
            log_phase(
                run.service(),
                Phase::Transition,
                format!("removing {} leftover {} replicas", leftovers.len(), color),
            );
            run.stop_all(&leftovers).await?;
        }

        let specs = run
            .targets
            .iter()
            .map(|blue| run.successor(blue).with_role(color))
            .collect();
        let green = run.start_all(specs).await?;
        log_phase(
            run.service(),
            Phase::Transition,
            format!("{} {} replicas started", green.len(), color),
        );
        run.verify(&green).await?;

        run.switched = true;
        self.restart_dependents(run).await;
        log_phase(run.service(), Phase::Switch, format!("traffic on {}", color));

        run.pause(run.config().verification_period).await?;
        self.observe(run, &green).await
    }

    async fn finalize(&self, run: &mut Run<'_>) -> Result<()> {
        let blue = run.targets.clone();
        run.stop_all(&blue).await?;
        log_phase(
            run.service(),
            Phase::Finalize,
            format!("{} old replicas decommissioned", blue.len()),
        );
        self.promote(run).await
    }
}

impl_update_strategy!(BlueGreenStrategy);
