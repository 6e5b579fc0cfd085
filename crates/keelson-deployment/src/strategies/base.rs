//! Shared strategy state machine
//!
//! Every strategy runs the same sequence:
//!
//! ```text
//! Prepare -> ApplyPre -> Transition -> ApplyPost -> Finalize -> Done
//!                  \________________________________/
//!                          Fail -> Rollback -> Failed
//! ```
//!
//! Only Transition (which includes VerifyHealth) and Finalize differ per
//! strategy; they are supplied through [`Transition`]. The whole run is bound
//! by the strategy timeout.

use crate::detector::ReplicaDetector;
use crate::error::{Result, StrategyError};
use crate::journal::{JournalEntry, ReplicaSnapshot, RollbackJournal};
use crate::phase::{log_phase, warn_phase, Phase};
use crate::result::{RollbackStatus, UpdateRequest, UpdateResult};
use async_trait::async_trait;
use futures::future::join_all;
use keelson_engine::{Engine, EngineError};
use keelson_health::{wait_for_all, Deadline, HealthChecker, HealthOutcome, WaitPolicy};
use keelson_types::{Replica, ReplicaSpec, StrategyConfig, StrategyKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Configuration, engine access and journal shared by every strategy
pub struct StrategyBase {
    config: StrategyConfig,
    engine: Arc<dyn Engine>,
    checker: HealthChecker,
    detector: ReplicaDetector,
    journal: RollbackJournal,
}

impl StrategyBase {
    /// Normalize and validate `config`, then build its health checker
    pub fn new(config: StrategyConfig, engine: Arc<dyn Engine>) -> Result<Self> {
        let config = config.normalized()?;
        let checker = HealthChecker::from_spec(&config.health_check, engine.clone())?;
        Ok(Self {
            config,
            detector: ReplicaDetector::new(engine.clone()),
            engine,
            checker,
            journal: RollbackJournal::new(),
        })
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub fn checker(&self) -> &HealthChecker {
        &self.checker
    }

    pub fn journal(&self) -> &RollbackJournal {
        &self.journal
    }

    /// Replace the configuration; the kind must not change
    pub fn configure(&mut self, config: StrategyConfig) -> Result<()> {
        if config.kind != self.config.kind {
            return Err(StrategyError::InvalidConfig(format!(
                "cannot reconfigure a {} strategy as {}",
                self.config.kind, config.kind
            )));
        }
        let config = config.normalized()?;
        self.checker = HealthChecker::from_spec(&config.health_check, self.engine.clone())?;
        self.config = config;
        Ok(())
    }

    /// Undo a service's journaled operations, newest first.
    ///
    /// Every entry is attempted; the first failures are reported together.
    pub async fn rollback(&self, service: &str) -> Result<()> {
        let entries = self.journal.take(service);
        if entries.is_empty() {
            log_phase(service, Phase::Rollback, "nothing to undo");
            return Ok(());
        }
        log_phase(service, Phase::Rollback, format!("undoing {} operations", entries.len()));

        let undo = async {
            let mut failures = Vec::new();
            for entry in entries.iter().rev() {
                if let Err(e) = self.undo(service, entry).await {
                    failures.push(e.to_string());
                }
            }
            failures
        };

        let failures = match tokio::time::timeout(self.config.timeout, undo).await {
            Ok(failures) => failures,
            Err(_) => vec![format!("timed out after {:?}", self.config.timeout)],
        };

        if failures.is_empty() {
            log_phase(service, Phase::Rollback, "restored");
            Ok(())
        } else {
            let reason = failures.join("; ");
            warn_phase(service, Phase::Failed, &reason);
            Err(StrategyError::RollbackFailed {
                service: service.to_string(),
                reason,
            })
        }
    }

    async fn undo(&self, service: &str, entry: &JournalEntry) -> std::result::Result<(), EngineError> {
        let live = self.engine.list_replicas(service).await?;
        match entry {
            JournalEntry::Started(snapshot) => {
                if let Some(replica) = live.iter().find(|r| snapshot.matches(r)) {
                    debug!(replica = %replica.label(), "rollback: stopping new replica");
                    self.engine.stop_replica(&replica.id).await?;
                }
            }
            JournalEntry::Stopped(snapshot) => {
                if live.iter().any(|r| snapshot.matches(r)) {
                    return Ok(());
                }
                if let Some(occupant) = live.iter().find(|r| snapshot.same_slot(r)) {
                    self.engine.stop_replica(&occupant.id).await?;
                }
                debug!(ordinal = snapshot.ordinal, image = %snapshot.image, "rollback: restarting old replica");
                self.engine.start_replica(&snapshot.spec(service)).await?;
            }
        }
        Ok(())
    }
}

/// Strategy-specific steps of the state machine
#[async_trait]
pub(crate) trait Transition: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Move from the target set to new replicas and verify them
    async fn transition(&self, run: &mut Run<'_>) -> Result<()>;

    /// Retire whatever the transition left behind
    async fn finalize(&self, _run: &mut Run<'_>) -> Result<()> {
        Ok(())
    }
}

/// State of one Execute
pub(crate) struct Run<'a> {
    pub base: &'a StrategyBase,
    pub request: &'a UpdateRequest,
    pub deadline: Deadline,

    /// Replicas being replaced, in ordinal order
    pub targets: Vec<Replica>,

    /// Live replicas outside the target set
    pub others: Vec<Replica>,

    /// New replicas started so far
    pub activated: Vec<Replica>,

    /// Past the point where rollback stops being automatic
    pub switched: bool,
}

impl<'a> Run<'a> {
    fn new(base: &'a StrategyBase, request: &'a UpdateRequest, deadline: Deadline) -> Self {
        Self {
            base,
            request,
            deadline,
            targets: Vec::new(),
            others: Vec::new(),
            activated: Vec::new(),
            switched: false,
        }
    }

    pub fn service(&self) -> &str {
        &self.request.service
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.base.config
    }

    pub fn engine(&self) -> &dyn Engine {
        self.base.engine.as_ref()
    }

    pub fn cancelled(&self) -> StrategyError {
        StrategyError::Cancelled {
            service: self.request.service.clone(),
            timeout: self.base.config.timeout,
        }
    }

    /// Spec for a replica of the new image in `old`'s slot
    pub fn successor(&self, old: &Replica) -> ReplicaSpec {
        ReplicaSpec::new(&self.request.service, old.ordinal, &self.request.target_image)
            .with_role(old.role)
    }

    async fn prepare(&mut self) -> Result<()> {
        let set = self
            .base
            .detector
            .detect(&self.request.service, self.request.declared_replicas)
            .await?;
        let (targets, others) = set.partition(&self.request.current_image);
        if targets.is_empty() {
            warn_phase(self.service(), Phase::Prepare, "no replicas");
            return Err(StrategyError::NoReplicas {
                service: self.request.service.clone(),
            });
        }

        self.targets = targets;
        self.others = others;
        log_phase(
            self.service(),
            Phase::Prepare,
            format!("{} replicas to update", self.targets.len()),
        );
        Ok(())
    }

    async fn apply_pre(&self) -> Result<()> {
        let Some(command) = self.base.config.pre_update_command.as_deref() else {
            return Ok(());
        };
        for replica in &self.targets {
            let failed = |reason: String| StrategyError::PreCommandFailed {
                replica: replica.label(),
                command: command.to_string(),
                reason,
            };
            match self.engine().exec(&replica.id, command).await {
                Ok(0) => {}
                Ok(code) => return Err(failed(format!("exit status {}", code))),
                Err(e) => return Err(failed(e.to_string())),
            }
        }
        log_phase(self.service(), Phase::ApplyPre, "ok");
        Ok(())
    }

    async fn apply_post(&self) {
        let Some(command) = self.base.config.post_update_command.as_deref() else {
            return;
        };
        let mut failed = 0;
        for replica in &self.activated {
            let reason = match self.engine().exec(&replica.id, command).await {
                Ok(0) => continue,
                Ok(code) => format!("exit status {}", code),
                Err(e) => e.to_string(),
            };
            failed += 1;
            let err = StrategyError::PostCommandFailed {
                replica: replica.label(),
                command: command.to_string(),
                reason,
            };
            warn_phase(self.service(), Phase::ApplyPost, err);
        }
        if failed == 0 {
            log_phase(self.service(), Phase::ApplyPost, "ok");
        }
    }

    /// Stop one replica, journaling it first
    pub async fn stop(&mut self, replica: &Replica) -> Result<()> {
        self.base.journal.record(
            &self.request.service,
            JournalEntry::Stopped(ReplicaSnapshot::of(replica)),
        );
        self.engine().stop_replica(&replica.id).await?;
        Ok(())
    }

    /// Start one new replica, journaling it first
    pub async fn start(&mut self, spec: ReplicaSpec) -> Result<Replica> {
        self.base.journal.record(
            &self.request.service,
            JournalEntry::Started(ReplicaSnapshot::of_spec(&spec)),
        );
        let replica = self.engine().start_replica(&spec).await?;
        self.activated.push(replica.clone());
        Ok(replica)
    }

    /// Stop-then-start `old` on the new image
    pub async fn replace(&mut self, old: &Replica) -> Result<Replica> {
        let spec = self.successor(old);
        self.stop(old).await?;
        let new = self.start(spec).await?;
        log_phase(
            self.service(),
            Phase::Transition,
            format!("{} replaced", new.label()),
        );
        Ok(new)
    }

    /// Stop replicas concurrently
    pub async fn stop_all(&mut self, replicas: &[Replica]) -> Result<()> {
        for replica in replicas {
            self.base.journal.record(
                &self.request.service,
                JournalEntry::Stopped(ReplicaSnapshot::of(replica)),
            );
        }
        let engine = self.engine();
        let results = join_all(replicas.iter().map(|r| engine.stop_replica(&r.id))).await;
        results.into_iter().collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(())
    }

    /// Start replicas concurrently; successes are kept even if one fails
    pub async fn start_all(&mut self, specs: Vec<ReplicaSpec>) -> Result<Vec<Replica>> {
        for spec in &specs {
            self.base.journal.record(
                &self.request.service,
                JournalEntry::Started(ReplicaSnapshot::of_spec(spec)),
            );
        }
        let engine = self.base.engine.as_ref();
        let results = join_all(specs.iter().map(|spec| engine.start_replica(spec))).await;

        let mut started = Vec::new();
        let mut first_error = None;
        for result in results {
            match result {
                Ok(replica) => started.push(replica),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        self.activated.extend(started.iter().cloned());
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(started),
        }
    }

    /// Wait until every replica is healthy; the first failure wins
    pub async fn verify(&self, replicas: &[Replica]) -> Result<()> {
        let policy = WaitPolicy::from(&self.base.config.health_check);
        let outcomes = wait_for_all(&self.base.checker, replicas, self.deadline, policy).await;

        for (replica, (_, outcome)) in replicas.iter().zip(outcomes) {
            let error = match outcome {
                HealthOutcome::Healthy => continue,
                HealthOutcome::Unhealthy => StrategyError::HealthUnhealthy {
                    replica: replica.label(),
                },
                HealthOutcome::Timeout => StrategyError::HealthTimeout {
                    replica: replica.label(),
                },
            };
            warn_phase(self.service(), Phase::VerifyHealth, &error);
            return Err(error);
        }

        log_phase(
            self.service(),
            Phase::VerifyHealth,
            format!("{} healthy", replicas.len()),
        );
        Ok(())
    }

    /// Sleep, unless the deadline comes first
    pub async fn pause(&self, period: Duration) -> Result<()> {
        if period.is_zero() {
            return Ok(());
        }
        if self.deadline.pause(period).await {
            Ok(())
        } else {
            Err(self.cancelled())
        }
    }
}

async fn run_steps<T: Transition + ?Sized>(strategy: &T, run: &mut Run<'_>) -> Result<()> {
    run.prepare().await?;
    run.apply_pre().await?;
    strategy.transition(run).await?;
    run.apply_post().await;
    strategy.finalize(run).await?;
    log_phase(run.service(), Phase::Finalize, "ok");
    Ok(())
}

/// Execute `strategy` for `request`, rolling back on failure when configured
pub(crate) async fn drive<T: Transition + ?Sized>(
    strategy: &T,
    base: &StrategyBase,
    request: &UpdateRequest,
) -> UpdateResult {
    let started_at = Instant::now();
    let service = request.service.as_str();
    let deadline = Deadline::after(base.config.timeout);
    base.journal.begin(service);

    let mut run = Run::new(base, request, deadline);
    let outcome = deadline.run(run_steps(strategy, &mut run)).await;
    let outcome = outcome.unwrap_or_else(|| Err(run.cancelled()));

    let (error, rollback) = match outcome {
        Ok(()) => {
            base.journal.commit(service);
            log_phase(
                service,
                Phase::Done,
                format!("{} -> {}", request.current_image, request.target_image),
            );
            (None, RollbackStatus::NotAttempted)
        }
        Err(error) => {
            warn_phase(service, Phase::Fail, &error);
            let rollback = if run.switched {
                warn_phase(service, Phase::Rollback, "not automatic after switch");
                RollbackStatus::NotAutomatic
            } else if base.config.rollback_on_failure {
                match base.rollback(service).await {
                    Ok(()) => RollbackStatus::RolledBack,
                    Err(e) => RollbackStatus::RollbackFailed(e.to_string()),
                }
            } else {
                warn_phase(service, Phase::Failed, "rollback disabled, leaving replicas as they are");
                RollbackStatus::NotAttempted
            };
            (Some(error), rollback)
        }
    };

    UpdateResult {
        service: request.service.clone(),
        strategy: strategy.kind(),
        from_image: request.current_image.clone(),
        to_image: request.target_image.clone(),
        started: run.activated.len(),
        error,
        rollback,
        elapsed: started_at.elapsed(),
    }
}
