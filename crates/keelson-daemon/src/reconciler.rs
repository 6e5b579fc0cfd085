//! Reconcile loop
//!
//! One tick reads the compose file, asks the registries for newer tags,
//! rolls out every service whose policy selects a different tag (dependencies
//! first) and finally rewrites the compose file for the services that made it.

use crate::config::DaemonConfig;
use crate::error::DaemonResult;
use keelson_compose::{rewrite_file, ComposeFile, DependencyGraph};
use keelson_deployment::{create_strategy, RollbackStatus, UpdateRequest, UpdateResult};
use keelson_engine::Engine;
use keelson_metrics::DeploymentRecorder;
use keelson_policy::select_tag;
use keelson_registry::TagLister;
use keelson_types::{DeploymentId, ImageRef, UpdateDecision};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Summary of one tick
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Decisions found this tick, in update order
    pub decisions: Vec<UpdateDecision>,

    /// Services moved to their selected tag
    pub updated: Vec<String>,

    /// Services whose strategy failed
    pub failed: Vec<String>,

    /// Services left out before any strategy ran (listing or policy errors)
    pub skipped: Vec<String>,

    /// Services whose `image:` line was rewritten
    pub rewritten: Vec<String>,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        self.decisions.is_empty()
    }
}

/// Periodic driver tying registry, policy, strategies and compose file together
pub struct Reconciler {
    config: Arc<DaemonConfig>,
    engine: Arc<dyn Engine>,
    registry: Arc<dyn TagLister>,
    recorder: Arc<dyn DeploymentRecorder>,
}

impl Reconciler {
    pub fn new(
        config: Arc<DaemonConfig>,
        engine: Arc<dyn Engine>,
        registry: Arc<dyn TagLister>,
        recorder: Arc<dyn DeploymentRecorder>,
    ) -> Self {
        Self {
            config,
            engine,
            registry,
            recorder,
        }
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    /// Run ticks every `checkInterval` until `shutdown` flips to true.
    ///
    /// A tick that overruns its interval makes the loop skip the missed
    /// ticks rather than queue them. Shutdown is observed between ticks.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            compose_file = %self.config.compose_file.display(),
            interval = ?self.config.check_interval,
            engine = self.engine.name(),
            registry = self.registry.name(),
            "Reconciler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "Reconciliation failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Reconciler stopped");
    }

    /// One reconcile pass
    pub async fn tick(&self) -> DaemonResult<TickReport> {
        let path = self.config.compose_file.as_path();
        let compose = ComposeFile::load(path)?;
        let graph = DependencyGraph::from_compose(&compose);
        graph.validate()?;

        let mut report = TickReport::default();
        let mut planned: BTreeMap<String, UpdateDecision> = BTreeMap::new();
        for (service, image) in compose.images() {
            match self.plan(service, image).await {
                Ok(Some(decision)) => {
                    planned.insert(service.to_string(), decision);
                }
                Ok(None) => {}
                Err(reason) => {
                    warn!(service, reason = %reason, "[{}] Check: skipped", service);
                    report.skipped.push(service.to_string());
                }
            }
        }

        if planned.is_empty() {
            debug!("No updates this tick");
            return Ok(report);
        }

        let selected: Vec<&str> = planned.keys().map(String::as_str).collect();
        let order = graph.update_order(&selected)?;

        let mut images = BTreeMap::new();
        for service in order {
            let Some(decision) = planned.remove(&service) else {
                continue;
            };
            let declared = compose
                .service(&service)
                .map(|def| def.declared_replicas())
                .unwrap_or(1);
            let request = UpdateRequest::from_decision(&decision)
                .with_declared(declared)
                .with_dependents(graph.dependents(&service));

            if self.deploy(&decision, &request).await {
                images.insert(service.clone(), request.target_image.clone());
                report.updated.push(service);
            } else {
                report.failed.push(service);
            }
            report.decisions.push(decision);
        }

        if !images.is_empty() {
            let outcome = rewrite_file(path, &images)?;
            for service in &outcome.missing {
                warn!(service = %service, "No image line to rewrite");
            }
            report.rewritten = outcome.rewritten;

            if self.config.prune_images {
                if let Err(e) = self.engine.prune_images().await {
                    warn!(error = %e, "Image prune failed");
                }
            }
        }

        info!(
            updated = report.updated.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "Tick complete"
        );
        Ok(report)
    }

    /// Find the tag a service should run; `Ok(None)` when it already does
    async fn plan(&self, service: &str, image: &str) -> Result<Option<UpdateDecision>, String> {
        let reference = ImageRef::parse_with(image, &self.config.harbor_hosts())
            .map_err(|e| e.to_string())?;
        if reference.is_digest_pinned() {
            debug!(service, image, "Digest-pinned image, not checking for updates");
            return Ok(None);
        }

        let tags = self
            .registry
            .list_tags(&reference)
            .await
            .map_err(|e| e.to_string())?;
        let policy = self.config.policy_for(service, &reference);
        let selection = select_tag(&tags, policy).map_err(|e| e.to_string())?;

        let Some(selection) = selection else {
            debug!(service, image, "No tag satisfies the policy");
            return Ok(None);
        };
        let decision = UpdateDecision::new(service, reference, selection.tag, selection.source);
        if let Some(decision) = &decision {
            info!(
                service,
                from = %decision.current_tag,
                to = %decision.selected_tag,
                source = %decision.source,
                "[{}] Check: {} -> {}",
                service,
                decision.current_tag,
                decision.selected_tag
            );
        }
        Ok(decision)
    }

    /// Execute one update with history recording; true on success
    async fn deploy(&self, decision: &UpdateDecision, request: &UpdateRequest) -> bool {
        let service = decision.service.as_str();
        let strategy = match create_strategy(self.config.strategy_for(service), self.engine.clone())
        {
            Ok(strategy) => strategy,
            Err(e) => {
                error!(service, error = %e, "[{}] Strategy: invalid configuration", service);
                return false;
            }
        };

        let id = match self.recorder.record_start(decision, strategy.kind()).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(service, error = %e, "Could not record deployment start");
                None
            }
        };

        let result = strategy.execute(request).await;
        if let Some(id) = &id {
            self.record_outcome(id, &result).await;
        }

        if let Some(e) = &result.error {
            error!(
                service,
                error = %e,
                rollback = %result.rollback,
                "[{}] Update: failed",
                service
            );
            false
        } else {
            info!(
                service,
                image = %result.to_image,
                elapsed = ?result.elapsed,
                "[{}] Update: done",
                service
            );
            true
        }
    }

    async fn record_outcome(&self, id: &DeploymentId, result: &UpdateResult) {
        let recorded = match &result.error {
            None => self.recorder.record_success(id).await,
            Some(e) => self.recorder.record_failure(id, &e.to_string()).await,
        };
        if let Err(e) = recorded {
            warn!(service = %result.service, error = %e, "Could not record deployment outcome");
        }

        let rollback = match &result.rollback {
            RollbackStatus::RolledBack => Some(true),
            RollbackStatus::RollbackFailed(_) => Some(false),
            RollbackStatus::NotAttempted | RollbackStatus::NotAutomatic => None,
        };
        if let Some(succeeded) = rollback {
            if let Err(e) = self.recorder.record_rollback(id, succeeded).await {
                warn!(service = %result.service, error = %e, "Could not record rollback");
            }
        }
    }
}
