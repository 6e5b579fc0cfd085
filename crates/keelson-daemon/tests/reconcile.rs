//! Whole reconcile ticks against in-memory collaborators.

use keelson_compose::ComposeError;
use keelson_daemon::{DaemonConfig, DaemonError, Reconciler};
use keelson_engine::{EngineEvent, InMemoryEngine};
use keelson_metrics::{DeploymentOutcome, DeploymentRecorder, InMemoryRecorder};
use keelson_registry::StaticTagLister;
use keelson_types::{
    HealthState, ImagePolicy, RegistryKind, RegistrySettings, ReplicaRole, StrategyKind,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

const COMPOSE: &str = r#"services:
  web:
    image: nginx:1.25   # front
    depends_on:
      - api
    deploy:
      replicas: 2
  api:
    image: ghcr.io/org/api:v1.2.3
  db:
    image: postgres:16
  cache:
    image: redis@sha256:4b1d0c
"#;

struct Fixture {
    dir: TempDir,
    engine: Arc<InMemoryEngine>,
    lister: Arc<StaticTagLister>,
    recorder: Arc<InMemoryRecorder>,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("docker-compose.yml"), COMPOSE).unwrap();

        let engine = Arc::new(InMemoryEngine::new());
        engine.seed("web", 2, "nginx:1.25");
        engine.seed("api", 1, "ghcr.io/org/api:v1.2.3");
        engine.seed("db", 1, "postgres:16");
        engine.seed("cache", 1, "redis@sha256:4b1d0c");

        let lister = StaticTagLister::new()
            .with_tags("nginx", ["1.24", "1.25", "1.27"])
            .with_tags("ghcr.io/org/api", ["v1.2.3", "v1.3.0", "latest"]);
        lister.deny("postgres");

        Self {
            dir,
            engine,
            lister: Arc::new(lister),
            recorder: Arc::new(InMemoryRecorder::new()),
        }
    }

    fn compose_path(&self) -> PathBuf {
        self.dir.path().join("docker-compose.yml")
    }

    fn config(&self) -> DaemonConfig {
        let mut config = DaemonConfig {
            compose_file: self.compose_path(),
            ..DaemonConfig::default()
        };
        for kind in [RegistryKind::DockerHub, RegistryKind::Ghcr] {
            config.registry.insert(
                kind,
                RegistrySettings {
                    credentials: None,
                    image_policy: Some(ImagePolicy::semver(None)),
                },
            );
        }
        config
    }

    fn reconciler(&self, config: DaemonConfig) -> Reconciler {
        Reconciler::new(
            Arc::new(config),
            self.engine.clone(),
            self.lister.clone(),
            self.recorder.clone(),
        )
    }
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

fn images(engine: &InMemoryEngine, service: &str) -> Vec<String> {
    engine
        .snapshot(service)
        .into_iter()
        .map(|(_, image, _)| image)
        .collect()
}

#[tokio::test(start_paused = true)]
async fn tick_updates_in_dependency_order_and_rewrites_compose() {
    let fixture = Fixture::new();
    let reconciler = fixture.reconciler(fixture.config());

    let report = reconciler.tick().await.unwrap();

    let order: Vec<&str> = report.decisions.iter().map(|d| d.service.as_str()).collect();
    assert_eq!(order, vec!["api", "web"]);
    assert_eq!(report.updated, vec!["api", "web"]);
    assert!(report.failed.is_empty());
    assert_eq!(report.skipped, vec!["db"]);
    assert_eq!(report.rewritten.len(), 2);

    // postgres is denied, the digest-pinned cache is never asked about
    assert_eq!(fixture.lister.calls(), 3);

    // api's replica starts before any web replica
    let first_start = fixture.engine.events().into_iter().find_map(|e| match e {
        EngineEvent::Started { service, .. } => Some(service),
        _ => None,
    });
    assert_eq!(first_start.as_deref(), Some("api"));

    assert_eq!(images(&fixture.engine, "web"), vec!["nginx:1.27", "nginx:1.27"]);
    assert_eq!(images(&fixture.engine, "api"), vec!["ghcr.io/org/api:v1.3.0"]);
    assert_eq!(images(&fixture.engine, "db"), vec!["postgres:16"]);

    let expected = COMPOSE
        .replace("nginx:1.25", "nginx:1.27")
        .replace("api:v1.2.3", "api:v1.3.0");
    assert_eq!(read(&fixture.compose_path()), expected);
    assert_eq!(
        read(&fixture.dir.path().join("docker-compose.backup.yml")),
        COMPOSE
    );

    let records = fixture.recorder.records();
    assert_eq!(records.len(), 2);
    assert!(records
        .iter()
        .all(|r| r.outcome == DeploymentOutcome::Succeeded && r.strategy == StrategyKind::AllAtOnce));
}

#[tokio::test(start_paused = true)]
async fn second_tick_is_a_no_op() {
    let fixture = Fixture::new();
    let reconciler = fixture.reconciler(fixture.config());

    reconciler.tick().await.unwrap();
    let after_first = read(&fixture.compose_path());
    let events = fixture.engine.events().len();

    let report = reconciler.tick().await.unwrap();
    assert!(report.is_idle());
    assert!(report.rewritten.is_empty());
    assert_eq!(read(&fixture.compose_path()), after_first);
    assert_eq!(fixture.engine.events().len(), events);
    assert_eq!(fixture.recorder.records().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_service_rolls_back_and_keeps_its_image_line() {
    let fixture = Fixture::new();
    fixture
        .engine
        .script_replica_health("nginx:1.27", 2, vec![HealthState::Unhealthy]);

    let mut config = fixture.config();
    config.rolling_update.enabled = true;
    config.rolling_update.strategy = StrategyKind::OneAtATime;
    config.rolling_update.rollback_on_failure = true;
    config.rolling_update.timeout = Duration::from_secs(120);
    let reconciler = fixture.reconciler(config);

    let report = reconciler.tick().await.unwrap();
    assert_eq!(report.updated, vec!["api"]);
    assert_eq!(report.failed, vec!["web"]);

    assert_eq!(
        fixture.engine.snapshot("web"),
        vec![
            (1, "nginx:1.25".to_string(), ReplicaRole::Stable),
            (2, "nginx:1.25".to_string(), ReplicaRole::Stable),
        ]
    );

    let compose = read(&fixture.compose_path());
    assert!(compose.contains("image: nginx:1.25   # front"));
    assert!(compose.contains("image: ghcr.io/org/api:v1.3.0"));

    let history = fixture.recorder.history("web").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].outcome, DeploymentOutcome::RolledBack);
    assert!(history[0].error.is_some());
}

#[tokio::test(start_paused = true)]
async fn service_override_policy_wins() {
    let fixture = Fixture::new();
    let mut config = fixture.config();
    config.services.insert(
        "web".to_string(),
        keelson_daemon::ServiceOverride {
            image_policy: Some(ImagePolicy::semver(Some("<1.26"))),
            rolling_update: None,
        },
    );
    let reconciler = fixture.reconciler(config);

    let report = reconciler.tick().await.unwrap();
    // 1.25 is already the greatest tag below 1.26
    assert_eq!(report.updated, vec!["api"]);
    assert_eq!(images(&fixture.engine, "web"), vec!["nginx:1.25", "nginx:1.25"]);
}

#[tokio::test(start_paused = true)]
async fn prune_runs_only_after_an_update() {
    let fixture = Fixture::new();
    let mut config = fixture.config();
    config.prune_images = true;
    let reconciler = fixture.reconciler(config);

    let pruned = |engine: &InMemoryEngine| {
        engine
            .events()
            .iter()
            .filter(|e| matches!(e, EngineEvent::Pruned))
            .count()
    };

    reconciler.tick().await.unwrap();
    assert_eq!(pruned(&fixture.engine), 1);

    reconciler.tick().await.unwrap();
    assert_eq!(pruned(&fixture.engine), 1);
}

#[tokio::test]
async fn circular_dependencies_abort_the_tick() {
    let fixture = Fixture::new();
    std::fs::write(
        fixture.compose_path(),
        "services:\n  a:\n    image: a:1\n    depends_on: [b]\n  b:\n    image: b:1\n    depends_on: [a]\n",
    )
    .unwrap();
    let reconciler = fixture.reconciler(fixture.config());

    let err = reconciler.tick().await.unwrap_err();
    assert!(matches!(
        err,
        DaemonError::Compose(ComposeError::CircularDependency { .. })
    ));
    assert_eq!(fixture.lister.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn run_survives_failed_ticks_and_stops_on_shutdown() {
    let fixture = Fixture::new();
    let mut config = fixture.config();
    config.compose_file = fixture.dir.path().join("missing.yml");
    config.check_interval = Duration::from_secs(10);
    let reconciler = Arc::new(fixture.reconciler(config));

    let (tx, rx) = watch::channel(false);
    let handle = {
        let reconciler = reconciler.clone();
        tokio::spawn(async move { reconciler.run(rx).await })
    };

    tokio::time::sleep(Duration::from_secs(35)).await;
    assert!(!handle.is_finished());

    tx.send(true).unwrap();
    handle.await.unwrap();
}
