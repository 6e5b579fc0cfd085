//! Keelson - keeps a Docker Compose deployment on the image tags its
//! policies select.

use clap::{Args, Parser, Subcommand};
use keelson_daemon::{DaemonConfig, DaemonResult, Reconciler};
use keelson_engine::DockerCliEngine;
use keelson_metrics::{DeploymentRecorder, InMemoryRecorder, JsonLinesRecorder};
use keelson_registry::RegistryClients;
use keelson_types::duration::parse_duration;
use keelson_types::{HealthCheckKind, StrategyKind};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "keelson")]
#[command(about = "Image policy driven Docker Compose reconciler", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Watch registries and roll out new tags
    Sync(SyncArgs),
}

#[derive(Args)]
struct SyncArgs {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(long, env = "KEELSON_CONFIG")]
    config: Option<PathBuf>,

    /// Compose file to reconcile
    #[arg(short = 'f', long = "file", env = "KEELSON_COMPOSE_FILE")]
    file: Option<PathBuf>,

    /// Time between checks (e.g. 30s, 5m)
    #[arg(short = 'i', long, env = "KEELSON_CHECK_INTERVAL", value_parser = parse_duration)]
    interval: Option<Duration>,

    /// Debug logging
    #[arg(long)]
    verbose: bool,

    /// Use the configured strategy instead of all-at-once
    #[arg(long, env = "KEELSON_ROLLING_UPDATE")]
    rolling_update: bool,

    /// one-at-a-time, all-at-once, blue-green or canary
    #[arg(long)]
    strategy: Option<StrategyKind>,

    /// docker, http, tcp or command
    #[arg(long, env = "KEELSON_HEALTH_CHECK")]
    health_check: Option<HealthCheckKind>,

    /// URL path, port or command the health check uses
    #[arg(long, env = "KEELSON_HEALTH_ENDPOINT")]
    health_endpoint: Option<String>,

    /// Pause between replicas or canary steps
    #[arg(long, value_parser = parse_duration)]
    delay: Option<Duration>,

    /// Restore the previous replicas when an update fails
    #[arg(long, env = "KEELSON_ROLLBACK_ON_FAILURE")]
    rollback_on_failure: bool,

    /// Emit logs as JSON
    #[arg(long, env = "KEELSON_LOG_JSON")]
    log_json: bool,

    /// Run a single reconcile pass and exit
    #[arg(long)]
    once: bool,
}

impl SyncArgs {
    fn apply(&self, config: &mut DaemonConfig) {
        if let Some(file) = &self.file {
            config.compose_file = file.clone();
        }
        if let Some(interval) = self.interval {
            config.check_interval = interval;
        }
        config.verbose |= self.verbose;

        let rolling = &mut config.rolling_update;
        rolling.enabled |= self.rolling_update;
        if let Some(strategy) = self.strategy {
            rolling.strategy = strategy;
        }
        if let Some(kind) = self.health_check {
            rolling.health_check = kind;
        }
        if let Some(endpoint) = &self.health_endpoint {
            rolling.health_endpoint = Some(endpoint.clone());
        }
        if let Some(delay) = self.delay {
            rolling.delay = delay;
        }
        rolling.rollback_on_failure |= self.rollback_on_failure;
    }
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();
    let Command::Sync(args) = cli.command;

    let mut config = DaemonConfig::load(args.config.as_deref())?;
    args.apply(&mut config);

    // Initialize tracing
    let level = if config.verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if args.log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    config.validate()?;
    let config = Arc::new(config);

    let engine = Arc::new(DockerCliEngine::new(config.project_name()));
    let registry = Arc::new(RegistryClients::new(config.credentials()));
    let recorder: Arc<dyn DeploymentRecorder> = match &config.metrics_file {
        Some(path) => Arc::new(JsonLinesRecorder::new(path.clone()).await?),
        None => Arc::new(InMemoryRecorder::new()),
    };

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        project = %config.project_name(),
        strategy = %config.rolling_update.kind(),
        "Keelson starting"
    );

    let reconciler = Reconciler::new(config, engine, registry, recorder);

    if args.once {
        reconciler.tick().await?;
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    reconciler.run(shutdown_rx).await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, stopping after the current tick");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, stopping after the current tick");
        }
    }
}
