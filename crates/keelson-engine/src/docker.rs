//! Docker CLI engine
//!
//! Drives the local `docker` binary. Replicas are the containers carrying
//! the compose project and service labels; the ordinal is the compose
//! container number and green replicas carry `keelson.role=green`.
//!
//! New replicas are created with `docker run`, copying environment, bind
//! mounts, network, restart policy and compose labels from a container of
//! the same service seen by an earlier [`Engine::list_replicas`]. Published
//! ports are only copied for stable replicas, since a parallel set would
//! collide with the ports of the set it replaces.

use crate::engine::Engine;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use keelson_types::{HealthState, Replica, ReplicaId, ReplicaRole, ReplicaSpec};
use serde::Deserialize;
use std::collections::BTreeMap;
use tokio::process::Command;
use tracing::{debug, info, instrument};

pub const PROJECT_LABEL: &str = "com.docker.compose.project";
pub const SERVICE_LABEL: &str = "com.docker.compose.service";
pub const NUMBER_LABEL: &str = "com.docker.compose.container-number";
pub const ROLE_LABEL: &str = "keelson.role";

/// Compose labels copied from the template onto new replicas
const COPIED_LABELS: [&str; 3] = [
    "com.docker.compose.project.working_dir",
    "com.docker.compose.project.config_files",
    "com.docker.compose.version",
];

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerInfo {
    id: String,
    #[serde(default)]
    state: ContainerState,
    #[serde(default)]
    config: ContainerConfig,
    #[serde(default)]
    host_config: HostConfig,
    #[serde(default)]
    network_settings: NetworkSettings,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerState {
    #[serde(default)]
    running: bool,
    #[serde(default)]
    health: Option<ContainerHealth>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerHealth {
    #[serde(default)]
    status: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerConfig {
    #[serde(default)]
    image: String,
    #[serde(default)]
    env: Option<Vec<String>>,
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HostConfig {
    #[serde(default)]
    binds: Option<Vec<String>>,
    #[serde(default)]
    port_bindings: Option<BTreeMap<String, Option<Vec<PortBinding>>>>,
    #[serde(default)]
    restart_policy: Option<RestartPolicy>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PortBinding {
    #[serde(default)]
    host_ip: String,
    #[serde(default)]
    host_port: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RestartPolicy {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NetworkSettings {
    #[serde(default)]
    networks: Option<BTreeMap<String, NetworkEndpoint>>,
}

#[derive(Debug, Default, Deserialize)]
struct NetworkEndpoint {
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
}

impl ContainerInfo {
    fn label(&self, key: &str) -> Option<&str> {
        self.config
            .labels
            .as_ref()
            .and_then(|labels| labels.get(key))
            .map(String::as_str)
    }

    fn role(&self) -> ReplicaRole {
        match self.label(ROLE_LABEL) {
            Some("green") => ReplicaRole::Green,
            Some("canary") => ReplicaRole::Canary,
            _ => ReplicaRole::Stable,
        }
    }

    fn health(&self) -> HealthState {
        if !self.state.running {
            return HealthState::Unhealthy;
        }
        HealthState::from_engine(self.state.health.as_ref().map(|h| h.status.as_str()))
    }

    fn address(&self) -> Option<String> {
        self.network_settings
            .networks
            .as_ref()
            .and_then(|networks| networks.values().find(|n| !n.ip_address.is_empty()))
            .map(|n| n.ip_address.clone())
    }

    fn to_replica(&self, service: &str) -> Result<Replica> {
        let ordinal = self
            .label(NUMBER_LABEL)
            .and_then(|n| n.parse::<u32>().ok())
            .ok_or_else(|| {
                EngineError::Output(format!("container {} has no container number", self.id))
            })?;
        Ok(Replica {
            id: ReplicaId::new(self.id.clone()),
            service: service.to_string(),
            ordinal,
            image: self.config.image.clone(),
            health: self.health(),
            role: self.role(),
            address: self.address(),
        })
    }
}

/// Settings copied from an existing container when starting a new one
#[derive(Debug, Clone, Default)]
struct RunTemplate {
    env: Vec<String>,
    binds: Vec<String>,
    network: Option<String>,
    ports: Vec<(String, PortBinding)>,
    restart: Option<String>,
    labels: BTreeMap<String, String>,
}

impl RunTemplate {
    fn from_container(info: &ContainerInfo) -> Self {
        let ports = info
            .host_config
            .port_bindings
            .iter()
            .flatten()
            .flat_map(|(port, bindings)| {
                bindings
                    .iter()
                    .flatten()
                    .map(move |b| (port.clone(), b.clone()))
            })
            .collect();
        let labels = COPIED_LABELS
            .iter()
            .filter_map(|key| info.label(key).map(|v| (key.to_string(), v.to_string())))
            .collect();
        Self {
            env: info.config.env.clone().unwrap_or_default(),
            binds: info.host_config.binds.clone().unwrap_or_default(),
            network: info
                .network_settings
                .networks
                .as_ref()
                .and_then(|n| n.keys().next().cloned()),
            ports,
            restart: info
                .host_config
                .restart_policy
                .as_ref()
                .map(|p| p.name.clone())
                .filter(|name| !name.is_empty() && name != "no"),
            labels,
        }
    }
}

/// Engine backed by the `docker` command line
pub struct DockerCliEngine {
    binary: String,
    project: String,
    templates: DashMap<String, RunTemplate>,
}

impl DockerCliEngine {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            binary: "docker".to_string(),
            project: project.into(),
            templates: DashMap::new(),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    fn container_name(&self, spec: &ReplicaSpec) -> String {
        match spec.role {
            ReplicaRole::Green => format!(
                "{}-{}-green-{}",
                self.project, spec.service, spec.ordinal
            ),
            _ => format!("{}-{}-{}", self.project, spec.service, spec.ordinal),
        }
    }

    async fn output(&self, args: &[String]) -> Result<std::process::Output> {
        debug!(binary = %self.binary, ?args, "running engine command");
        Ok(Command::new(&self.binary).args(args).output().await?)
    }

    /// Run a docker command and return its trimmed stdout
    async fn docker<I, S>(&self, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        let output = self.output(&args).await?;
        if !output.status.success() {
            return Err(EngineError::Command {
                command: format!("{} {}", self.binary, args.join(" ")),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn inspect(&self, ids: &[String]) -> Result<Vec<ContainerInfo>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut args = vec!["inspect".to_string()];
        args.extend(ids.iter().cloned());
        let stdout = self.docker(args).await?;
        serde_json::from_str(&stdout).map_err(|e| EngineError::Output(e.to_string()))
    }

    async fn inspect_one(&self, id: &ReplicaId) -> Result<ContainerInfo> {
        self.inspect(&[id.as_str().to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::ReplicaNotFound(id.clone()))
    }

    fn run_args(&self, spec: &ReplicaSpec, template: &RunTemplate) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--detach".to_string(),
            "--name".to_string(),
            self.container_name(spec),
        ];
        let mut labels = template.labels.clone();
        labels.insert(PROJECT_LABEL.to_string(), self.project.clone());
        labels.insert(SERVICE_LABEL.to_string(), spec.service.clone());
        labels.insert(NUMBER_LABEL.to_string(), spec.ordinal.to_string());
        labels.insert(
            "com.docker.compose.oneoff".to_string(),
            "False".to_string(),
        );
        labels.insert(ROLE_LABEL.to_string(), spec.role.to_string());
        for (key, value) in labels {
            args.push("--label".to_string());
            args.push(format!("{}={}", key, value));
        }
        for env in &template.env {
            args.push("--env".to_string());
            args.push(env.clone());
        }
        for bind in &template.binds {
            args.push("--volume".to_string());
            args.push(bind.clone());
        }
        if let Some(network) = &template.network {
            args.push("--network".to_string());
            args.push(network.clone());
            args.push("--network-alias".to_string());
            args.push(spec.service.clone());
        }
        if let Some(restart) = &template.restart {
            args.push("--restart".to_string());
            args.push(restart.clone());
        }
        if spec.role == ReplicaRole::Stable {
            for (port, binding) in &template.ports {
                let publish = match (binding.host_ip.as_str(), binding.host_port.as_str()) {
                    (_, "") => port.clone(),
                    ("", host_port) => format!("{}:{}", host_port, port),
                    (ip, host_port) => format!("{}:{}:{}", ip, host_port, port),
                };
                args.push("--publish".to_string());
                args.push(publish);
            }
        }
        args.push(spec.image.clone());
        args
    }
}

#[async_trait]
impl Engine for DockerCliEngine {
    #[instrument(skip(self))]
    async fn list_replicas(&self, service: &str) -> Result<Vec<Replica>> {
        let stdout = self
            .docker([
                "ps".to_string(),
                "--quiet".to_string(),
                "--no-trunc".to_string(),
                "--filter".to_string(),
                format!("label={}={}", PROJECT_LABEL, self.project),
                "--filter".to_string(),
                format!("label={}={}", SERVICE_LABEL, service),
            ])
            .await?;
        let ids: Vec<String> = stdout.lines().map(str::to_string).collect();
        let containers = self.inspect(&ids).await?;

        if let Some(first) = containers
            .iter()
            .find(|c| c.role() == ReplicaRole::Stable)
            .or_else(|| containers.first())
        {
            self.templates
                .insert(service.to_string(), RunTemplate::from_container(first));
        }

        let mut replicas = containers
            .iter()
            .map(|c| c.to_replica(service))
            .collect::<Result<Vec<_>>>()?;
        replicas.sort_by(|a, b| a.ordinal.cmp(&b.ordinal).then(a.role.cmp(&b.role)));
        Ok(replicas)
    }

    #[instrument(skip(self), fields(service = %spec.service, ordinal = spec.ordinal))]
    async fn start_replica(&self, spec: &ReplicaSpec) -> Result<Replica> {
        let template = self
            .templates
            .get(&spec.service)
            .map(|t| t.clone())
            .ok_or_else(|| EngineError::NoTemplate(spec.service.clone()))?;

        let id = self.docker(self.run_args(spec, &template)).await?;
        let info = self.inspect_one(&ReplicaId::new(id)).await?;
        let replica = info.to_replica(&spec.service)?;
        info!(replica = %replica.label(), image = %spec.image, "replica started");
        Ok(replica)
    }

    #[instrument(skip(self))]
    async fn stop_replica(&self, id: &ReplicaId) -> Result<()> {
        self.docker(["stop", id.as_str()]).await?;
        self.docker(["rm", id.as_str()]).await?;
        Ok(())
    }

    async fn inspect_health(&self, id: &ReplicaId) -> Result<HealthState> {
        Ok(self.inspect_one(id).await?.health())
    }

    #[instrument(skip(self))]
    async fn exec(&self, id: &ReplicaId, command: &str) -> Result<i32> {
        let args: Vec<String> = ["exec", id.as_str(), "sh", "-c", command]
            .into_iter()
            .map(str::to_string)
            .collect();
        let output = self.output(&args).await?;
        Ok(output.status.code().unwrap_or(-1))
    }

    #[instrument(skip(self))]
    async fn restart_replica(&self, id: &ReplicaId) -> Result<()> {
        self.docker(["restart", id.as_str()]).await?;
        Ok(())
    }

    async fn prune_images(&self) -> Result<()> {
        let stdout = self.docker(["image", "prune", "--force"]).await?;
        info!(output = %stdout, "dangling images pruned");
        Ok(())
    }

    fn name(&self) -> &str {
        "docker"
    }
}
