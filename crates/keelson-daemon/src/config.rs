//! Configuration for keelson-daemon
//!
//! Layered with the `config` crate: field defaults, then an optional file
//! (YAML, TOML or JSON by extension), then `KEELSON_`-prefixed environment
//! variables (`__` separates nesting levels), then command-line overrides
//! applied by the binary.
//!
//! The `config` crate lowercases every key it reads, so each multiword field
//! also accepts its all-lowercase spelling (`checkinterval`). Map keys such as
//! service names arrive lowercased too.

use crate::error::{DaemonError, DaemonResult};
use keelson_policy::CompiledPolicy;
use keelson_types::duration::humane;
use keelson_types::{
    HealthCheckKind, HealthCheckSpec, ImagePolicy, ImageRef, RegistryCredentials, RegistryKind,
    RegistrySettings, StrategyConfig, StrategyKind,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main daemon configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonConfig {
    /// Compose file to reconcile
    #[serde(default = "default_compose_file", alias = "composefile")]
    pub compose_file: PathBuf,

    /// Loop period
    #[serde(default = "default_check_interval", with = "humane", alias = "checkinterval")]
    pub check_interval: Duration,

    #[serde(default)]
    pub verbose: bool,

    /// Compose project name; defaults to the compose file's directory name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    /// JSON-lines deployment history; in-memory only when absent
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "metricsfile")]
    pub metrics_file: Option<PathBuf>,

    /// Prune dangling images after a tick that updated something
    #[serde(default, alias = "pruneimages")]
    pub prune_images: bool,

    /// Credentials and image policy per registry kind
    #[serde(default)]
    pub registry: BTreeMap<RegistryKind, RegistrySettings>,

    #[serde(default, alias = "rollingupdate")]
    pub rolling_update: RollingUpdateConfig,

    /// Per-service overrides
    #[serde(default)]
    pub services: BTreeMap<String, ServiceOverride>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            compose_file: default_compose_file(),
            check_interval: default_check_interval(),
            verbose: false,
            project: None,
            metrics_file: None,
            prune_images: false,
            registry: BTreeMap::new(),
            rolling_update: RollingUpdateConfig::default(),
            services: BTreeMap::new(),
        }
    }
}

/// The `rollingUpdate` block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollingUpdateConfig {
    /// When false, replicas are recreated together (all-at-once)
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub strategy: StrategyKind,

    #[serde(default, alias = "healthcheck")]
    pub health_check: HealthCheckKind,

    #[serde(default, skip_serializing_if = "Option::is_none", alias = "healthendpoint")]
    pub health_endpoint: Option<String>,

    /// Pause between replicas (one-at-a-time) or canary steps
    #[serde(default, with = "humane")]
    pub delay: Duration,

    #[serde(default, alias = "rollbackonfailure")]
    pub rollback_on_failure: bool,

    #[serde(default, alias = "steppercentages")]
    pub step_percentages: Vec<u32>,

    #[serde(default = "default_verification_period", with = "humane", alias = "verificationperiod")]
    pub verification_period: Duration,

    #[serde(default = "default_timeout", with = "humane")]
    pub timeout: Duration,

    #[serde(default = "default_success_threshold", alias = "successthreshold")]
    pub success_threshold: u32,

    #[serde(default = "default_failure_threshold", alias = "failurethreshold")]
    pub failure_threshold: u32,

    /// Health poll interval
    #[serde(default = "default_health_interval", with = "humane", alias = "healthinterval")]
    pub health_interval: Duration,

    /// Timeout of a single probe
    #[serde(default = "default_health_timeout", with = "humane", alias = "healthtimeout")]
    pub health_timeout: Duration,

    #[serde(default, skip_serializing_if = "Option::is_none", alias = "preupdatecommand")]
    pub pre_update_command: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none", alias = "postupdatecommand")]
    pub post_update_command: Option<String>,
}

impl Default for RollingUpdateConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            strategy: StrategyKind::default(),
            health_check: HealthCheckKind::default(),
            health_endpoint: None,
            delay: Duration::ZERO,
            rollback_on_failure: false,
            step_percentages: Vec::new(),
            verification_period: default_verification_period(),
            timeout: default_timeout(),
            success_threshold: default_success_threshold(),
            failure_threshold: default_failure_threshold(),
            health_interval: default_health_interval(),
            health_timeout: default_health_timeout(),
            pre_update_command: None,
            post_update_command: None,
        }
    }
}

impl RollingUpdateConfig {
    /// Strategy kind actually used
    pub fn kind(&self) -> StrategyKind {
        if self.enabled {
            self.strategy
        } else {
            StrategyKind::AllAtOnce
        }
    }

    pub fn strategy_config(&self) -> StrategyConfig {
        StrategyConfig {
            kind: self.kind(),
            timeout: self.timeout,
            pre_update_command: self.pre_update_command.clone(),
            post_update_command: self.post_update_command.clone(),
            health_check: HealthCheckSpec {
                kind: self.health_check,
                endpoint: self.health_endpoint.clone(),
                success_threshold: self.success_threshold,
                failure_threshold: self.failure_threshold,
                interval: self.health_interval,
                probe_timeout: self.health_timeout,
            },
            step_percentages: self.step_percentages.clone(),
            step_delay: self.delay,
            verification_period: self.verification_period,
            rollback_on_failure: self.rollback_on_failure,
        }
    }
}

/// `services.<name>` overrides
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceOverride {
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "imagepolicy")]
    pub image_policy: Option<ImagePolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none", alias = "rollingupdate")]
    pub rolling_update: Option<RollingUpdateConfig>,
}

// Default value helpers
fn default_compose_file() -> PathBuf {
    PathBuf::from("docker-compose.yml")
}

fn default_check_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_verification_period() -> Duration {
    Duration::from_secs(30)
}

fn default_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_success_threshold() -> u32 {
    1
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_health_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_health_timeout() -> Duration {
    Duration::from_secs(5)
}

impl DaemonConfig {
    /// Load defaults, then `path` (if given), then the environment
    pub fn load(path: Option<&Path>) -> DaemonResult<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("KEELSON")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        Ok(builder.build()?.try_deserialize()?)
    }

    /// Override for `service`; file keys arrive lowercased
    fn service_override(&self, service: &str) -> Option<&ServiceOverride> {
        self.services
            .get(service)
            .or_else(|| self.services.get(&service.to_ascii_lowercase()))
    }

    /// Image policy for a service: its own override, then its registry's
    pub fn policy_for(&self, service: &str, image: &ImageRef) -> Option<&ImagePolicy> {
        self.service_override(service)
            .and_then(|o| o.image_policy.as_ref())
            .or_else(|| {
                self.registry
                    .get(&image.kind)
                    .and_then(|r| r.image_policy.as_ref())
            })
    }

    /// Rolling-update settings for a service
    pub fn rolling_update_for(&self, service: &str) -> &RollingUpdateConfig {
        self.service_override(service)
            .and_then(|o| o.rolling_update.as_ref())
            .unwrap_or(&self.rolling_update)
    }

    pub fn strategy_for(&self, service: &str) -> StrategyConfig {
        self.rolling_update_for(service).strategy_config()
    }

    /// Credential bundles by registry kind
    pub fn credentials(&self) -> BTreeMap<RegistryKind, RegistryCredentials> {
        self.registry
            .iter()
            .filter_map(|(kind, settings)| settings.credentials.clone().map(|c| (*kind, c)))
            .collect()
    }

    /// Hosts to classify as Harbor besides `harbor.*`
    pub fn harbor_hosts(&self) -> Vec<String> {
        self.registry
            .get(&RegistryKind::Harbor)
            .and_then(|s| s.credentials.as_ref())
            .and_then(|c| c.declared_host())
            .into_iter()
            .collect()
    }

    /// Compose project name, normalized the way compose does
    pub fn project_name(&self) -> String {
        let raw = match &self.project {
            Some(project) => project.clone(),
            None => self
                .compose_file
                .canonicalize()
                .unwrap_or_else(|_| self.compose_file.clone())
                .parent()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };
        let name: String = raw
            .to_ascii_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        if name.is_empty() {
            "default".to_string()
        } else {
            name
        }
    }

    /// Reject configuration the loop cannot run with
    pub fn validate(&self) -> DaemonResult<()> {
        if self.check_interval.is_zero() {
            return Err(DaemonError::Config(
                "checkInterval must be greater than zero".to_string(),
            ));
        }

        for (kind, settings) in &self.registry {
            if let Some(policy) = &settings.image_policy {
                validate_policy(&format!("registry.{}.imagePolicy", kind), policy)?;
            }
        }
        validate_rolling_update("rollingUpdate", &self.rolling_update)?;

        for (service, service_override) in &self.services {
            if let Some(policy) = &service_override.image_policy {
                validate_policy(&format!("services.{}.imagePolicy", service), policy)?;
            }
            if let Some(rolling_update) = &service_override.rolling_update {
                validate_rolling_update(&format!("services.{}.rollingUpdate", service), rolling_update)?;
            }
        }
        Ok(())
    }
}

fn validate_policy(location: &str, policy: &ImagePolicy) -> DaemonResult<()> {
    if policy.clause_count() > 1 {
        return Err(DaemonError::Config(format!(
            "{}: at most one of semver, numerical, alphabetical may be set",
            location
        )));
    }
    if let Some(filter) = &policy.filter {
        if filter.pattern.trim().is_empty() && filter.extract.is_some() {
            return Err(DaemonError::Config(format!(
                "{}: extract requires a pattern",
                location
            )));
        }
    }

    let compiled = CompiledPolicy::compile(policy).map_err(|source| DaemonError::Policy {
        location: location.to_string(),
        source,
    })?;

    if let Some(capture) = compiled.capture() {
        if !compiled.pattern_has_capture(capture) {
            return Err(DaemonError::Config(format!(
                "{}: extract names group '{}' which the pattern does not define",
                location, capture
            )));
        }
    }
    Ok(())
}

fn validate_rolling_update(location: &str, rolling_update: &RollingUpdateConfig) -> DaemonResult<()> {
    rolling_update
        .strategy_config()
        .normalized()
        .map(|_| ())
        .map_err(|e| DaemonError::Config(format!("{}: {}", location, e)))
}
