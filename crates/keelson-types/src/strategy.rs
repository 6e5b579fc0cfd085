//! Update strategy configuration

use crate::duration::humane;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Canary steps used when none are configured
pub const DEFAULT_CANARY_STEPS: [u32; 4] = [10, 25, 50, 100];

const DEFAULT_SUCCESS_THRESHOLD: u32 = 1;
const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
const DEFAULT_VERIFICATION_PERIOD: Duration = Duration::from_secs(30);
const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Invalid strategy or health-check configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{field} must be at least 1")]
    ThresholdTooLow { field: &'static str },

    #[error("timeout must be greater than zero")]
    ZeroTimeout,

    #[error("step percentages must be strictly increasing, non-zero and end at or below 100: {0:?}")]
    InvalidSteps(Vec<u32>),

    #[error("health check '{0}' requires an endpoint")]
    MissingEndpoint(HealthCheckKind),

    #[error("unknown {what}: {value}")]
    Unknown { what: &'static str, value: String },
}

/// How replicas move from the old tag to the new one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    #[default]
    OneAtATime,
    AllAtOnce,
    BlueGreen,
    Canary,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::OneAtATime => "one-at-a-time",
            StrategyKind::AllAtOnce => "all-at-once",
            StrategyKind::BlueGreen => "blue-green",
            StrategyKind::Canary => "canary",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "one-at-a-time" | "rolling" => Ok(StrategyKind::OneAtATime),
            "all-at-once" | "recreate" => Ok(StrategyKind::AllAtOnce),
            "blue-green" | "bluegreen" => Ok(StrategyKind::BlueGreen),
            "canary" => Ok(StrategyKind::Canary),
            other => Err(ConfigError::Unknown {
                what: "strategy",
                value: other.to_string(),
            }),
        }
    }
}

/// Health probe flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthCheckKind {
    #[default]
    Docker,
    Http,
    Tcp,
    Command,
}

impl HealthCheckKind {
    pub fn needs_endpoint(&self) -> bool {
        !matches!(self, HealthCheckKind::Docker)
    }
}

impl fmt::Display for HealthCheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthCheckKind::Docker => write!(f, "docker"),
            HealthCheckKind::Http => write!(f, "http"),
            HealthCheckKind::Tcp => write!(f, "tcp"),
            HealthCheckKind::Command => write!(f, "command"),
        }
    }
}

impl FromStr for HealthCheckKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "docker" => Ok(HealthCheckKind::Docker),
            "http" => Ok(HealthCheckKind::Http),
            "tcp" => Ok(HealthCheckKind::Tcp),
            "command" | "exec" => Ok(HealthCheckKind::Command),
            other => Err(ConfigError::Unknown {
                what: "health check",
                value: other.to_string(),
            }),
        }
    }
}

/// Health-check parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckSpec {
    #[serde(default)]
    pub kind: HealthCheckKind,

    /// URL or path (http), `host:port` or `port` (tcp), shell command (command)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Consecutive successes needed (at least 1)
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    /// Consecutive failures tolerated (at least 1)
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Poll period
    #[serde(default, with = "humane")]
    pub interval: Duration,

    /// Timeout for a single probe
    #[serde(default, with = "humane")]
    pub probe_timeout: Duration,
}

fn default_success_threshold() -> u32 {
    DEFAULT_SUCCESS_THRESHOLD
}

fn default_failure_threshold() -> u32 {
    DEFAULT_FAILURE_THRESHOLD
}

impl Default for HealthCheckSpec {
    fn default() -> Self {
        Self {
            kind: HealthCheckKind::Docker,
            endpoint: None,
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            interval: DEFAULT_HEALTH_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

impl HealthCheckSpec {
    pub fn new(kind: HealthCheckKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_thresholds(mut self, success: u32, failure: u32) -> Self {
        self.success_threshold = success;
        self.failure_threshold = failure;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    // Thresholds are defaulted only when absent (serde/Default); an explicit
    // 0 is left for `validate` to reject.
    fn apply_defaults(&mut self) {
        if self.interval.is_zero() {
            self.interval = DEFAULT_HEALTH_INTERVAL;
        }
        if self.probe_timeout.is_zero() {
            self.probe_timeout = DEFAULT_PROBE_TIMEOUT;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.success_threshold < 1 {
            return Err(ConfigError::ThresholdTooLow {
                field: "successThreshold",
            });
        }
        if self.failure_threshold < 1 {
            return Err(ConfigError::ThresholdTooLow {
                field: "failureThreshold",
            });
        }
        let has_endpoint = self
            .endpoint
            .as_deref()
            .is_some_and(|e| !e.trim().is_empty());
        if self.kind.needs_endpoint() && !has_endpoint {
            return Err(ConfigError::MissingEndpoint(self.kind));
        }
        Ok(())
    }
}

/// Per-service update strategy configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyConfig {
    #[serde(default)]
    pub kind: StrategyKind,

    /// Deadline for one whole Execute
    #[serde(with = "humane")]
    pub timeout: Duration,

    /// Shell command run in each target replica before it is replaced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_update_command: Option<String>,

    /// Shell command run in each new replica after it is verified
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_update_command: Option<String>,

    #[serde(default)]
    pub health_check: HealthCheckSpec,

    /// Canary steps, e.g. `[10, 25, 50, 100]`
    #[serde(default)]
    pub step_percentages: Vec<u32>,

    /// Pause between replicas (one-at-a-time) or canary steps
    #[serde(default, with = "humane")]
    pub step_delay: Duration,

    /// Blue-green observation window after the switch
    #[serde(default, with = "humane")]
    pub verification_period: Duration,

    #[serde(default)]
    pub rollback_on_failure: bool,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            kind: StrategyKind::OneAtATime,
            timeout: Duration::from_secs(300),
            pre_update_command: None,
            post_update_command: None,
            health_check: HealthCheckSpec::default(),
            step_percentages: Vec::new(),
            step_delay: Duration::ZERO,
            verification_period: DEFAULT_VERIFICATION_PERIOD,
            rollback_on_failure: false,
        }
    }
}

impl StrategyConfig {
    pub fn new(kind: StrategyKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    pub fn with_health_check(mut self, health_check: HealthCheckSpec) -> Self {
        self.health_check = health_check;
        self
    }

    pub fn with_rollback(mut self, rollback_on_failure: bool) -> Self {
        self.rollback_on_failure = rollback_on_failure;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_steps(mut self, steps: Vec<u32>) -> Self {
        self.step_percentages = steps;
        self
    }

    /// Fill unset poll timings, verification period and canary steps, then
    /// validate. A canary whose last step is below 100 gets a final 100 step
    /// so every replica ends on the new tag.
    pub fn normalized(mut self) -> Result<Self, ConfigError> {
        self.health_check.apply_defaults();
        if self.verification_period.is_zero() {
            self.verification_period = DEFAULT_VERIFICATION_PERIOD;
        }
        if self.kind == StrategyKind::Canary {
            if self.step_percentages.is_empty() {
                self.step_percentages = DEFAULT_CANARY_STEPS.to_vec();
            }
            validate_steps(&self.step_percentages)?;
            if self.step_percentages.last().copied() != Some(100) {
                self.step_percentages.push(100);
            }
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        self.health_check.validate()?;
        if !self.step_percentages.is_empty() {
            validate_steps(&self.step_percentages)?;
        }
        Ok(())
    }
}

fn validate_steps(steps: &[u32]) -> Result<(), ConfigError> {
    let increasing = steps.windows(2).all(|w| w[0] < w[1]);
    let in_range = steps.first().is_some_and(|&first| first > 0)
        && steps.last().is_some_and(|&last| last <= 100);
    if increasing && in_range {
        Ok(())
    } else {
        Err(ConfigError::InvalidSteps(steps.to_vec()))
    }
}
