//! Health-gated waiting
//!
//! A replica is polled at a fixed interval until it reaches
//! `success_threshold` consecutive passes, `failure_threshold` consecutive
//! failures, or the deadline. A pass resets the failure run and a failure
//! resets the success run; pending probes leave both runs untouched.

use crate::probes::{Probe, ProbeStatus};
use futures::future::join_all;
use keelson_types::{HealthCheckSpec, Replica, ReplicaId};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// How a health wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealthOutcome {
    Healthy,
    Unhealthy,
    Timeout,
}

impl HealthOutcome {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthOutcome::Healthy)
    }
}

impl fmt::Display for HealthOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthOutcome::Healthy => write!(f, "healthy"),
            HealthOutcome::Unhealthy => write!(f, "unhealthy"),
            HealthOutcome::Timeout => write!(f, "timeout"),
        }
    }
}

/// A point in time after which waiting stops
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn at(at: Instant) -> Self {
        Self { at }
    }

    pub fn after(timeout: Duration) -> Self {
        Self::at(Instant::now() + timeout)
    }

    pub fn instant(&self) -> Instant {
        self.at
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Sleep for `period`, or until the deadline if that comes first.
    ///
    /// Returns `false` when the deadline cut the sleep short.
    pub async fn pause(&self, period: Duration) -> bool {
        let wake = Instant::now() + period;
        if wake <= self.at {
            tokio::time::sleep_until(wake).await;
            true
        } else {
            tokio::time::sleep_until(self.at).await;
            false
        }
    }

    /// Run a future until the deadline; `None` if the deadline wins.
    pub async fn run<F: std::future::Future>(&self, fut: F) -> Option<F::Output> {
        tokio::time::timeout_at(self.at, fut).await.ok()
    }
}

/// Thresholds and cadence of a health wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub success_threshold: u32,
    pub failure_threshold: u32,
    pub interval: Duration,
}

impl WaitPolicy {
    pub fn new(success_threshold: u32, failure_threshold: u32, interval: Duration) -> Self {
        Self {
            success_threshold: success_threshold.max(1),
            failure_threshold: failure_threshold.max(1),
            interval,
        }
    }
}

impl From<&HealthCheckSpec> for WaitPolicy {
    fn from(spec: &HealthCheckSpec) -> Self {
        Self::new(spec.success_threshold, spec.failure_threshold, spec.interval)
    }
}

/// Consecutive pass/fail counter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCounter {
    success_threshold: u32,
    failure_threshold: u32,
    successes: u32,
    failures: u32,
}

impl HealthCounter {
    pub fn new(success_threshold: u32, failure_threshold: u32) -> Self {
        Self {
            success_threshold: success_threshold.max(1),
            failure_threshold: failure_threshold.max(1),
            successes: 0,
            failures: 0,
        }
    }

    /// Feed one probe verdict; returns the outcome once a threshold is met.
    pub fn record(&mut self, status: ProbeStatus) -> Option<HealthOutcome> {
        match status {
            ProbeStatus::Pass => {
                self.successes += 1;
                self.failures = 0;
                (self.successes >= self.success_threshold).then_some(HealthOutcome::Healthy)
            }
            ProbeStatus::Fail => {
                self.failures += 1;
                self.successes = 0;
                (self.failures >= self.failure_threshold).then_some(HealthOutcome::Unhealthy)
            }
            ProbeStatus::Pending => None,
        }
    }

    pub fn successes(&self) -> u32 {
        self.successes
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

/// Poll `replica` until it is healthy, unhealthy, or the deadline passes.
#[instrument(skip(probe, replica, policy), fields(replica = %replica.label()))]
pub async fn wait_for_health<P: Probe + ?Sized>(
    probe: &P,
    replica: &Replica,
    deadline: Deadline,
    policy: WaitPolicy,
) -> HealthOutcome {
    let mut counter = HealthCounter::new(policy.success_threshold, policy.failure_threshold);

    loop {
        if deadline.is_expired() {
            warn!("health wait timed out");
            return HealthOutcome::Timeout;
        }

        let Some(result) = deadline.run(probe.probe(replica)).await else {
            warn!("health wait timed out during probe");
            return HealthOutcome::Timeout;
        };
        debug!(
            status = ?result.status,
            successes = counter.successes(),
            failures = counter.failures(),
            message = result.message.as_deref().unwrap_or(""),
            "probe result"
        );

        if let Some(outcome) = counter.record(result.status) {
            debug!(%outcome, "health wait finished");
            return outcome;
        }

        if !deadline.pause(policy.interval).await {
            warn!("health wait timed out");
            return HealthOutcome::Timeout;
        }
    }
}

/// Wait on several replicas concurrently; results come back in input order.
pub async fn wait_for_all<P: Probe + ?Sized>(
    probe: &P,
    replicas: &[Replica],
    deadline: Deadline,
    policy: WaitPolicy,
) -> Vec<(ReplicaId, HealthOutcome)> {
    let waits = replicas.iter().map(|replica| async move {
        let outcome = wait_for_health(probe, replica, deadline, policy).await;
        (replica.id.clone(), outcome)
    });
    join_all(waits).await
}
