//! In-memory engine
//!
//! Suitable for tests and dry runs. Health answers, exec exit codes and
//! start failures can be scripted per image (and per ordinal), and every
//! lifecycle call is recorded as an [`EngineEvent`].

use crate::engine::Engine;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use keelson_types::{HealthState, Replica, ReplicaId, ReplicaRole, ReplicaSpec};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// A recorded engine call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Started {
        service: String,
        ordinal: u32,
        image: String,
        role: ReplicaRole,
    },
    Stopped {
        service: String,
        ordinal: u32,
        image: String,
        role: ReplicaRole,
    },
    Restarted {
        service: String,
        ordinal: u32,
    },
    Exec {
        service: String,
        ordinal: u32,
        command: String,
    },
    Pruned,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ScriptKey {
    image: String,
    ordinal: Option<u32>,
}

/// Scriptable in-memory engine
pub struct InMemoryEngine {
    replicas: DashMap<ReplicaId, Replica>,
    health_scripts: DashMap<ScriptKey, Vec<HealthState>>,
    health_queues: DashMap<ReplicaId, VecDeque<HealthState>>,
    exec_codes: DashMap<String, i32>,
    rejected_images: Mutex<HashSet<String>>,
    events: Mutex<Vec<EngineEvent>>,
    address: String,
    next_id: AtomicU64,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self {
            replicas: DashMap::new(),
            health_scripts: DashMap::new(),
            health_queues: DashMap::new(),
            exec_codes: DashMap::new(),
            rejected_images: Mutex::new(HashSet::new()),
            events: Mutex::new(Vec::new()),
            address: "127.0.0.1".to_string(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Address reported for every replica (used by http/tcp probes)
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Place `count` healthy stable replicas of `service` on `image`
    pub fn seed(&self, service: &str, count: u32, image: &str) -> Vec<Replica> {
        (1..=count)
            .map(|ordinal| {
                let replica = self.create(&ReplicaSpec::new(service, ordinal, image));
                self.replicas.insert(replica.id.clone(), replica.clone());
                replica
            })
            .collect()
    }

    /// Replicas started from `image` report `states` in turn, repeating the last
    pub fn script_health(&self, image: &str, states: Vec<HealthState>) {
        self.health_scripts.insert(
            ScriptKey {
                image: image.to_string(),
                ordinal: None,
            },
            states,
        );
    }

    /// Like [`script_health`](Self::script_health), for one ordinal only
    pub fn script_replica_health(&self, image: &str, ordinal: u32, states: Vec<HealthState>) {
        self.health_scripts.insert(
            ScriptKey {
                image: image.to_string(),
                ordinal: Some(ordinal),
            },
            states,
        );
    }

    /// `exec` of `command` returns `code` (default 0)
    pub fn script_exec(&self, command: &str, code: i32) {
        self.exec_codes.insert(command.to_string(), code);
    }

    /// Starting a replica on `image` fails
    pub fn reject_image(&self, image: &str) {
        self.rejected_images.lock().insert(image.to_string());
    }

    /// `(ordinal, image, role)` of every live replica of a service, sorted
    pub fn snapshot(&self, service: &str) -> Vec<(u32, String, ReplicaRole)> {
        let mut live: Vec<_> = self
            .replicas
            .iter()
            .filter(|r| r.service == service)
            .map(|r| (r.ordinal, r.image.clone(), r.role))
            .collect();
        live.sort();
        live
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    fn record(&self, event: EngineEvent) {
        self.events.lock().push(event);
    }

    fn create(&self, spec: &ReplicaSpec) -> Replica {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        Replica {
            id: ReplicaId::new(format!("{:012x}", n)),
            service: spec.service.clone(),
            ordinal: spec.ordinal,
            image: spec.image.clone(),
            health: HealthState::Healthy,
            role: spec.role,
            address: Some(self.address.clone()),
        }
    }

    fn script_for(&self, image: &str, ordinal: u32) -> Option<Vec<HealthState>> {
        let specific = ScriptKey {
            image: image.to_string(),
            ordinal: Some(ordinal),
        };
        let general = ScriptKey {
            image: image.to_string(),
            ordinal: None,
        };
        self.health_scripts
            .get(&specific)
            .or_else(|| self.health_scripts.get(&general))
            .map(|states| states.clone())
    }

    fn get(&self, id: &ReplicaId) -> Result<Replica> {
        self.replicas
            .get(id)
            .map(|r| r.clone())
            .ok_or_else(|| EngineError::ReplicaNotFound(id.clone()))
    }
}

impl Default for InMemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Engine for InMemoryEngine {
    async fn list_replicas(&self, service: &str) -> Result<Vec<Replica>> {
        let mut replicas: Vec<Replica> = self
            .replicas
            .iter()
            .filter(|r| r.service == service)
            .map(|r| r.clone())
            .collect();
        replicas.sort_by(|a, b| a.ordinal.cmp(&b.ordinal).then(a.role.cmp(&b.role)));
        Ok(replicas)
    }

    async fn start_replica(&self, spec: &ReplicaSpec) -> Result<Replica> {
        if self.rejected_images.lock().contains(&spec.image) {
            return Err(EngineError::Rejected {
                operation: format!("start {}#{}", spec.service, spec.ordinal),
                reason: format!("image {} cannot be started", spec.image),
            });
        }
        let clash = self.replicas.iter().any(|r| {
            r.service == spec.service && r.ordinal == spec.ordinal && r.role == spec.role
        });
        if clash {
            return Err(EngineError::AlreadyRunning {
                service: spec.service.clone(),
                ordinal: spec.ordinal,
                role: spec.role,
            });
        }

        let mut replica = self.create(spec);
        if let Some(states) = self.script_for(&spec.image, spec.ordinal) {
            replica.health = HealthState::Unknown;
            self.health_queues
                .insert(replica.id.clone(), states.into_iter().collect());
        }
        self.replicas.insert(replica.id.clone(), replica.clone());
        self.record(EngineEvent::Started {
            service: spec.service.clone(),
            ordinal: spec.ordinal,
            image: spec.image.clone(),
            role: spec.role,
        });
        debug!(replica = %replica.label(), image = %replica.image, "replica started");
        Ok(replica)
    }

    async fn stop_replica(&self, id: &ReplicaId) -> Result<()> {
        let (_, replica) = self
            .replicas
            .remove(id)
            .ok_or_else(|| EngineError::ReplicaNotFound(id.clone()))?;
        self.health_queues.remove(id);
        self.record(EngineEvent::Stopped {
            service: replica.service.clone(),
            ordinal: replica.ordinal,
            image: replica.image.clone(),
            role: replica.role,
        });
        debug!(replica = %replica.label(), "replica stopped");
        Ok(())
    }

    async fn inspect_health(&self, id: &ReplicaId) -> Result<HealthState> {
        let replica = self.get(id)?;
        let Some(mut queue) = self.health_queues.get_mut(id) else {
            return Ok(replica.health);
        };
        let state = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().copied()
        };
        Ok(state.unwrap_or(replica.health))
    }

    async fn exec(&self, id: &ReplicaId, command: &str) -> Result<i32> {
        let replica = self.get(id)?;
        self.record(EngineEvent::Exec {
            service: replica.service,
            ordinal: replica.ordinal,
            command: command.to_string(),
        });
        Ok(self.exec_codes.get(command).map(|c| *c).unwrap_or(0))
    }

    async fn restart_replica(&self, id: &ReplicaId) -> Result<()> {
        let replica = self.get(id)?;
        self.record(EngineEvent::Restarted {
            service: replica.service,
            ordinal: replica.ordinal,
        });
        Ok(())
    }

    async fn prune_images(&self) -> Result<()> {
        self.record(EngineEvent::Pruned);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
