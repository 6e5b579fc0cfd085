//! Deployment history entries and records
//!
//! Recorders store an append-only stream of [`HistoryEntry`] values; the
//! per-deployment [`DeploymentRecord`] view is folded from that stream.

use chrono::{DateTime, Utc};
use keelson_types::{DeploymentId, StrategyKind, UpdateDecision};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Final (or current) state of a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentOutcome {
    InProgress,
    Succeeded,
    Failed,
    RolledBack,
    RollbackFailed,
}

impl fmt::Display for DeploymentOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentOutcome::InProgress => write!(f, "in_progress"),
            DeploymentOutcome::Succeeded => write!(f, "succeeded"),
            DeploymentOutcome::Failed => write!(f, "failed"),
            DeploymentOutcome::RolledBack => write!(f, "rolled_back"),
            DeploymentOutcome::RollbackFailed => write!(f, "rollback_failed"),
        }
    }
}

/// What happened to a deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HistoryEvent {
    Started {
        service: String,
        image: String,
        from_tag: String,
        to_tag: String,
        strategy: StrategyKind,
    },
    Succeeded,
    Failed {
        error: String,
    },
    RolledBack {
        succeeded: bool,
    },
}

/// One line of deployment history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub deployment_id: DeploymentId,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: HistoryEvent,
}

impl HistoryEntry {
    pub fn now(deployment_id: DeploymentId, event: HistoryEvent) -> Self {
        Self {
            deployment_id,
            timestamp: Utc::now(),
            event,
        }
    }

    pub fn started(id: DeploymentId, decision: &UpdateDecision, strategy: StrategyKind) -> Self {
        Self::now(
            id,
            HistoryEvent::Started {
                service: decision.service.clone(),
                image: decision.image.name(),
                from_tag: decision.current_tag.clone(),
                to_tag: decision.selected_tag.clone(),
                strategy,
            },
        )
    }
}

/// Everything known about one deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub id: DeploymentId,
    pub service: String,
    pub image: String,
    pub from_tag: String,
    pub to_tag: String,
    pub strategy: StrategyKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: DeploymentOutcome,
    pub error: Option<String>,
}

impl DeploymentRecord {
    pub fn is_finished(&self) -> bool {
        self.outcome != DeploymentOutcome::InProgress
    }

    fn apply(&mut self, entry: &HistoryEntry) {
        match &entry.event {
            HistoryEvent::Started { .. } => {}
            HistoryEvent::Succeeded => {
                self.outcome = DeploymentOutcome::Succeeded;
                self.finished_at = Some(entry.timestamp);
            }
            HistoryEvent::Failed { error } => {
                self.outcome = DeploymentOutcome::Failed;
                self.error = Some(error.clone());
                self.finished_at = Some(entry.timestamp);
            }
            HistoryEvent::RolledBack { succeeded } => {
                self.outcome = if *succeeded {
                    DeploymentOutcome::RolledBack
                } else {
                    DeploymentOutcome::RollbackFailed
                };
                self.finished_at = Some(entry.timestamp);
            }
        }
    }
}

/// Fold an entry stream into records, in start order.
///
/// Entries for a deployment whose start is missing are ignored.
pub fn fold_history<'a>(entries: impl IntoIterator<Item = &'a HistoryEntry>) -> Vec<DeploymentRecord> {
    let mut records: Vec<DeploymentRecord> = Vec::new();
    let mut index: HashMap<DeploymentId, usize> = HashMap::new();

    for entry in entries {
        if let HistoryEvent::Started {
            service,
            image,
            from_tag,
            to_tag,
            strategy,
        } = &entry.event
        {
            index.insert(entry.deployment_id.clone(), records.len());
            records.push(DeploymentRecord {
                id: entry.deployment_id.clone(),
                service: service.clone(),
                image: image.clone(),
                from_tag: from_tag.clone(),
                to_tag: to_tag.clone(),
                strategy: *strategy,
                started_at: entry.timestamp,
                finished_at: None,
                outcome: DeploymentOutcome::InProgress,
                error: None,
            });
        } else if let Some(&i) = index.get(&entry.deployment_id) {
            records[i].apply(entry);
        }
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use keelson_types::{ImageRef, PolicySource};

    fn decision() -> UpdateDecision {
        UpdateDecision::new(
            "web",
            ImageRef::parse("nginx:1.25").unwrap(),
            "1.27",
            PolicySource::Semver,
        )
        .unwrap()
    }

    #[test]
    fn test_fold_lifecycle() {
        let id = DeploymentId::generate();
        let entries = vec![
            HistoryEntry::started(id.clone(), &decision(), StrategyKind::OneAtATime),
            HistoryEntry::now(
                id.clone(),
                HistoryEvent::Failed {
                    error: "health timeout".to_string(),
                },
            ),
            HistoryEntry::now(id.clone(), HistoryEvent::RolledBack { succeeded: true }),
        ];

        let records = fold_history(&entries);
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.service, "web");
        assert_eq!(record.image, "nginx");
        assert_eq!((record.from_tag.as_str(), record.to_tag.as_str()), ("1.25", "1.27"));
        assert_eq!(record.outcome, DeploymentOutcome::RolledBack);
        assert_eq!(record.error.as_deref(), Some("health timeout"));
        assert!(record.is_finished());
    }

    #[test]
    fn test_orphan_entries_ignored() {
        let entries = vec![HistoryEntry::now(DeploymentId::generate(), HistoryEvent::Succeeded)];
        assert!(fold_history(&entries).is_empty());
    }

    #[test]
    fn test_entry_json_shape() {
        let entry = HistoryEntry::now(DeploymentId::generate(), HistoryEvent::Succeeded);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["event"], "succeeded");
        assert!(json["timestamp"].is_string());

        let back: HistoryEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
    }
}
