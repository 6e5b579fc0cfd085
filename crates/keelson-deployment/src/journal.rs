//! Rollback journal
//!
//! Every replica stop and start a strategy issues is journaled per service
//! *before* the engine call, so an interrupted run can still be undone.
//! Rollback replays the journal in reverse.

use dashmap::DashMap;
use keelson_types::{Replica, ReplicaRole, ReplicaSpec};

/// Identity of a replica as far as rollback is concerned
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReplicaSnapshot {
    pub ordinal: u32,
    pub image: String,
    pub role: ReplicaRole,
}

impl ReplicaSnapshot {
    pub fn of(replica: &Replica) -> Self {
        Self {
            ordinal: replica.ordinal,
            image: replica.image.clone(),
            role: replica.role,
        }
    }

    pub fn of_spec(spec: &ReplicaSpec) -> Self {
        Self {
            ordinal: spec.ordinal,
            image: spec.image.clone(),
            role: spec.role,
        }
    }

    /// Same slot (ordinal and role), any image
    pub fn same_slot(&self, replica: &Replica) -> bool {
        self.ordinal == replica.ordinal && self.role == replica.role
    }

    pub fn matches(&self, replica: &Replica) -> bool {
        self.same_slot(replica) && self.image == replica.image
    }

    pub fn spec(&self, service: &str) -> ReplicaSpec {
        ReplicaSpec::new(service, self.ordinal, self.image.clone()).with_role(self.role)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    Stopped(ReplicaSnapshot),
    Started(ReplicaSnapshot),
}

/// Per-service journal of replica operations
#[derive(Debug, Default)]
pub struct RollbackJournal {
    entries: DashMap<String, Vec<JournalEntry>>,
}

impl RollbackJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fresh journal for a service
    pub fn begin(&self, service: &str) {
        self.entries.insert(service.to_string(), Vec::new());
    }

    pub fn record(&self, service: &str, entry: JournalEntry) {
        self.entries
            .entry(service.to_string())
            .or_default()
            .push(entry);
    }

    /// Forget a service's journal (the update stuck)
    pub fn commit(&self, service: &str) {
        self.entries.remove(service);
    }

    /// Remove and return a service's journal
    pub fn take(&self, service: &str) -> Vec<JournalEntry> {
        self.entries
            .remove(service)
            .map(|(_, entries)| entries)
            .unwrap_or_default()
    }

    pub fn entries(&self, service: &str) -> Vec<JournalEntry> {
        self.entries
            .get(service)
            .map(|e| e.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(ordinal: u32, image: &str) -> ReplicaSnapshot {
        ReplicaSnapshot {
            ordinal,
            image: image.to_string(),
            role: ReplicaRole::Stable,
        }
    }

    #[test]
    fn test_journal_lifecycle() {
        let journal = RollbackJournal::new();
        journal.begin("web");
        journal.record("web", JournalEntry::Stopped(snap(1, "a:1")));
        journal.record("web", JournalEntry::Started(snap(1, "a:2")));
        journal.record("api", JournalEntry::Started(snap(1, "b:2")));

        assert_eq!(journal.entries("web").len(), 2);
        assert_eq!(
            journal.take("web"),
            vec![
                JournalEntry::Stopped(snap(1, "a:1")),
                JournalEntry::Started(snap(1, "a:2")),
            ]
        );
        assert!(journal.take("web").is_empty());

        journal.commit("api");
        assert!(journal.entries("api").is_empty());
    }
}
