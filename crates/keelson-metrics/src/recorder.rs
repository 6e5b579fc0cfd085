//! Deployment recorders

use crate::error::{RecorderError, Result};
use crate::record::{fold_history, DeploymentRecord, HistoryEntry, HistoryEvent};
use async_trait::async_trait;
use keelson_types::{DeploymentId, StrategyKind, UpdateDecision};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::debug;

/// Persistence for deployment history
#[async_trait]
pub trait DeploymentRecorder: Send + Sync {
    /// Append one history entry
    async fn append(&self, entry: HistoryEntry) -> Result<()>;

    /// Every entry, oldest first
    async fn entries(&self) -> Result<Vec<HistoryEntry>>;

    /// Start a deployment and return its id
    async fn record_start(
        &self,
        decision: &UpdateDecision,
        strategy: StrategyKind,
    ) -> Result<DeploymentId> {
        let id = DeploymentId::generate();
        self.append(HistoryEntry::started(id.clone(), decision, strategy))
            .await?;
        Ok(id)
    }

    async fn record_success(&self, id: &DeploymentId) -> Result<()> {
        self.append(HistoryEntry::now(id.clone(), HistoryEvent::Succeeded))
            .await
    }

    async fn record_failure(&self, id: &DeploymentId, error: &str) -> Result<()> {
        self.append(HistoryEntry::now(
            id.clone(),
            HistoryEvent::Failed {
                error: error.to_string(),
            },
        ))
        .await
    }

    async fn record_rollback(&self, id: &DeploymentId, succeeded: bool) -> Result<()> {
        self.append(HistoryEntry::now(
            id.clone(),
            HistoryEvent::RolledBack { succeeded },
        ))
        .await
    }

    /// Deployments of one service, oldest first
    async fn history(&self, service: &str) -> Result<Vec<DeploymentRecord>> {
        let entries = self.entries().await?;
        Ok(fold_history(&entries)
            .into_iter()
            .filter(|r| r.service == service)
            .collect())
    }
}

/// In-memory recorder for testing and runs without a metrics file
pub struct InMemoryRecorder {
    entries: RwLock<Vec<HistoryEntry>>,
    started: RwLock<HashSet<DeploymentId>>,
}

impl InMemoryRecorder {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            started: RwLock::new(HashSet::new()),
        }
    }

    /// All folded records
    pub fn records(&self) -> Vec<DeploymentRecord> {
        fold_history(self.entries.read().iter())
    }

    pub fn clear(&self) {
        self.entries.write().clear();
        self.started.write().clear();
    }
}

impl Default for InMemoryRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeploymentRecorder for InMemoryRecorder {
    async fn append(&self, entry: HistoryEntry) -> Result<()> {
        if matches!(entry.event, HistoryEvent::Started { .. }) {
            self.started.write().insert(entry.deployment_id.clone());
        } else if !self.started.read().contains(&entry.deployment_id) {
            return Err(RecorderError::UnknownDeployment(entry.deployment_id));
        }
        self.entries.write().push(entry);
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<HistoryEntry>> {
        Ok(self.entries.read().clone())
    }
}

/// Append-only JSON-lines file recorder
pub struct JsonLinesRecorder {
    path: PathBuf,
}

impl JsonLinesRecorder {
    /// Open (or prepare to create) a history file
    pub async fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DeploymentRecorder for JsonLinesRecorder {
    async fn append(&self, entry: HistoryEntry) -> Result<()> {
        let json = serde_json::to_string(&entry)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(json.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;

        debug!(path = %self.path.display(), deployment = %entry.deployment_id, "history entry appended");
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<HistoryEntry>> {
        let file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut lines = BufReader::new(file).lines();
        let mut entries = Vec::new();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(&line)?);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::DeploymentOutcome;
    use keelson_types::{ImageRef, PolicySource};

    fn decision(service: &str, from: &str, to: &str) -> UpdateDecision {
        UpdateDecision::new(
            service,
            ImageRef::parse(&format!("registry.local/{}:{}", service, from)).unwrap(),
            to,
            PolicySource::Semver,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_memory_recorder_lifecycle() {
        let recorder = InMemoryRecorder::new();
        let id = recorder
            .record_start(&decision("web", "1.0", "1.1"), StrategyKind::OneAtATime)
            .await
            .unwrap();
        recorder.record_success(&id).await.unwrap();

        let other = recorder
            .record_start(&decision("api", "2.0", "2.1"), StrategyKind::Canary)
            .await
            .unwrap();
        recorder.record_failure(&other, "unhealthy").await.unwrap();
        recorder.record_rollback(&other, true).await.unwrap();

        let web = recorder.history("web").await.unwrap();
        assert_eq!(web.len(), 1);
        assert_eq!(web[0].outcome, DeploymentOutcome::Succeeded);

        let api = recorder.history("api").await.unwrap();
        assert_eq!(api[0].outcome, DeploymentOutcome::RolledBack);
        assert_eq!(api[0].strategy, StrategyKind::Canary);
        assert_eq!(recorder.records().len(), 2);
    }

    #[tokio::test]
    async fn test_memory_recorder_rejects_unknown() {
        let recorder = InMemoryRecorder::new();
        let result = recorder.record_success(&DeploymentId::generate()).await;
        assert!(matches!(result, Err(RecorderError::UnknownDeployment(_))));
    }

    #[tokio::test]
    async fn test_json_lines_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history").join("deployments.jsonl");

        let recorder = JsonLinesRecorder::new(&path).await.unwrap();
        assert!(recorder.entries().await.unwrap().is_empty());

        let id = recorder
            .record_start(&decision("web", "1.0", "1.1"), StrategyKind::BlueGreen)
            .await
            .unwrap();
        recorder.record_failure(&id, "post command failed").await.unwrap();

        let reopened = JsonLinesRecorder::new(&path).await.unwrap();
        let history = reopened.history("web").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, id);
        assert_eq!(history[0].outcome, DeploymentOutcome::Failed);

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
    }
}
