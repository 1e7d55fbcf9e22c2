//! Skill insight ledger persistence
//!
//! The whole ledger is one JSON document rewritten after every recorded
//! outcome.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use agent_ensemble_core::insights::{InsightLedger, InsightStore};

use crate::files::write_atomic;
use crate::{Error, Result};

pub struct InsightRepository {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl InsightRepository {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored ledger; a missing document is an empty ledger
    pub async fn load(&self) -> Result<InsightLedger> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(InsightLedger::new()),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&contents)
            .map_err(|e| Error::invalid_document(&self.path, e.to_string()))
    }

    pub async fn save(&self, ledger: &InsightLedger) -> Result<()> {
        let contents = serde_json::to_vec_pretty(ledger)?;
        let _guard = self.write_lock.lock().await;
        write_atomic(&self.path, &contents).await?;
        debug!(
            "Saved insights for {} agents to {}",
            ledger.agents.len(),
            self.path.display()
        );
        Ok(())
    }
}

#[async_trait]
impl InsightStore for InsightRepository {
    async fn save_insights(&self, ledger: &InsightLedger) -> agent_ensemble_core::Result<()> {
        self.save(ledger).await.map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_ensemble_core::insights::{InsightRecord, InsightTracker};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_document_is_empty_ledger() {
        let dir = TempDir::new().unwrap();
        let repo = InsightRepository::new(dir.path().join("skills_history.json"));
        assert_eq!(repo.load().await.unwrap(), InsightLedger::new());
    }

    #[tokio::test]
    async fn test_tracker_write_through_survives_reload() {
        let dir = TempDir::new().unwrap();
        let repo = Arc::new(InsightRepository::new(dir.path().join("skills_history.json")));
        let tracker = InsightTracker::new().with_store(repo.clone());
        for _ in 0..3 {
            let record = InsightRecord::new("exec-1", "tester", "testing", "Test the parser", true)
                .with_usage(12.0, 300, 0.03)
                .with_prompt("Run the suite");
            tracker.record(record).await;
        }

        let reloaded = repo.load().await.unwrap();
        assert_eq!(reloaded.prompt_patterns.len(), 1);
        assert_eq!(reloaded.best_prompt("testing", "tester"), Some("Run the suite"));
        assert_eq!(reloaded.agent("tester").unwrap().total_tasks, 3);
    }

    #[tokio::test]
    async fn test_corrupt_document_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("skills_history.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();
        let err = InsightRepository::new(&path).load().await.unwrap_err();
        assert!(matches!(err, Error::InvalidDocument { .. }));
    }
}
