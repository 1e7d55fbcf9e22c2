//! Storage manager owning the on-disk layout

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::files::write_atomic;
use crate::repositories::*;
use crate::{Error, Result};

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageConfig {
    /// Root of every persisted store
    pub base_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from(".agent-ensemble"),
        }
    }
}

impl StorageConfig {
    pub fn agents_dir(&self) -> PathBuf {
        self.base_dir.join("agents")
    }

    pub fn registry_path(&self) -> PathBuf {
        self.base_dir.join("agent_registry.json")
    }

    pub fn workflows_dir(&self) -> PathBuf {
        self.base_dir.join("workflows")
    }

    pub fn learned_dir(&self) -> PathBuf {
        self.base_dir.join("learned_workflows")
    }

    pub fn history_dir(&self) -> PathBuf {
        self.base_dir.join("history")
    }

    pub fn insights_path(&self) -> PathBuf {
        self.base_dir.join("skills_history.json")
    }
}

/// Main storage manager coordinating all repositories
pub struct StorageManager {
    config: StorageConfig,
    agents: Arc<AgentRepository>,
    templates: Arc<TemplateRepository>,
    history: Arc<HistoryRepository>,
    insights: Arc<InsightRepository>,
}

impl StorageManager {
    /// Create the directory layout and the repositories over it
    pub async fn new(config: StorageConfig) -> Result<Self> {
        info!("Opening storage at {}", config.base_dir.display());

        for dir in [
            config.agents_dir(),
            config.workflows_dir().join("custom"),
            config.learned_dir(),
            config.history_dir(),
        ] {
            tokio::fs::create_dir_all(&dir).await?;
            debug!("Ensured storage directory {}", dir.display());
        }

        let agents = Arc::new(AgentRepository::new(
            config.agents_dir(),
            config.registry_path(),
        ));
        let templates = Arc::new(TemplateRepository::new(
            config.workflows_dir(),
            config.learned_dir(),
        ));
        let history = Arc::new(HistoryRepository::new(config.history_dir()));
        let insights = Arc::new(InsightRepository::new(config.insights_path()));

        Ok(Self {
            config,
            agents,
            templates,
            history,
            insights,
        })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn base_dir(&self) -> &Path {
        &self.config.base_dir
    }

    /// Get agent repository
    pub fn agents(&self) -> Arc<AgentRepository> {
        self.agents.clone()
    }

    /// Get template repository
    pub fn templates(&self) -> Arc<TemplateRepository> {
        self.templates.clone()
    }

    /// Get execution history repository
    pub fn history(&self) -> Arc<HistoryRepository> {
        self.history.clone()
    }

    /// Get skill insight repository
    pub fn insights(&self) -> Arc<InsightRepository> {
        self.insights.clone()
    }

    /// Check that every store directory is present and writable
    pub async fn health_check(&self) -> Result<()> {
        for dir in [
            self.config.agents_dir(),
            self.config.workflows_dir(),
            self.config.learned_dir(),
            self.config.history_dir(),
        ] {
            let metadata = tokio::fs::metadata(&dir).await?;
            if !metadata.is_dir() {
                return Err(Error::invalid_document(&dir, "expected a directory"));
            }
            let marker = dir.join(".health");
            write_atomic(&marker, b"ok").await?;
            tokio::fs::remove_file(&marker).await?;
        }
        Ok(())
    }

    /// Get storage statistics
    pub async fn stats(&self) -> Result<StorageStats> {
        Ok(StorageStats {
            agents_count: self.agents.load_registry().await?.len(),
            templates_count: self.templates.count().await?,
            learned_templates_count: self.templates.list_learned().await?.len(),
            executions_count: self.history.count().await?,
        })
    }
}

/// Storage statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    pub agents_count: usize,
    pub templates_count: usize,
    pub learned_templates_count: usize,
    pub executions_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_manager_creates_layout_and_reports() {
        let dir = TempDir::new().unwrap();
        let manager = StorageManager::new(StorageConfig {
            base_dir: dir.path().join("store"),
        })
        .await
        .unwrap();

        assert!(manager.config().workflows_dir().join("custom").is_dir());
        assert!(manager.config().history_dir().is_dir());
        manager.health_check().await.unwrap();

        let empty = manager.stats().await.unwrap();
        assert_eq!(empty.agents_count, 0);
        assert_eq!(empty.executions_count, 0);
        assert_eq!(manager.insights().path(), manager.config().insights_path());
        assert!(manager.insights().load().await.unwrap().agents.is_empty());

        manager.agents().load().await.unwrap();
        let seeded = manager.stats().await.unwrap();
        assert_eq!(seeded.agents_count, 6);
        assert_eq!(seeded.templates_count, 0);
    }
}
