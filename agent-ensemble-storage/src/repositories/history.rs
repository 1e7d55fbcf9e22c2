//! Execution history repository implementation
//!
//! One JSON document per finalized execution. Records are written once with
//! create-new semantics and never rewritten.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use agent_ensemble_core::execution::WorkflowExecution;
use agent_ensemble_core::orchestration::ExecutionArchive;
use agent_ensemble_core::statistics::{
    global_statistics, workflow_statistics, GlobalStatistics, WorkflowStatistics,
};

use crate::files::list_files;
use crate::{Error, Result};

/// Filter for history listings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryQuery {
    pub workflow: Option<String>,
    pub limit: Option<usize>,
}

impl HistoryQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn workflow<S: Into<String>>(mut self, name: S) -> Self {
        self.workflow = Some(name.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Repository for finalized workflow executions
pub struct HistoryRepository {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl HistoryRepository {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist a finalized execution as a new document
    pub async fn record(&self, execution: &WorkflowExecution) -> Result<PathBuf> {
        if !execution.is_finalized() {
            return Err(Error::Conflict(format!(
                "Execution {} is still running",
                execution.execution_id
            )));
        }

        let path = self.dir.join(execution.history_file_name());
        let contents = serde_json::to_vec_pretty(execution)?;

        let _guard = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(Error::Conflict(format!(
                    "Execution record {} already exists",
                    execution.execution_id
                )));
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(&contents).await?;
        file.sync_all().await?;

        info!(
            execution_id = %execution.execution_id,
            workflow = %execution.workflow_name,
            status = %execution.status,
            "Recorded execution history to {}",
            path.display()
        );
        Ok(path)
    }

    /// Readable records, newest first. Unreadable documents are logged and
    /// skipped.
    pub async fn list(&self, query: &HistoryQuery) -> Result<Vec<WorkflowExecution>> {
        let mut records = Vec::new();
        for path in list_files(&self.dir, &["json"]).await? {
            match read_record(&path).await {
                Ok(record) => {
                    if query
                        .workflow
                        .as_deref()
                        .map_or(true, |name| record.workflow_name == name)
                    {
                        records.push(record);
                    }
                }
                Err(e) => warn!("Skipping unreadable history record {}: {}", path.display(), e),
            }
        }

        records.sort_by(|a, b| {
            b.started_at
                .cmp(&a.started_at)
                .then_with(|| b.execution_id.cmp(&a.execution_id))
        });
        if let Some(limit) = query.limit {
            records.truncate(limit);
        }
        debug!("Loaded {} history records", records.len());
        Ok(records)
    }

    pub async fn get(&self, execution_id: &str) -> Result<Option<WorkflowExecution>> {
        let suffix = format!("_{}.json", execution_id);
        for path in list_files(&self.dir, &["json"]).await? {
            let matches = path
                .file_name()
                .map(|n| n.to_string_lossy().ends_with(&suffix))
                .unwrap_or(false);
            if matches {
                return read_record(&path).await.map(Some);
            }
        }
        Ok(None)
    }

    pub async fn count(&self) -> Result<usize> {
        Ok(list_files(&self.dir, &["json"]).await?.len())
    }

    pub async fn workflow_statistics(&self, workflow_name: &str) -> Result<Option<WorkflowStatistics>> {
        let records = self.list(&HistoryQuery::all().workflow(workflow_name)).await?;
        Ok(workflow_statistics(workflow_name, &records))
    }

    pub async fn global_statistics(&self) -> Result<GlobalStatistics> {
        Ok(global_statistics(&self.list(&HistoryQuery::all()).await?))
    }
}

async fn read_record(path: &Path) -> Result<WorkflowExecution> {
    let contents = tokio::fs::read_to_string(path).await?;
    serde_json::from_str(&contents).map_err(|e| Error::invalid_document(path, e.to_string()))
}

#[async_trait]
impl ExecutionArchive for HistoryRepository {
    async fn persist(&self, execution: &WorkflowExecution) -> agent_ensemble_core::Result<()> {
        self.record(execution).await.map(|_| ()).map_err(Into::into)
    }
}
