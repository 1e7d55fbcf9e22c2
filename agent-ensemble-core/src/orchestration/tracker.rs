//! Live execution tracking
//!
//! Running executions live in an in-memory table keyed by execution id.
//! Completing an execution removes it from the table, finalizes it and hands
//! the immutable record to the [`ExecutionArchive`]; nothing is updated in
//! place afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::execution::{ExecutionStatus, StepAttempt, WorkflowExecution};
use crate::{Error, Result};

/// Durable, append-only destination for finalized executions
#[async_trait]
pub trait ExecutionArchive: Send + Sync {
    async fn persist(&self, execution: &WorkflowExecution) -> Result<()>;
}

/// Archive that keeps nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NullArchive;

#[async_trait]
impl ExecutionArchive for NullArchive {
    async fn persist(&self, _execution: &WorkflowExecution) -> Result<()> {
        Ok(())
    }
}

/// A finalized record and whether it reached the archive
#[derive(Debug, Clone)]
pub struct FinalizedExecution {
    pub execution: WorkflowExecution,
    pub archived: bool,
}

impl FinalizedExecution {
    pub fn status(&self) -> ExecutionStatus {
        self.execution.status
    }
}

/// Table of running executions
#[derive(Clone)]
pub struct ExecutionTracker {
    active: Arc<RwLock<HashMap<String, WorkflowExecution>>>,
    archive: Arc<dyn ExecutionArchive>,
}

impl std::fmt::Debug for ExecutionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionTracker").finish_non_exhaustive()
    }
}

impl Default for ExecutionTracker {
    fn default() -> Self {
        Self::new(Arc::new(NullArchive))
    }
}

impl ExecutionTracker {
    pub fn new(archive: Arc<dyn ExecutionArchive>) -> Self {
        Self {
            active: Arc::new(RwLock::new(HashMap::new())),
            archive,
        }
    }

    /// Register a new running execution and return its id
    pub async fn start_execution(
        &self,
        workflow_name: &str,
        workflow_version: &str,
        task_description: &str,
        total_steps: usize,
        project_path: Option<&str>,
    ) -> String {
        let mut execution =
            WorkflowExecution::new(workflow_name, workflow_version, task_description, total_steps);
        if let Some(path) = project_path {
            execution = execution.with_project_path(path);
        }
        let id = execution.execution_id.clone();
        info!(
            execution_id = %id,
            workflow = workflow_name,
            total_steps,
            "Started workflow execution"
        );
        self.active.write().await.insert(id.clone(), execution);
        id
    }

    async fn with_execution<T>(
        &self,
        execution_id: &str,
        f: impl FnOnce(&mut WorkflowExecution) -> Result<T>,
    ) -> Result<T> {
        let mut active = self.active.write().await;
        let execution = active
            .get_mut(execution_id)
            .ok_or_else(|| Error::not_found("WorkflowExecution", execution_id))?;
        f(execution)
    }

    pub async fn start_step(
        &self,
        execution_id: &str,
        step_id: &str,
        step_name: &str,
        agent: &str,
    ) -> Result<()> {
        debug!(execution_id, step_id, agent, "Starting step");
        self.with_execution(execution_id, |e| e.start_step(step_id, step_name, agent))
            .await
    }

    pub async fn record_attempt(
        &self,
        execution_id: &str,
        step_id: &str,
        attempt: StepAttempt,
    ) -> Result<()> {
        self.with_execution(execution_id, |e| e.record_attempt(step_id, attempt))
            .await
    }

    pub async fn complete_step(
        &self,
        execution_id: &str,
        step_id: &str,
        outputs: Vec<String>,
        validation_passed: bool,
        validation_errors: Vec<String>,
    ) -> Result<()> {
        debug!(execution_id, step_id, validation_passed, "Step completed");
        self.with_execution(execution_id, |e| {
            e.complete_step(step_id, outputs, validation_passed, validation_errors)
        })
        .await
    }

    pub async fn fail_step(
        &self,
        execution_id: &str,
        step_id: &str,
        error_message: &str,
        validation_errors: Vec<String>,
    ) -> Result<()> {
        debug!(execution_id, step_id, error = error_message, "Step failed");
        self.with_execution(execution_id, |e| {
            e.fail_step(step_id, error_message, validation_errors)
        })
        .await
    }

    pub async fn skip_step(
        &self,
        execution_id: &str,
        step_id: &str,
        step_name: &str,
        agent: &str,
        reason: &str,
    ) -> Result<()> {
        debug!(execution_id, step_id, reason, "Step skipped");
        self.with_execution(execution_id, |e| {
            e.skip_step(step_id, step_name, agent, reason)
        })
        .await
    }

    pub async fn record_quality_gate(
        &self,
        execution_id: &str,
        gate_name: &str,
        passed: bool,
    ) -> Result<()> {
        self.with_execution(execution_id, |e| e.record_quality_gate(gate_name, passed))
            .await
    }

    pub async fn record_abort(&self, execution_id: &str, reason: &str) -> Result<()> {
        self.with_execution(execution_id, |e| e.record_abort(reason))
            .await
    }

    pub async fn record_user_intervention(&self, execution_id: &str) -> Result<()> {
        self.with_execution(execution_id, |e| e.record_user_intervention())
            .await
    }

    /// Copy of a running execution
    pub async fn snapshot(&self, execution_id: &str) -> Option<WorkflowExecution> {
        self.active.read().await.get(execution_id).cloned()
    }

    pub async fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.active.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Move the execution out of the live table, finalize it and archive it.
    ///
    /// An archive failure is logged and reported through `archived`; the
    /// finalized record is still returned so callers can summarize it.
    pub async fn complete_execution(&self, execution_id: &str) -> Result<FinalizedExecution> {
        let mut execution = self
            .active
            .write()
            .await
            .remove(execution_id)
            .ok_or_else(|| Error::not_found("WorkflowExecution", execution_id))?;
        let status = execution.finalize()?;

        let archived = match self.archive.persist(&execution).await {
            Ok(()) => true,
            Err(e) => {
                error!(
                    execution_id,
                    "Failed to persist execution record: {}", e
                );
                false
            }
        };
        info!(
            execution_id,
            status = %status,
            completed = execution.completed_steps,
            failed = execution.failed_steps,
            skipped = execution.skipped_steps,
            duration_secs = execution.duration_secs,
            "Workflow execution finished"
        );
        Ok(FinalizedExecution {
            execution,
            archived,
        })
    }
}
