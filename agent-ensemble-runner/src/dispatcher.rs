//! Ad hoc task dispatch
//!
//! Classifies a task, selects agents for it and runs them outside any
//! template: primary assignments one after another, then supporting and
//! optional assignments concurrently when the task is parallelizable.
//! Every assignment becomes one step of an `ad-hoc` execution record so the
//! learning pass can mine ad hoc work too. Each assignment's outcome is also
//! folded into the agent metrics and the skill insights.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use agent_ensemble_core::agent::TaskOutcome;
use agent_ensemble_core::directory::AgentDirectory;
use agent_ensemble_core::execution::{StepAttempt, WorkflowExecution};
use agent_ensemble_core::insights::{InsightRecord, InsightTracker};
use agent_ensemble_core::orchestration::{
    AgentInvoker, ExecutionTracker, InvocationRequest, PromptComposer, PromptContext,
};
use agent_ensemble_core::selection::{AgentAssignment, AgentSelector, AssignmentPriority};
use agent_ensemble_core::task::TaskAnalysis;

use crate::{Error, Result};

/// Workflow name under which ad hoc dispatches are recorded
pub const AD_HOC_WORKFLOW: &str = "ad-hoc";
const AD_HOC_VERSION: &str = "1.0.0";

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub workspace_root: PathBuf,
    pub timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("workspace"),
            timeout_secs: 300,
        }
    }
}

/// What one assigned agent did
#[derive(Debug, Clone, Serialize)]
pub struct AssignmentResult {
    pub agent: String,
    pub priority: AssignmentPriority,
    pub confidence: f64,
    pub success: bool,
    pub error: Option<String>,
    pub files_created: Vec<String>,
    pub duration_secs: f64,
    pub tokens: u64,
    pub cost: f64,
    /// Instructions the agent was given
    #[serde(skip)]
    pub instructions: String,
}

/// Outcome of one dispatch
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub analysis: TaskAnalysis,
    pub results: Vec<AssignmentResult>,
    /// Every primary assignment succeeded
    pub success: bool,
    pub execution: WorkflowExecution,
    pub archived: bool,
    pub working_directory: PathBuf,
}

impl DispatchReport {
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!(
                "Ad hoc dispatch [{}] - {}",
                self.execution.execution_id,
                if self.success { "succeeded" } else { "failed" }
            ),
            format!("Task: {}", self.execution.task_description),
            format!(
                "Type: {}, complexity: {}",
                self.analysis.task_type, self.analysis.complexity
            ),
        ];
        for result in &self.results {
            let mut line = format!(
                "  - {} ({}, confidence {:.2}) {} in {:.1}s",
                result.agent,
                result.priority,
                result.confidence,
                if result.success { "ok" } else { "failed" },
                result.duration_secs
            );
            if let Some(error) = &result.error {
                line.push_str(&format!(": {}", error));
            }
            lines.push(line);
        }
        lines.push(format!("Working directory: {}", self.working_directory.display()));
        lines.join("\n")
    }
}

struct Invocation<'a> {
    execution_id: &'a str,
    task: &'a str,
    working_dir: &'a Path,
    previous_results: Vec<String>,
}

/// Runs selected agents for a task without a template
pub struct TaskDispatcher {
    directory: AgentDirectory,
    selector: AgentSelector,
    invoker: Arc<dyn AgentInvoker>,
    tracker: ExecutionTracker,
    composer: PromptComposer,
    insights: InsightTracker,
    config: DispatchConfig,
}

impl TaskDispatcher {
    pub fn new(
        directory: AgentDirectory,
        selector: AgentSelector,
        invoker: Arc<dyn AgentInvoker>,
        tracker: ExecutionTracker,
        config: DispatchConfig,
    ) -> Result<Self> {
        Ok(Self {
            directory,
            selector,
            invoker,
            tracker,
            composer: PromptComposer::new()?,
            insights: InsightTracker::new(),
            config,
        })
    }

    pub fn with_insights(mut self, insights: InsightTracker) -> Self {
        self.insights = insights;
        self
    }

    pub fn selector(&self) -> &AgentSelector {
        &self.selector
    }

    /// Classify, select and run agents for `task`.
    ///
    /// Individual invocation failures are recorded, never propagated; metrics
    /// and insights are folded in one assignment at a time after every
    /// invocation has finished.
    pub async fn dispatch(
        &self,
        task: &str,
        max_agents: usize,
        project_path: Option<&Path>,
    ) -> Result<DispatchReport> {
        let (analysis, assignments) = self
            .selector
            .select_for_task(&self.directory, task, max_agents)
            .await;
        if assignments.is_empty() {
            return Err(Error::NoAgentsAvailable);
        }
        info!(
            task_type = %analysis.task_type,
            agents = assignments.len(),
            parallel = analysis.parallelizable,
            "Dispatching ad hoc task"
        );

        let project = project_path.map(|p| p.display().to_string());
        let execution_id = self
            .tracker
            .start_execution(
                AD_HOC_WORKFLOW,
                AD_HOC_VERSION,
                task,
                assignments.len(),
                project.as_deref(),
            )
            .await;
        let working_dir = match project_path {
            Some(path) => path.to_path_buf(),
            None => self.config.workspace_root.join(&execution_id),
        };

        let (primary, others): (Vec<&AgentAssignment>, Vec<&AgentAssignment>) = assignments
            .iter()
            .partition(|a| a.priority == AssignmentPriority::Primary);

        let mut results: Vec<AssignmentResult> = Vec::with_capacity(assignments.len());
        for assignment in primary {
            let previous_results = results.iter().map(describe).collect();
            let invocation = Invocation {
                execution_id: &execution_id,
                task,
                working_dir: &working_dir,
                previous_results,
            };
            results.push(self.run_assignment(assignment, invocation).await);
        }

        let primary_results: Vec<String> = results.iter().map(describe).collect();
        if analysis.parallelizable {
            let runs = others.iter().map(|assignment| {
                let invocation = Invocation {
                    execution_id: &execution_id,
                    task,
                    working_dir: &working_dir,
                    previous_results: primary_results.clone(),
                };
                self.run_assignment(assignment, invocation)
            });
            results.extend(join_all(runs).await);
        } else {
            for assignment in others {
                let invocation = Invocation {
                    execution_id: &execution_id,
                    task,
                    working_dir: &working_dir,
                    previous_results: results.iter().map(describe).collect(),
                };
                results.push(self.run_assignment(assignment, invocation).await);
            }
        }

        let task_type = analysis.task_type.to_string();
        for result in &results {
            let outcome = TaskOutcome::new(result.success, result.tokens, result.cost, result.duration_secs);
            if let Err(e) = self.directory.update_metrics(&result.agent, outcome).await {
                warn!("Failed to update metrics for {}: {}", result.agent, e);
            }

            let mut record =
                InsightRecord::new(&execution_id, &result.agent, &task_type, task, result.success)
                    .with_usage(result.duration_secs, result.tokens, result.cost)
                    .with_prompt(result.instructions.as_str());
            if let Some(error) = &result.error {
                record = record.with_error(error.as_str());
            }
            self.insights.record(record).await;
        }

        let success = results
            .iter()
            .filter(|r| r.priority == AssignmentPriority::Primary)
            .all(|r| r.success);
        let finalized = self.tracker.complete_execution(&execution_id).await?;
        info!(
            execution_id = %execution_id,
            success,
            status = %finalized.status(),
            "Ad hoc dispatch finished"
        );

        Ok(DispatchReport {
            analysis,
            results,
            success,
            archived: finalized.archived,
            execution: finalized.execution,
            working_directory: working_dir,
        })
    }

    async fn run_assignment(
        &self,
        assignment: &AgentAssignment,
        invocation: Invocation<'_>,
    ) -> AssignmentResult {
        let agent = &assignment.agent;
        let step_id = agent.name.as_str();
        let mut result = AssignmentResult {
            agent: agent.name.clone(),
            priority: assignment.priority,
            confidence: assignment.confidence,
            success: false,
            error: None,
            files_created: Vec::new(),
            duration_secs: 0.0,
            tokens: 0,
            cost: 0.0,
            instructions: String::new(),
        };

        let step_name = format!("{} ({})", agent.name, assignment.priority);
        if let Err(e) = self
            .tracker
            .start_step(invocation.execution_id, step_id, &step_name, &agent.name)
            .await
        {
            warn!("Failed to record step start for {}: {}", agent.name, e);
        }

        let ctx = PromptContext::new(invocation.task, invocation.working_dir)
            .with_previous_results(invocation.previous_results)
            .with_role_focus();
        let started_at = Utc::now();
        let outcome = match self.composer.compose(agent, &ctx) {
            Ok(instructions) => {
                debug!(agent = %agent.name, "Invoking agent");
                result.instructions.clone_from(&instructions);
                self.invoker
                    .invoke(InvocationRequest {
                        agent_name: agent.name.clone(),
                        tools: agent.tools.clone(),
                        model: agent.model.clone(),
                        instructions,
                        working_directory: invocation.working_dir.to_path_buf(),
                        timeout: Duration::from_secs(self.config.timeout_secs),
                    })
                    .await
            }
            Err(e) => Err(e),
        };
        let ended_at = Utc::now();
        let mut attempt = StepAttempt::new(1, started_at, ended_at);

        match outcome {
            Ok(outcome) => {
                result.tokens = outcome.usage.total_tokens();
                result.cost = outcome.usage.cost_usd;
                result.duration_secs = outcome.duration_secs();
                attempt = attempt.with_usage(result.tokens, result.cost);
                if outcome.success {
                    result.success = true;
                    result.files_created = outcome.files_created;
                } else {
                    result.error = Some(outcome.failure_message());
                }
            }
            Err(e) => {
                result.duration_secs = attempt.duration_secs;
                result.error = Some(e.to_string());
            }
        }
        if let Some(error) = &result.error {
            attempt = attempt.failed(error.clone());
        }

        let recorded = async {
            self.tracker
                .record_attempt(invocation.execution_id, step_id, attempt)
                .await?;
            match &result.error {
                None => {
                    self.tracker
                        .complete_step(
                            invocation.execution_id,
                            step_id,
                            result.files_created.clone(),
                            true,
                            Vec::new(),
                        )
                        .await?
                }
                Some(error) => {
                    self.tracker
                        .fail_step(invocation.execution_id, step_id, error, Vec::new())
                        .await?
                }
            }
            Ok::<_, agent_ensemble_core::Error>(())
        };
        if let Err(e) = recorded.await {
            warn!("Failed to record outcome for {}: {}", agent.name, e);
        }

        if result.success {
            info!(agent = %agent.name, files = result.files_created.len(), "Agent completed");
        } else {
            warn!(agent = %agent.name, error = ?result.error, "Agent failed");
        }
        result
    }
}

fn describe(result: &AssignmentResult) -> String {
    if !result.success {
        return format!("{} failed", result.agent);
    }
    if result.files_created.is_empty() {
        format!("{} completed", result.agent)
    } else {
        format!("{} completed, produced: {}", result.agent, result.files_created.join(", "))
    }
}
