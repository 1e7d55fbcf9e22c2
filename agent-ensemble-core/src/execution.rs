//! Workflow execution records
//!
//! A [`WorkflowExecution`] is mutable only while its run is in progress.
//! Steps move through `pending → running → {completed, failed, skipped}`;
//! every transition is checked. A retried step keeps a single
//! [`StepExecution`] whose `attempts` list holds one entry per invocation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Partial,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Partial => "partial",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lenient top-level verdict.
///
/// Successful when nothing failed, or when at least one step completed and
/// not every step failed. An empty or all-skipped run is successful.
pub fn overall_success(completed_steps: usize, failed_steps: usize, total_steps: usize) -> bool {
    failed_steps == 0 || (completed_steps > 0 && failed_steps < total_steps)
}

fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds() as f64 / 1000.0
}

/// One invocation of a step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepAttempt {
    /// 1-based
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub tokens: u64,
    #[serde(default)]
    pub cost: f64,
}

impl StepAttempt {
    pub fn new(attempt: u32, started_at: DateTime<Utc>, ended_at: DateTime<Utc>) -> Self {
        Self {
            attempt,
            started_at,
            ended_at,
            duration_secs: seconds_between(started_at, ended_at),
            success: true,
            error: None,
            tokens: 0,
            cost: 0.0,
        }
    }

    pub fn failed<S: Into<String>>(mut self, error: S) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }

    pub fn with_usage(mut self, tokens: u64, cost: f64) -> Self {
        self.tokens = tokens;
        self.cost = cost;
        self
    }
}

/// Record of one attempted step within one execution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepExecution {
    pub step_id: String,
    pub step_name: String,
    pub agent: String,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_secs: f64,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default = "default_true")]
    pub validation_passed: bool,
    #[serde(default)]
    pub validation_errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub attempts: Vec<StepAttempt>,
}

fn default_true() -> bool {
    true
}

impl StepExecution {
    pub fn new<S1, S2, S3>(step_id: S1, step_name: S2, agent: S3) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        Self {
            step_id: step_id.into(),
            step_name: step_name.into(),
            agent: agent.into(),
            status: StepStatus::Pending,
            started_at: None,
            ended_at: None,
            duration_secs: 0.0,
            outputs: Vec::new(),
            validation_passed: true,
            validation_errors: Vec::new(),
            error_message: None,
            attempts: Vec::new(),
        }
    }

    fn transition(&mut self, allowed_from: &[StepStatus], to: StepStatus) -> Result<()> {
        if !allowed_from.contains(&self.status) {
            return Err(Error::state_transition(format!(
                "Step '{}' cannot move from {:?} to {:?}",
                self.step_id, self.status, to
            )));
        }
        self.status = to;
        Ok(())
    }

    fn stamp_end(&mut self) {
        let now = Utc::now();
        self.ended_at = Some(now);
        self.duration_secs = self
            .started_at
            .map(|start| seconds_between(start, now))
            .unwrap_or(0.0);
    }

    pub fn start(&mut self) -> Result<()> {
        self.transition(&[StepStatus::Pending], StepStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn complete(
        &mut self,
        outputs: Vec<String>,
        validation_passed: bool,
        validation_errors: Vec<String>,
    ) -> Result<()> {
        self.transition(&[StepStatus::Running], StepStatus::Completed)?;
        self.stamp_end();
        self.outputs = outputs;
        self.validation_passed = validation_passed;
        self.validation_errors = validation_errors;
        Ok(())
    }

    pub fn fail<S: Into<String>>(&mut self, error_message: S) -> Result<()> {
        self.transition(&[StepStatus::Running], StepStatus::Failed)?;
        self.stamp_end();
        self.error_message = Some(error_message.into());
        Ok(())
    }

    /// Fail a step whose last attempt produced artifacts that did not validate
    pub fn fail_validation<S: Into<String>>(
        &mut self,
        error_message: S,
        validation_errors: Vec<String>,
    ) -> Result<()> {
        self.fail(error_message)?;
        self.validation_passed = validation_errors.is_empty();
        self.validation_errors = validation_errors;
        Ok(())
    }

    pub fn skip<S: Into<String>>(&mut self, reason: S) -> Result<()> {
        self.transition(&[StepStatus::Pending, StepStatus::Running], StepStatus::Skipped)?;
        self.stamp_end();
        self.error_message = Some(reason.into());
        Ok(())
    }

    pub fn record_attempt(&mut self, attempt: StepAttempt) -> Result<()> {
        if self.status != StepStatus::Running {
            return Err(Error::state_transition(format!(
                "Step '{}' is not running; cannot record attempt {}",
                self.step_id, attempt.attempt
            )));
        }
        self.attempts.push(attempt);
        Ok(())
    }

    pub fn total_tokens(&self) -> u64 {
        self.attempts.iter().map(|a| a.tokens).sum()
    }

    pub fn total_cost(&self) -> f64 {
        self.attempts.iter().map(|a| a.cost).sum()
    }
}

/// One concrete run of a template
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowExecution {
    pub execution_id: String,
    pub workflow_name: String,
    pub workflow_version: String,
    pub task_description: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_secs: f64,
    pub steps: Vec<StepExecution>,
    pub total_steps: usize,
    pub completed_steps: usize,
    pub failed_steps: usize,
    pub skipped_steps: usize,
    #[serde(default)]
    pub quality_gates_passed: Vec<String>,
    #[serde(default)]
    pub quality_gates_failed: Vec<String>,
    #[serde(default)]
    pub user_interventions: u32,
    #[serde(default)]
    pub outputs_generated: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_path: Option<String>,
    /// Set when the run stopped before its last step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

impl WorkflowExecution {
    /// Start a running execution for a template with `total_steps` steps
    pub fn new<S1, S2, S3>(
        workflow_name: S1,
        workflow_version: S2,
        task_description: S3,
        total_steps: usize,
    ) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        let now = Utc::now();
        Self {
            execution_id: Self::generate_id(now),
            workflow_name: workflow_name.into(),
            workflow_version: workflow_version.into(),
            task_description: task_description.into(),
            status: ExecutionStatus::Running,
            started_at: now,
            ended_at: None,
            duration_secs: 0.0,
            steps: Vec::new(),
            total_steps,
            completed_steps: 0,
            failed_steps: 0,
            skipped_steps: 0,
            quality_gates_passed: Vec::new(),
            quality_gates_failed: Vec::new(),
            user_interventions: 0,
            outputs_generated: Vec::new(),
            project_path: None,
            aborted: None,
        }
    }

    pub fn with_project_path<S: Into<String>>(mut self, path: S) -> Self {
        self.project_path = Some(path.into());
        self
    }

    /// Sortable timestamp id with a random suffix, e.g. `20260101_120000_123456_1a2b3c4d`
    pub fn generate_id(now: DateTime<Utc>) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{}_{}", now.format("%Y%m%d_%H%M%S_%6f"), &suffix[..8])
    }

    pub fn is_finalized(&self) -> bool {
        self.status != ExecutionStatus::Running
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_finalized() {
            return Err(Error::state_transition(format!(
                "Execution {} is already finalized",
                self.execution_id
            )));
        }
        Ok(())
    }

    pub fn step(&self, step_id: &str) -> Option<&StepExecution> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    fn step_mut(&mut self, step_id: &str) -> Result<&mut StepExecution> {
        let execution_id = self.execution_id.clone();
        self.steps
            .iter_mut()
            .find(|s| s.step_id == step_id)
            .ok_or_else(|| Error::not_found("StepExecution", format!("{}/{}", execution_id, step_id)))
    }

    fn add_step(&mut self, step_id: &str, step_name: &str, agent: &str) -> Result<&mut StepExecution> {
        self.ensure_running()?;
        if self.step(step_id).is_some() {
            return Err(Error::state_transition(format!(
                "Step '{}' already has a record in execution {}",
                step_id, self.execution_id
            )));
        }
        self.steps
            .push(StepExecution::new(step_id, step_name, agent));
        self.step_mut(step_id)
    }

    pub fn start_step(&mut self, step_id: &str, step_name: &str, agent: &str) -> Result<()> {
        self.add_step(step_id, step_name, agent)?.start()
    }

    pub fn record_attempt(&mut self, step_id: &str, attempt: StepAttempt) -> Result<()> {
        self.ensure_running()?;
        self.step_mut(step_id)?.record_attempt(attempt)
    }

    pub fn complete_step(
        &mut self,
        step_id: &str,
        outputs: Vec<String>,
        validation_passed: bool,
        validation_errors: Vec<String>,
    ) -> Result<()> {
        self.ensure_running()?;
        self.step_mut(step_id)?
            .complete(outputs.clone(), validation_passed, validation_errors)?;
        self.completed_steps += 1;
        for output in outputs {
            if !self.outputs_generated.contains(&output) {
                self.outputs_generated.push(output);
            }
        }
        Ok(())
    }

    pub fn fail_step(
        &mut self,
        step_id: &str,
        error_message: &str,
        validation_errors: Vec<String>,
    ) -> Result<()> {
        self.ensure_running()?;
        self.step_mut(step_id)?
            .fail_validation(error_message, validation_errors)?;
        self.failed_steps += 1;
        Ok(())
    }

    /// Skip a step. A step that was never started gets a fresh record.
    pub fn skip_step(&mut self, step_id: &str, step_name: &str, agent: &str, reason: &str) -> Result<()> {
        self.ensure_running()?;
        match self.steps.iter_mut().find(|s| s.step_id == step_id) {
            Some(step) => step.skip(reason)?,
            None => self.add_step(step_id, step_name, agent)?.skip(reason)?,
        }
        self.skipped_steps += 1;
        Ok(())
    }

    pub fn record_quality_gate(&mut self, gate_name: &str, passed: bool) -> Result<()> {
        self.ensure_running()?;
        if passed {
            self.quality_gates_passed.push(gate_name.to_string());
        } else {
            self.quality_gates_failed.push(gate_name.to_string());
        }
        Ok(())
    }

    pub fn record_user_intervention(&mut self) -> Result<()> {
        self.ensure_running()?;
        self.user_interventions += 1;
        Ok(())
    }

    /// Mark the run as stopped early; it can then never finalize as
    /// completed
    pub fn record_abort<S: Into<String>>(&mut self, reason: S) -> Result<()> {
        self.ensure_running()?;
        self.aborted = Some(reason.into());
        Ok(())
    }

    /// Lenient verdict over the current counters
    pub fn is_successful(&self) -> bool {
        overall_success(self.completed_steps, self.failed_steps, self.total_steps)
    }

    /// Terminal status implied by the current counters
    pub fn terminal_status(&self) -> ExecutionStatus {
        if self.aborted.is_some() && self.failed_steps == 0 {
            return if self.completed_steps > 0 {
                ExecutionStatus::Partial
            } else {
                ExecutionStatus::Failed
            };
        }
        if self.failed_steps == 0 {
            ExecutionStatus::Completed
        } else if self.completed_steps > 0 && self.is_successful() {
            ExecutionStatus::Partial
        } else {
            ExecutionStatus::Failed
        }
    }

    /// Stamp the end time and terminal status. Allowed exactly once.
    pub fn finalize(&mut self) -> Result<ExecutionStatus> {
        self.ensure_running()?;
        let now = Utc::now();
        self.ended_at = Some(now);
        self.duration_secs = seconds_between(self.started_at, now);
        self.status = self.terminal_status();
        Ok(self.status)
    }

    /// Completed-step agents in execution order
    pub fn completed_agent_sequence(&self) -> Vec<String> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .map(|s| s.agent.clone())
            .collect()
    }

    /// Plain-text report of what ran, what failed and what was produced
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!(
                "Workflow {} v{} [{}] - {}",
                self.workflow_name, self.workflow_version, self.execution_id, self.status
            ),
            format!("Task: {}", self.task_description),
            format!(
                "Steps: {} completed, {} failed, {} skipped of {}",
                self.completed_steps, self.failed_steps, self.skipped_steps, self.total_steps
            ),
        ];
        for step in &self.steps {
            let mut line = format!(
                "  - {} ({}) {:?} in {:.1}s",
                step.step_name, step.agent, step.status, step.duration_secs
            );
            if step.attempts.len() > 1 {
                line.push_str(&format!(" after {} attempts", step.attempts.len()));
            }
            if let Some(error) = &step.error_message {
                line.push_str(&format!(": {}", error));
            }
            lines.push(line);
        }
        if !self.quality_gates_failed.is_empty() {
            lines.push(format!(
                "Failed gates: {}",
                self.quality_gates_failed.join(", ")
            ));
        }
        if !self.outputs_generated.is_empty() {
            lines.push(format!("Outputs: {}", self.outputs_generated.join(", ")));
        }
        lines.join("\n")
    }

    /// `<date>_<workflow>_<id>.json`
    pub fn history_file_name(&self) -> String {
        let workflow: String = self
            .workflow_name
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
            .collect();
        format!(
            "{}_{}_{}.json",
            self.started_at.format("%Y-%m-%d"),
            workflow,
            self.execution_id
        )
    }
}
