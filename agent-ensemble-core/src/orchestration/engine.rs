//! Workflow execution engine
//!
//! Drives a template's steps in list order through
//! `pending → running → {completed, failed, skipped}`, retrying failed
//! invocations with the previous error and any feedback artifact prepended,
//! evaluating quality gates after completed steps and finally handing the
//! execution to the tracker for finalization and archiving.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::agent::{Agent, TaskOutcome};
use crate::directory::AgentDirectory;
use crate::execution::{StepAttempt, WorkflowExecution};
use crate::insights::{InsightRecord, InsightTracker};
use crate::orchestration::executor::{AgentInvoker, InvocationRequest};
use crate::orchestration::gates::{evaluate_gate, Approver, AutoApprover, GateContext};
use crate::orchestration::hooks::{HookHandler, HookPhase, LoggingHookHandler};
use crate::orchestration::prompt::{load_feedback, PromptComposer, PromptContext, RetryContext};
use crate::orchestration::tracker::ExecutionTracker;
use crate::orchestration::validation::{validate_outputs, QA_REPORT};
use crate::task::TaskClassifier;
use crate::workflow::{HookAction, WorkflowStep, WorkflowTemplate};
use crate::{Error, Result};

/// Engine-wide execution settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Parent of per-execution working directories
    pub workspace_root: PathBuf,
    /// Applies to steps without their own timeout
    pub default_step_timeout_secs: u64,
    pub skip_optional_steps: bool,
    /// Pause between retry attempts
    pub retry_delay_ms: u64,
    /// Artifact read into the retry instructions when a step names none
    pub feedback_artifact: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("workspace"),
            default_step_timeout_secs: 300,
            skip_optional_steps: false,
            retry_delay_ms: 0,
            feedback_artifact: Some(QA_REPORT.to_string()),
        }
    }
}

/// Per-run options
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Run inside an existing project instead of a fresh workspace directory
    pub project_path: Option<PathBuf>,
}

/// Why a run stopped before the last step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbortReason {
    RequiredStepFailed { step_id: String },
    RequiredGateFailed { gate: String },
    Internal { message: String },
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::RequiredStepFailed { step_id } => {
                write!(f, "required step '{}' failed", step_id)
            }
            AbortReason::RequiredGateFailed { gate } => {
                write!(f, "required quality gate '{}' failed", gate)
            }
            AbortReason::Internal { message } => write!(f, "internal error: {}", message),
        }
    }
}

/// Finalized execution plus the top-level verdict
#[derive(Debug, Clone)]
pub struct WorkflowRunReport {
    pub execution: WorkflowExecution,
    /// Lenient verdict; see [`crate::execution::overall_success`]
    pub success: bool,
    pub archived: bool,
    pub aborted_by: Option<AbortReason>,
    pub working_directory: PathBuf,
}

impl WorkflowRunReport {
    pub fn summary(&self) -> String {
        let mut summary = self.execution.summary();
        if let Some(reason) = &self.aborted_by {
            summary.push_str(&format!("Stopped early: {}\n", reason));
        }
        summary
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum StepResult {
    Completed { outputs: Vec<String> },
    Failed,
    Skipped,
}

struct StepRun<'a> {
    execution_id: &'a str,
    task: &'a str,
    /// Classified type of `task`, the key for skill insights
    task_type: &'a str,
    working_dir: &'a Path,
    previous_results: &'a [String],
}

/// Runs workflow templates against the agent directory
pub struct WorkflowEngine {
    directory: AgentDirectory,
    invoker: Arc<dyn AgentInvoker>,
    tracker: ExecutionTracker,
    approver: Arc<dyn Approver>,
    hooks: Arc<dyn HookHandler>,
    composer: PromptComposer,
    classifier: TaskClassifier,
    insights: InsightTracker,
    config: EngineConfig,
}

/// How one step ended, as folded into metrics and insights
struct StepTally<'a> {
    success: bool,
    tokens: u64,
    cost: f64,
    started: chrono::DateTime<Utc>,
    error: Option<&'a str>,
    prompt: &'a str,
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl WorkflowEngine {
    pub fn new(
        directory: AgentDirectory,
        invoker: Arc<dyn AgentInvoker>,
        tracker: ExecutionTracker,
        config: EngineConfig,
    ) -> Result<Self> {
        Ok(Self {
            directory,
            invoker,
            tracker,
            approver: Arc::new(AutoApprover),
            hooks: Arc::new(LoggingHookHandler),
            composer: PromptComposer::new()?,
            classifier: TaskClassifier::new(),
            insights: InsightTracker::new(),
            config,
        })
    }

    /// Fold step outcomes into this shared insight ledger
    pub fn with_insights(mut self, insights: InsightTracker) -> Self {
        self.insights = insights;
        self
    }

    pub fn with_approver(mut self, approver: Arc<dyn Approver>) -> Self {
        self.approver = approver;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn HookHandler>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn tracker(&self) -> &ExecutionTracker {
        &self.tracker
    }

    pub fn insights(&self) -> &InsightTracker {
        &self.insights
    }

    /// Run `template` for `task` to a terminal state.
    ///
    /// Step, gate and invocation failures never surface as `Err`; they are
    /// recorded in the returned execution. `Err` is reserved for failing to
    /// finalize the execution record itself.
    pub async fn execute(
        &self,
        template: &WorkflowTemplate,
        task: &str,
        options: RunOptions,
    ) -> Result<WorkflowRunReport> {
        let project_path = options
            .project_path
            .as_ref()
            .map(|p| p.display().to_string());
        let execution_id = self
            .tracker
            .start_execution(
                &template.name,
                &template.version,
                task,
                template.steps.len(),
                project_path.as_deref(),
            )
            .await;
        let working_dir = options
            .project_path
            .unwrap_or_else(|| self.config.workspace_root.join(&execution_id));
        if let Err(e) = tokio::fs::create_dir_all(&working_dir).await {
            warn!(
                execution_id = %execution_id,
                "Failed to create working directory {}: {}",
                working_dir.display(),
                e
            );
        }

        self.run_hooks(HookPhase::PreWorkflow, &execution_id, &template.hooks.pre_workflow)
            .await;

        let aborted_by = match self
            .run_steps(template, task, &execution_id, &working_dir)
            .await
        {
            Ok(reason) => reason,
            Err(e) => {
                error!(execution_id = %execution_id, "Workflow run interrupted: {}", e);
                Some(AbortReason::Internal {
                    message: e.to_string(),
                })
            }
        };

        if let Some(reason) = &aborted_by {
            warn!(execution_id = %execution_id, "Stopping workflow: {}", reason);
            self.tracker
                .record_abort(&execution_id, &reason.to_string())
                .await?;
            self.run_hooks(HookPhase::OnError, &execution_id, &template.hooks.on_error)
                .await;
        }
        self.run_hooks(HookPhase::PostWorkflow, &execution_id, &template.hooks.post_workflow)
            .await;

        let finalized = self.tracker.complete_execution(&execution_id).await?;
        Ok(WorkflowRunReport {
            success: finalized.execution.is_successful(),
            execution: finalized.execution,
            archived: finalized.archived,
            aborted_by,
            working_directory: working_dir,
        })
    }

    async fn run_hooks(&self, phase: HookPhase, execution_id: &str, hooks: &[HookAction]) {
        for hook in hooks {
            if let Err(e) = self.hooks.run_hook(phase, execution_id, hook).await {
                warn!(execution_id, phase = %phase, "Hook '{}' failed: {}", hook.action, e);
            }
        }
    }

    async fn run_steps(
        &self,
        template: &WorkflowTemplate,
        task: &str,
        execution_id: &str,
        working_dir: &Path,
    ) -> Result<Option<AbortReason>> {
        let mut previous_results = Vec::new();
        let total = template.steps.len();
        let task_type = self.classifier.classify(task).task_type.to_string();

        for (index, step) in template.steps.iter().enumerate() {
            info!(
                execution_id,
                step_id = %step.id,
                agent = %step.agent,
                required = step.required,
                "Step {}/{}: {}",
                index + 1,
                total,
                step.display_name()
            );
            if !step.depends_on.is_empty() {
                debug!(step_id = %step.id, "Depends on: {}", step.depends_on.join(", "));
            }

            let run = StepRun {
                execution_id,
                task,
                task_type: &task_type,
                working_dir,
                previous_results: &previous_results,
            };
            let outputs = match self.run_step(step, &run).await? {
                StepResult::Completed { outputs } => outputs,
                StepResult::Skipped => continue,
                StepResult::Failed if step.required => {
                    return Ok(Some(AbortReason::RequiredStepFailed {
                        step_id: step.id.clone(),
                    }));
                }
                StepResult::Failed => continue,
            };

            previous_results.push(if outputs.is_empty() {
                format!("{} ({}) completed", step.display_name(), step.agent)
            } else {
                format!(
                    "{} ({}) completed, produced: {}",
                    step.display_name(),
                    step.agent,
                    outputs.join(", ")
                )
            });

            if let Some(reason) = self.check_gates(template, step, execution_id, working_dir).await? {
                return Ok(Some(reason));
            }
        }
        Ok(None)
    }

    async fn check_gates(
        &self,
        template: &WorkflowTemplate,
        step: &WorkflowStep,
        execution_id: &str,
        working_dir: &Path,
    ) -> Result<Option<AbortReason>> {
        for gate in template.gates_after(&step.id) {
            let Some(snapshot) = self.tracker.snapshot(execution_id).await else {
                return Err(Error::not_found("WorkflowExecution", execution_id));
            };
            let ctx = GateContext {
                execution: &snapshot,
                step: snapshot.step(&step.id),
                expected_outputs: &step.outputs,
                working_dir,
            };
            let decision = evaluate_gate(gate, &ctx, self.approver.as_ref()).await;
            if decision.manual {
                self.tracker.record_user_intervention(execution_id).await?;
            }
            self.tracker
                .record_quality_gate(execution_id, &gate.name, decision.passed)
                .await?;

            if decision.passed {
                info!(execution_id, gate = %gate.name, "Quality gate passed");
            } else if gate.required {
                return Ok(Some(AbortReason::RequiredGateFailed {
                    gate: gate.name.clone(),
                }));
            } else {
                warn!(execution_id, gate = %gate.name, "Optional quality gate failed");
            }
        }
        Ok(None)
    }

    async fn run_step(&self, step: &WorkflowStep, run: &StepRun<'_>) -> Result<StepResult> {
        let execution_id = run.execution_id;

        if !step.required && self.config.skip_optional_steps {
            self.tracker
                .skip_step(
                    execution_id,
                    &step.id,
                    step.display_name(),
                    &step.agent,
                    "Optional step skipped by configuration",
                )
                .await?;
            return Ok(StepResult::Skipped);
        }
        if !self.approver.approve_step(step).await {
            self.tracker
                .skip_step(
                    execution_id,
                    &step.id,
                    step.display_name(),
                    &step.agent,
                    "Step not approved",
                )
                .await?;
            return Ok(StepResult::Skipped);
        }

        self.tracker
            .start_step(execution_id, &step.id, step.display_name(), &step.agent)
            .await?;

        let Some(agent) = self.directory.get(&step.agent).await else {
            let message = format!("Agent '{}' not found", step.agent);
            warn!(execution_id, step_id = %step.id, "{}", message);
            self.tracker
                .fail_step(execution_id, &step.id, &message, Vec::new())
                .await?;
            return Ok(StepResult::Failed);
        };

        let step_started = Utc::now();
        let max_attempts = step.max_retries.saturating_add(1);
        let timeout = Duration::from_secs(
            step.timeout
                .unwrap_or(self.config.default_step_timeout_secs),
        );
        let mut tokens = 0u64;
        let mut cost = 0.0f64;
        let mut retry: Option<RetryContext> = None;
        let mut failure = (String::from("Step was not attempted"), Vec::new());
        let mut prompt = String::new();

        for attempt in 1..=max_attempts {
            let mut ctx = PromptContext::new(run.task, run.working_dir)
                .with_step(step.display_name(), &step.action)
                .with_previous_results(run.previous_results.to_vec());
            if let Some(retry) = retry.take() {
                ctx = ctx.with_retry(retry);
            }

            let started_at = Utc::now();
            let (result, recoverable) = match self.composer.compose(&agent, &ctx) {
                Ok(instructions) => {
                    prompt.clone_from(&instructions);
                    let request = invocation(&agent, instructions, run.working_dir, timeout);
                    match self.invoker.invoke(request).await {
                        Ok(outcome) if outcome.success => {
                            tokens += outcome.usage.total_tokens();
                            cost += outcome.usage.cost_usd;
                            let validation =
                                validate_outputs(&step.validation, run.working_dir, &outcome.files_created)
                                    .await;
                            let record = StepAttempt::new(attempt, started_at, Utc::now())
                                .with_usage(outcome.usage.total_tokens(), outcome.usage.cost_usd);
                            if validation.passed {
                                self.tracker
                                    .record_attempt(execution_id, &step.id, record)
                                    .await?;
                                self.tracker
                                    .complete_step(
                                        execution_id,
                                        &step.id,
                                        outcome.files_created.clone(),
                                        true,
                                        Vec::new(),
                                    )
                                    .await?;
                                info!(
                                    execution_id,
                                    step_id = %step.id,
                                    attempt,
                                    "Step completed"
                                );
                                let tally = StepTally {
                                    success: true,
                                    tokens,
                                    cost,
                                    started: step_started,
                                    error: None,
                                    prompt: &prompt,
                                };
                                self.record_outcome(&agent, run, tally).await;
                                return Ok(StepResult::Completed {
                                    outputs: outcome.files_created,
                                });
                            }
                            let message = validation.message();
                            self.tracker
                                .record_attempt(execution_id, &step.id, record.failed(&message))
                                .await?;
                            ((message, validation.errors), true)
                        }
                        Ok(outcome) => {
                            tokens += outcome.usage.total_tokens();
                            cost += outcome.usage.cost_usd;
                            let message = outcome.failure_message();
                            let record = StepAttempt::new(attempt, started_at, Utc::now())
                                .with_usage(outcome.usage.total_tokens(), outcome.usage.cost_usd)
                                .failed(&message);
                            self.tracker
                                .record_attempt(execution_id, &step.id, record)
                                .await?;
                            ((message, Vec::new()), true)
                        }
                        Err(e) => {
                            let message = e.to_string();
                            let record =
                                StepAttempt::new(attempt, started_at, Utc::now()).failed(&message);
                            self.tracker
                                .record_attempt(execution_id, &step.id, record)
                                .await?;
                            ((message, Vec::new()), e.is_recoverable())
                        }
                    }
                }
                Err(e) => {
                    let message = e.to_string();
                    let record = StepAttempt::new(attempt, started_at, Utc::now()).failed(&message);
                    self.tracker
                        .record_attempt(execution_id, &step.id, record)
                        .await?;
                    ((message, Vec::new()), false)
                }
            };

            warn!(
                execution_id,
                step_id = %step.id,
                attempt,
                max_attempts,
                "Attempt failed: {}",
                result.0
            );
            failure = result;

            if !recoverable || attempt == max_attempts {
                break;
            }
            let artifact = step
                .feedback_from
                .as_deref()
                .or(self.config.feedback_artifact.as_deref());
            let feedback = match artifact {
                Some(name) => load_feedback(run.working_dir, name).await,
                None => None,
            };
            retry = Some(RetryContext {
                attempt: attempt + 1,
                max_attempts,
                previous_error: failure.0.clone(),
                feedback,
            });
            if self.config.retry_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
            }
        }

        let (message, validation_errors) = failure;
        self.tracker
            .fail_step(execution_id, &step.id, &message, validation_errors)
            .await?;
        let tally = StepTally {
            success: false,
            tokens,
            cost,
            started: step_started,
            error: Some(message.as_str()),
            prompt: &prompt,
        };
        self.record_outcome(&agent, run, tally).await;
        Ok(StepResult::Failed)
    }

    async fn record_outcome(&self, agent: &Agent, run: &StepRun<'_>, tally: StepTally<'_>) {
        let duration = (Utc::now() - tally.started).num_milliseconds() as f64 / 1000.0;
        let outcome = TaskOutcome::new(tally.success, tally.tokens, tally.cost, duration);
        if let Err(e) = self.directory.update_metrics(&agent.name, outcome).await {
            warn!(agent = %agent.name, "Failed to update agent metrics: {}", e);
        }

        let mut record = InsightRecord::new(
            run.execution_id,
            agent.name.as_str(),
            run.task_type,
            run.task,
            tally.success,
        )
        .with_usage(duration, tally.tokens, tally.cost)
        .with_prompt(tally.prompt);
        if let Some(error) = tally.error {
            record = record.with_error(error);
        }
        self.insights.record(record).await;
    }
}

pub(crate) fn invocation(
    agent: &Agent,
    instructions: String,
    working_dir: &Path,
    timeout: Duration,
) -> InvocationRequest {
    InvocationRequest {
        agent_name: agent.name.clone(),
        tools: agent.tools.clone(),
        model: agent.model.clone(),
        instructions,
        working_directory: working_dir.to_path_buf(),
        timeout,
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{Script, ScriptedInvoker};
    use super::*;
    use crate::agent::default_roster;
    use crate::execution::{ExecutionStatus, StepStatus};
    use crate::orchestration::tracker::{ExecutionArchive, NullArchive};
    use crate::workflow::{GateKind, QualityGate, SyntaxLanguage, ValidationRule, WorkflowHooks};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn step(id: &str, agent: &str, required: bool) -> WorkflowStep {
        WorkflowStep {
            id: id.to_string(),
            name: format!("Step {}", id),
            agent: agent.to_string(),
            action: format!("Do {}", id),
            required,
            ..WorkflowStep::default()
        }
    }

    fn template(steps: Vec<WorkflowStep>) -> WorkflowTemplate {
        WorkflowTemplate {
            name: "test-flow".to_string(),
            version: "1.0.0".to_string(),
            description: "Test workflow".to_string(),
            steps,
            ..WorkflowTemplate::default()
        }
    }

    struct Harness {
        engine: WorkflowEngine,
        invoker: Arc<ScriptedInvoker>,
        directory: AgentDirectory,
        workspace: TempDir,
    }

    fn harness(invoker: ScriptedInvoker) -> Harness {
        harness_with(invoker, Arc::new(NullArchive), EngineConfig::default())
    }

    fn harness_with(
        invoker: ScriptedInvoker,
        archive: Arc<dyn ExecutionArchive>,
        config: EngineConfig,
    ) -> Harness {
        let workspace = TempDir::new().unwrap();
        let directory = AgentDirectory::from_agents(default_roster());
        let invoker = Arc::new(invoker);
        let engine = WorkflowEngine::new(
            directory.clone(),
            invoker.clone(),
            ExecutionTracker::new(archive),
            EngineConfig {
                workspace_root: workspace.path().to_path_buf(),
                ..config
            },
        )
        .unwrap();
        Harness {
            engine,
            invoker,
            directory,
            workspace: workspace,
        }
    }

    #[derive(Default)]
    struct RecordingHooks {
        calls: Mutex<Vec<(HookPhase, String)>>,
    }

    #[async_trait]
    impl HookHandler for RecordingHooks {
        async fn run_hook(&self, phase: HookPhase, _id: &str, hook: &HookAction) -> Result<()> {
            self.calls.lock().unwrap().push((phase, hook.action.clone()));
            Ok(())
        }
    }

    struct DenySteps(&'static str);

    #[async_trait]
    impl Approver for DenySteps {
        async fn approve_step(&self, step: &WorkflowStep) -> bool {
            step.id != self.0
        }

        async fn approve_gate(&self, _gate: &QualityGate) -> bool {
            true
        }
    }

    #[derive(Default)]
    struct MemoryArchive(Mutex<Vec<WorkflowExecution>>);

    #[async_trait]
    impl ExecutionArchive for MemoryArchive {
        async fn persist(&self, execution: &WorkflowExecution) -> Result<()> {
            self.0.lock().unwrap().push(execution.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_all_steps_complete() {
        let invoker = ScriptedInvoker::new()
            .script("code_writer", vec![Script::Succeed(vec![("app.py", "print(1)\n")])]);
        let archive = Arc::new(MemoryArchive::default());
        let h = harness_with(invoker, archive.clone(), EngineConfig::default());
        let mut write = step("write", "code_writer", true);
        write.outputs = vec!["app.py".to_string()];
        let flow = template(vec![write, step("test", "tester", true)]);

        let report = h
            .engine
            .execute(&flow, "Build an app", RunOptions::default())
            .await
            .unwrap();

        assert!(report.success);
        assert!(report.archived);
        assert_eq!(report.aborted_by, None);
        assert_eq!(report.execution.status, ExecutionStatus::Completed);
        assert_eq!(report.execution.completed_steps, 2);
        assert_eq!(report.execution.outputs_generated, vec!["app.py"]);
        assert_eq!(
            report.working_directory,
            h.workspace.path().join(&report.execution.execution_id)
        );
        assert_eq!(archive.0.lock().unwrap().len(), 1);

        // The second step sees what the first produced.
        let tester_call = &h.invoker.calls_for("tester")[0];
        assert!(tester_call
            .instructions
            .contains("Step write (code_writer) completed, produced: app.py"));
        assert_eq!(tester_call.working_directory, report.working_directory);
        assert_eq!(tester_call.timeout, Duration::from_secs(300));

        let writer = h.directory.get("code_writer").await.unwrap();
        assert_eq!(writer.metrics.total_tasks, 1);
        assert_eq!(writer.metrics.total_tokens, 120);
    }

    #[tokio::test]
    async fn test_step_outcomes_feed_skill_insights() {
        let invoker = ScriptedInvoker::new()
            .script("code_writer", vec![Script::Succeed(vec![("fix.py", "pass\n")])])
            .script("tester", vec![Script::Exit(1, "assertion failed")]);
        let h = harness(invoker);
        let insights = InsightTracker::new();
        let engine = h.engine.with_insights(insights.clone());
        let flow = template(vec![
            step("fix", "code_writer", true),
            step("test", "tester", false),
        ]);

        let report = engine
            .execute(&flow, "Fix bug in login form", RunOptions::default())
            .await
            .unwrap();

        let ledger = insights.snapshot().await;
        let writer = ledger.agent("code_writer").unwrap();
        assert_eq!(writer.task_types["bug_fixing"].count, 1);
        assert_eq!(writer.task_types["bug_fixing"].success, 1);
        assert_eq!(writer.best_tasks[0].task_id, report.execution.execution_id);
        assert_eq!(writer.best_tasks[0].description, "Fix bug in login form");

        let tester = ledger.agent("tester").unwrap();
        assert_eq!(tester.task_types["bug_fixing"].success, 0);
        assert_eq!(
            tester.most_common_error(),
            Some(("Agent process exited with code 1: assertion failed", 1))
        );
        assert!(tester.best_tasks.is_empty());

        let pattern = &ledger.prompt_patterns["bug_fixing:code_writer"];
        assert_eq!(
            pattern.template,
            h.invoker.calls_for("code_writer")[0].instructions
        );
        assert!(!ledger.prompt_patterns.contains_key("bug_fixing:tester"));
    }

    #[tokio::test]
    async fn test_required_step_failure_stops_workflow() {
        let invoker =
            ScriptedInvoker::new().script("code_writer", vec![Script::Exit(1, "syntax error")]);
        let h = harness(invoker);
        let mut b = step("b", "tester", true);
        b.depends_on = vec!["a".to_string()];
        let flow = template(vec![step("a", "code_writer", true), b]);

        let report = h
            .engine
            .execute(&flow, "Fix bug in login flow", RunOptions::default())
            .await
            .unwrap();

        assert!(!report.success);
        assert_eq!(report.execution.status, ExecutionStatus::Failed);
        assert_eq!(report.execution.completed_steps, 0);
        assert_eq!(report.execution.failed_steps, 1);
        assert!(report.execution.step("b").is_none());
        assert!(h.invoker.calls_for("tester").is_empty());
        assert_eq!(
            report.aborted_by,
            Some(AbortReason::RequiredStepFailed {
                step_id: "a".to_string()
            })
        );
        let a = report.execution.step("a").unwrap();
        assert_eq!(
            a.error_message.as_deref(),
            Some("Agent process exited with code 1: syntax error")
        );
        assert!(report.summary().contains("Stopped early: required step 'a' failed"));
    }

    #[tokio::test]
    async fn test_validation_failure_retries_until_budget_exhausted() {
        let invoker = ScriptedInvoker::new().script(
            "code_writer",
            vec![
                Script::Succeed(vec![("index.html", "<html>"), ("QA_REPORT.md", "button broken")]),
                Script::Succeed(vec![("index.html", "<html>")]),
                Script::Succeed(vec![("index.html", "<html>")]),
            ],
        );
        let h = harness(invoker);
        let mut build = step("build", "code_writer", true);
        build.max_retries = 2;
        build.validation = vec![ValidationRule::SyntaxValid {
            file: "index.html".to_string(),
            language: SyntaxLanguage::Html,
        }];
        let flow = template(vec![build]);

        let report = h
            .engine
            .execute(&flow, "Build a page", RunOptions::default())
            .await
            .unwrap();

        let calls = h.invoker.calls_for("code_writer");
        assert_eq!(calls.len(), 3);
        assert!(!calls[0].instructions.contains("## Retry"));
        assert!(calls[1].instructions.starts_with("## Retry"));
        assert!(calls[1].instructions.contains("This is attempt 2 of 3"));
        assert!(calls[1]
            .instructions
            .contains("Validation failed: HTML syntax error in 'index.html'"));
        assert!(calls[1].instructions.contains("### Feedback from QA_REPORT.md\nbutton broken"));
        assert!(calls[2].instructions.contains("This is attempt 3 of 3"));

        // One record per step, one sub-record per attempt.
        assert_eq!(report.execution.steps.len(), 1);
        let record = report.execution.step("build").unwrap();
        assert_eq!(record.status, StepStatus::Failed);
        assert_eq!(record.attempts.len(), 3);
        assert!(record.attempts.iter().all(|a| !a.success));
        assert_eq!(record.validation_errors, vec!["HTML syntax error in 'index.html'"]);
        assert!(!record.validation_passed);
        assert_eq!(record.total_tokens(), 360);

        // Metrics are folded in once for the whole step.
        let writer = h.directory.get("code_writer").await.unwrap();
        assert_eq!(writer.metrics.total_tasks, 1);
        assert_eq!(writer.metrics.failed_tasks, 1);
        assert_eq!(writer.metrics.total_tokens, 360);
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transport_error() {
        let invoker = ScriptedInvoker::new().script(
            "code_writer",
            vec![Script::Broken("broken pipe"), Script::Succeed(vec![("app.py", "x = 1\n")])],
        );
        let h = harness(invoker);
        let mut build = step("build", "code_writer", true);
        build.max_retries = 1;
        let report = h
            .engine
            .execute(&template(vec![build]), "Build it", RunOptions::default())
            .await
            .unwrap();

        assert_eq!(report.execution.status, ExecutionStatus::Completed);
        let record = report.execution.step("build").unwrap();
        assert_eq!(record.attempts.len(), 2);
        assert_eq!(
            record.attempts[0].error.as_deref(),
            Some("I/O error: broken pipe")
        );
        assert_eq!(h.invoker.calls_for("code_writer").len(), 2);
    }

    #[tokio::test]
    async fn test_retry_recovers_from_timeout() {
        let invoker = ScriptedInvoker::new().script(
            "tester",
            vec![Script::Timeout, Script::Succeed(vec![("QA.md", "ok")])],
        );
        let h = harness(invoker);
        let mut qa = step("qa", "tester", true);
        qa.max_retries = 1;
        qa.timeout = Some(30);
        let report = h
            .engine
            .execute(&template(vec![qa]), "Test it", RunOptions::default())
            .await
            .unwrap();

        assert_eq!(report.execution.status, ExecutionStatus::Completed);
        let record = report.execution.step("qa").unwrap();
        assert_eq!(record.attempts.len(), 2);
        assert!(!record.attempts[0].success);
        assert!(record.attempts[1].success);
        assert_eq!(record.outputs, vec!["QA.md"]);
        assert!(h.invoker.calls_for("tester")[1]
            .instructions
            .contains("timed out after 30s"));
        let tester = h.directory.get("tester").await.unwrap();
        assert_eq!(tester.metrics.successful_tasks, 1);
        assert_eq!(tester.metrics.total_tasks, 1);
    }

    #[tokio::test]
    async fn test_optional_failure_gives_partial_success() {
        let invoker = ScriptedInvoker::new().script("docs_writer", vec![Script::Exit(2, "")]);
        let h = harness(invoker);
        let flow = template(vec![
            step("impl", "code_writer", true),
            step("docs", "docs_writer", false),
            step("test", "tester", true),
        ]);
        let report = h
            .engine
            .execute(&flow, "Implement feature", RunOptions::default())
            .await
            .unwrap();

        assert!(report.success);
        assert_eq!(report.execution.status, ExecutionStatus::Partial);
        assert_eq!(report.execution.completed_steps, 2);
        assert_eq!(report.execution.failed_steps, 1);
        assert_eq!(report.aborted_by, None);
    }

    #[tokio::test]
    async fn test_skipped_and_unapproved_steps() {
        let h = harness_with(
            ScriptedInvoker::new(),
            Arc::new(NullArchive),
            EngineConfig {
                skip_optional_steps: true,
                ..EngineConfig::default()
            },
        );
        let engine = h.engine.with_approver(Arc::new(DenySteps("review")));
        let flow = template(vec![
            step("docs", "docs_writer", false),
            step("review", "code_analyst", true),
            step("impl", "code_writer", true),
        ]);
        let report = engine
            .execute(&flow, "Implement feature", RunOptions::default())
            .await
            .unwrap();

        assert_eq!(report.execution.skipped_steps, 2);
        assert_eq!(report.execution.completed_steps, 1);
        assert_eq!(report.execution.status, ExecutionStatus::Completed);
        assert_eq!(
            report.execution.step("review").unwrap().error_message.as_deref(),
            Some("Step not approved")
        );
        assert_eq!(h.invoker.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_agent_fails_without_invocation() {
        let h = harness(ScriptedInvoker::new());
        let flow = template(vec![step("ghost", "designer", false), step("impl", "code_writer", true)]);
        let report = h
            .engine
            .execute(&flow, "Design and build", RunOptions::default())
            .await
            .unwrap();

        let ghost = report.execution.step("ghost").unwrap();
        assert_eq!(ghost.status, StepStatus::Failed);
        assert!(ghost.attempts.is_empty());
        assert_eq!(ghost.error_message.as_deref(), Some("Agent 'designer' not found"));
        assert!(h.invoker.calls_for("designer").is_empty());
        assert_eq!(report.execution.status, ExecutionStatus::Partial);
    }

    #[tokio::test]
    async fn test_required_gate_failure_aborts_and_runs_error_hooks() {
        let hooks = Arc::new(RecordingHooks::default());
        let h = harness(ScriptedInvoker::new());
        let engine = h.engine.with_hooks(hooks.clone());
        let mut flow = template(vec![
            step("impl", "code_writer", true),
            step("test", "tester", true),
        ]);
        flow.quality_gates = vec![
            QualityGate {
                name: "signoff".to_string(),
                after_step: "impl".to_string(),
                kind: GateKind::Manual,
                ..QualityGate::default()
            },
            QualityGate {
                name: "report".to_string(),
                after_step: "impl".to_string(),
                kind: GateKind::Automatic,
                condition: "file_exists:REPORT.md".to_string(),
                required: true,
                ..QualityGate::default()
            },
        ];
        flow.hooks = WorkflowHooks {
            pre_workflow: vec![HookAction {
                action: "prepare".to_string(),
                description: String::new(),
            }],
            post_workflow: vec![HookAction {
                action: "cleanup".to_string(),
                description: String::new(),
            }],
            on_error: vec![HookAction {
                action: "notify".to_string(),
                description: String::new(),
            }],
        };

        let report = engine
            .execute(&flow, "Implement feature", RunOptions::default())
            .await
            .unwrap();

        assert_eq!(
            report.aborted_by,
            Some(AbortReason::RequiredGateFailed {
                gate: "report".to_string()
            })
        );
        assert_eq!(report.execution.quality_gates_passed, vec!["signoff"]);
        assert_eq!(report.execution.quality_gates_failed, vec!["report"]);
        assert_eq!(report.execution.user_interventions, 1);
        assert!(report.execution.step("test").is_none());
        assert_eq!(report.execution.status, ExecutionStatus::Partial);
        assert_eq!(
            report.execution.aborted.as_deref(),
            Some("required quality gate 'report' failed")
        );
        assert_eq!(
            *hooks.calls.lock().unwrap(),
            vec![
                (HookPhase::PreWorkflow, "prepare".to_string()),
                (HookPhase::OnError, "notify".to_string()),
                (HookPhase::PostWorkflow, "cleanup".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_project_path_is_used_as_working_directory() {
        let project = TempDir::new().unwrap();
        let h = harness(ScriptedInvoker::new());
        let report = h
            .engine
            .execute(
                &template(vec![step("impl", "code_writer", true)]),
                "Implement feature",
                RunOptions {
                    project_path: Some(project.path().to_path_buf()),
                },
            )
            .await
            .unwrap();

        assert_eq!(report.working_directory, project.path());
        assert_eq!(
            report.execution.project_path.as_deref(),
            Some(project.path().display().to_string().as_str())
        );
        assert_eq!(
            h.invoker.calls_for("code_writer")[0].working_directory,
            project.path()
        );
    }
}
