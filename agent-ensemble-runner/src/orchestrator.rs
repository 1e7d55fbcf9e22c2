//! Top-level service object
//!
//! [`Orchestrator::initialize`] is the explicit start-up phase: it opens
//! storage, loads the agent directory and the skill insight ledger, and wires
//! the workflow engine and the ad hoc dispatcher over the same directory,
//! insights, invoker and history.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use agent_ensemble_core::directory::AgentDirectory;
use agent_ensemble_core::insights::{render_insights_report, AgentInsights, InsightTracker};
use agent_ensemble_core::learning::{
    analyze_workflow, detect_task_patterns, render_learning_report, synthesize_template,
    TaskPattern, WorkflowAnalysis,
};
use agent_ensemble_core::orchestration::{
    AgentInvoker, ExecutionTracker, HeadlessClaudeExecutor, RunOptions, WorkflowEngine,
    WorkflowRunReport,
};
use agent_ensemble_core::selection::{AgentAssignment, AgentSelector};
use agent_ensemble_core::statistics::{
    global_statistics, workflow_statistics, GlobalStatistics, WorkflowStatistics,
};
use agent_ensemble_core::task::{TaskAnalysis, TaskClassifier};
use agent_ensemble_core::workflow::{TemplateMatch, TemplateReport, WorkflowTemplate};
use agent_ensemble_storage::repositories::HistoryQuery;
use agent_ensemble_storage::StorageManager;

use crate::config::Config;
use crate::dispatcher::{DispatchConfig, DispatchReport, TaskDispatcher};
use crate::{Error, Result};

/// One request to run a task
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub task: String,
    /// Force this template regardless of its match score
    pub workflow: Option<String>,
    /// Never use a template
    pub no_workflow: bool,
    pub max_agents: Option<usize>,
    pub project_path: Option<PathBuf>,
}

impl RunRequest {
    pub fn new<S: Into<String>>(task: S) -> Self {
        Self {
            task: task.into(),
            ..Self::default()
        }
    }
}

/// How a task will be executed
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    Workflow { template: WorkflowTemplate, score: u32 },
    AdHoc,
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    Workflow(WorkflowRunReport),
    AdHoc(DispatchReport),
}

impl RunOutcome {
    pub fn success(&self) -> bool {
        match self {
            RunOutcome::Workflow(report) => report.success,
            RunOutcome::AdHoc(report) => report.success,
        }
    }

    pub fn summary(&self) -> String {
        match self {
            RunOutcome::Workflow(report) => report.summary(),
            RunOutcome::AdHoc(report) => report.summary(),
        }
    }
}

/// Dry-run view of how a task would be handled
#[derive(Debug, Clone)]
pub struct TaskPlan {
    pub analysis: TaskAnalysis,
    pub assignments: Vec<AgentAssignment>,
    pub template_matches: Vec<TemplateMatch>,
    pub route: Route,
}

/// Statistics view for one workflow or the whole history
#[derive(Debug, Clone)]
pub enum StatisticsView {
    Workflow(Option<WorkflowStatistics>),
    Global(GlobalStatistics),
}

/// Result of a learning pass
#[derive(Debug, Clone)]
pub struct LearningOutcome {
    pub report: String,
    pub analyses: Vec<WorkflowAnalysis>,
    pub patterns: Vec<TaskPattern>,
    /// Learned template documents written by this pass
    pub saved: Vec<PathBuf>,
}

/// Skill insights for the whole ledger or one agent
#[derive(Debug, Clone)]
pub enum InsightsView {
    Report(String),
    Agent {
        name: String,
        /// `None` until the agent has run at least once
        insights: Option<AgentInsights>,
        suggestions: Vec<String>,
    },
}

/// Structural check of a template document against the directory
#[derive(Debug, Clone)]
pub struct TemplateCheck {
    pub template: WorkflowTemplate,
    pub report: TemplateReport,
}

/// Name for a template synthesized from a pattern
pub fn learned_template_name(pattern: &TaskPattern) -> String {
    let slug: Vec<&str> = pattern.keywords.split_whitespace().collect();
    let slug: String = slug
        .join("-")
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    format!("learned-{}", slug)
}

/// Wires configuration, storage, the directory and both execution paths
pub struct Orchestrator {
    config: Config,
    storage: Arc<StorageManager>,
    directory: AgentDirectory,
    insights: InsightTracker,
    engine: WorkflowEngine,
    dispatcher: TaskDispatcher,
}

impl Orchestrator {
    /// Initialise with the command-line executor from configuration
    pub async fn initialize(config: Config) -> Result<Self> {
        let invoker = Arc::new(HeadlessClaudeExecutor::new(config.execution_config()));
        Self::with_invoker(config, invoker).await
    }

    /// Initialise with an explicit invoker
    pub async fn with_invoker(config: Config, invoker: Arc<dyn AgentInvoker>) -> Result<Self> {
        info!("Initializing orchestrator components");

        let storage = Arc::new(StorageManager::new(config.storage_config()).await?);
        let agents_repo = storage.agents();
        let agents = agents_repo.load().await?;
        let directory = AgentDirectory::from_agents(agents).with_store(agents_repo);
        info!("Agent directory ready with {} agents", directory.len().await);

        let insights_repo = storage.insights();
        let ledger = match insights_repo.load().await {
            Ok(ledger) => ledger,
            Err(e) => {
                warn!("Starting with empty skill insights: {}", e);
                Default::default()
            }
        };
        let insights = InsightTracker::from_ledger(ledger).with_store(insights_repo);

        let tracker = ExecutionTracker::new(storage.history());
        let engine = WorkflowEngine::new(
            directory.clone(),
            invoker.clone(),
            tracker.clone(),
            config.engine_config(),
        )?
        .with_insights(insights.clone());
        let selector = AgentSelector::new(TaskClassifier::new(), config.selector_config());
        let dispatcher = TaskDispatcher::new(
            directory.clone(),
            selector,
            invoker,
            tracker,
            DispatchConfig {
                workspace_root: config.workflow.workspace_root.clone(),
                timeout_secs: config.executor.timeout_seconds,
            },
        )?
        .with_insights(insights.clone());

        Ok(Self {
            config,
            storage,
            directory,
            insights,
            engine,
            dispatcher,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn storage(&self) -> Arc<StorageManager> {
        self.storage.clone()
    }

    pub fn directory(&self) -> &AgentDirectory {
        &self.directory
    }

    pub fn insights(&self) -> &InsightTracker {
        &self.insights
    }

    /// Decide between a template and ad hoc dispatch
    pub async fn route(&self, request: &RunRequest) -> Result<Route> {
        if let Some(name) = &request.workflow {
            let template = self
                .storage
                .templates()
                .get(name)
                .await?
                .ok_or_else(|| Error::WorkflowNotFound(name.clone()))?;
            let score = template.match_score(&request.task);
            return Ok(Route::Workflow { template, score });
        }
        if request.no_workflow || !self.config.workflow.enabled {
            return Ok(Route::AdHoc);
        }

        let matches = self.storage.templates().find_matches(&request.task).await?;
        match matches.into_iter().next() {
            Some(best) if best.score >= self.config.workflow.match_threshold => {
                debug!(
                    template = %best.template.name,
                    score = best.score,
                    "Template matched task"
                );
                Ok(Route::Workflow {
                    template: best.template,
                    score: best.score,
                })
            }
            _ => Ok(Route::AdHoc),
        }
    }

    /// Run a task through a template or ad hoc dispatch
    pub async fn run(&self, request: RunRequest) -> Result<RunOutcome> {
        match self.route(&request).await? {
            Route::Workflow { template, score } => {
                info!(
                    "Running workflow '{}' v{} (match score {})",
                    template.name, template.version, score
                );
                let unknown = template.unknown_agents(&self.agent_names().await);
                if !unknown.is_empty() {
                    warn!(
                        "Workflow '{}' references unknown agents: {}",
                        template.name,
                        unknown.join(", ")
                    );
                }
                let options = RunOptions {
                    project_path: request.project_path.clone(),
                };
                let report = self.engine.execute(&template, &request.task, options).await?;
                Ok(RunOutcome::Workflow(report))
            }
            Route::AdHoc => {
                let max_agents = request
                    .max_agents
                    .unwrap_or(self.config.selection.max_agents);
                let report = self
                    .dispatcher
                    .dispatch(&request.task, max_agents, request.project_path.as_deref())
                    .await?;
                Ok(RunOutcome::AdHoc(report))
            }
        }
    }

    /// Classification, selection and routing without invoking anything
    pub async fn analyze(&self, task: &str, max_agents: Option<usize>) -> Result<TaskPlan> {
        let max_agents = max_agents.unwrap_or(self.config.selection.max_agents);
        let (analysis, assignments) = self
            .dispatcher
            .selector()
            .select_for_task(&self.directory, task, max_agents)
            .await;
        let template_matches = self.storage.templates().find_matches(task).await?;
        let route = self.route(&RunRequest::new(task)).await?;
        Ok(TaskPlan {
            analysis,
            assignments,
            template_matches,
            route,
        })
    }

    pub async fn statistics(&self, workflow: Option<&str>) -> Result<StatisticsView> {
        let history = self.storage.history();
        Ok(match workflow {
            Some(name) => StatisticsView::Workflow(history.workflow_statistics(name).await?),
            None => StatisticsView::Global(history.global_statistics().await?),
        })
    }

    /// Analyse the recent history, detect recurring task patterns and
    /// optionally save them as learned templates
    pub async fn learn(&self, min_occurrences: Option<usize>, save: bool) -> Result<LearningOutcome> {
        let min_occurrences = min_occurrences.unwrap_or(self.config.learning.min_occurrences);
        let history = self
            .storage
            .history()
            .list(&HistoryQuery::all().limit(self.config.learning.history_window))
            .await?;
        info!(
            "Learning from {} executions (min occurrences {})",
            history.len(),
            min_occurrences
        );

        let global = global_statistics(&history);
        let analyses: Vec<WorkflowAnalysis> = global
            .executions_per_workflow
            .keys()
            .filter_map(|name| workflow_statistics(name, &history))
            .map(|stats| analyze_workflow(&stats))
            .collect();
        let patterns = detect_task_patterns(&history, min_occurrences);

        let mut saved = Vec::new();
        if save {
            let templates = self.storage.templates();
            for pattern in &patterns {
                let template = synthesize_template(pattern, &learned_template_name(pattern));
                match templates.save_learned(&template).await {
                    Ok(path) => saved.push(path),
                    Err(e) => warn!("Failed to save learned template '{}': {}", template.name, e),
                }
            }
        }

        let report = render_learning_report(&global, &analyses, &patterns, Utc::now());
        Ok(LearningOutcome {
            report,
            analyses,
            patterns,
            saved,
        })
    }

    /// Skills report over every agent, or one agent's insights and
    /// improvement suggestions
    pub async fn skill_insights(&self, agent: Option<&str>) -> InsightsView {
        let ledger = self.insights.snapshot().await;
        match agent {
            Some(name) => InsightsView::Agent {
                name: name.to_string(),
                insights: ledger.agent(name).cloned(),
                suggestions: ledger.suggest_improvements(name),
            },
            None => InsightsView::Report(render_insights_report(&ledger, Utc::now())),
        }
    }

    /// Validate a template document, adding a warning per unknown agent
    pub async fn validate_template(&self, path: &Path) -> Result<TemplateCheck> {
        let document = tokio::fs::read_to_string(path).await?;
        let template = WorkflowTemplate::from_yaml(&document)?;
        let mut report = template.validate();
        for agent in template.unknown_agents(&self.agent_names().await) {
            report
                .warnings
                .push(format!("Agent '{}' is not in the directory", agent));
        }
        Ok(TemplateCheck { template, report })
    }

    async fn agent_names(&self) -> Vec<String> {
        self.directory
            .agents()
            .await
            .into_iter()
            .map(|a| a.name)
            .collect()
    }
}
