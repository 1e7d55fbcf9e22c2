//! Per-agent skill insights
//!
//! Every finished agent invocation is folded into an [`InsightLedger`] keyed
//! by agent and task type. The ledger counts outcomes per task type, tallies
//! recurring errors, keeps each agent's fastest successful tasks and
//! remembers the instructions behind the first success of every
//! (task type, agent) pairing. Once a pairing has succeeded
//! [`PROVEN_PROMPT_SUCCESSES`] times those instructions are offered as its
//! proven prompt. Improvement suggestions are derived from the counts on
//! demand.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::statistics::format_duration;
use crate::Result;

/// Fastest successful tasks kept per agent
pub const MAX_BEST_TASKS: usize = 10;
/// Errors and task descriptions are keyed by this many leading characters
pub const SNIPPET_LEN: usize = 100;
/// Successes before a pairing's instructions count as proven
pub const PROVEN_PROMPT_SUCCESSES: u64 = 3;

const LOW_SUCCESS_MIN_TASKS: u64 = 5;
const LOW_SUCCESS_PERCENT: f64 = 70.0;
const RECURRING_ERROR_MIN: u64 = 3;
const SLOW_MIN_TASKS: u64 = 10;
const SLOW_AVG_SECS: f64 = 300.0;

pub const NO_DATA_SUGGESTION: &str = "No performance data available yet";
pub const ALL_GOOD_SUGGESTION: &str = "Performance is good! Continue current approach.";

fn snippet(text: &str) -> String {
    text.chars().take(SNIPPET_LEN).collect()
}

/// One finished agent invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InsightRecord {
    /// Execution the invocation belonged to
    pub task_id: String,
    pub agent: String,
    pub task_type: String,
    pub task: String,
    pub success: bool,
    pub duration_secs: f64,
    pub tokens: u64,
    pub cost: f64,
    pub error: Option<String>,
    /// Instructions the agent was given
    pub prompt: String,
    pub timestamp: DateTime<Utc>,
}

impl InsightRecord {
    pub fn new<S1, S2, S3, S4>(task_id: S1, agent: S2, task_type: S3, task: S4, success: bool) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
        S4: Into<String>,
    {
        Self {
            task_id: task_id.into(),
            agent: agent.into(),
            task_type: task_type.into(),
            task: task.into(),
            success,
            duration_secs: 0.0,
            tokens: 0,
            cost: 0.0,
            error: None,
            prompt: String::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_usage(mut self, duration_secs: f64, tokens: u64, cost: f64) -> Self {
        self.duration_secs = duration_secs;
        self.tokens = tokens;
        self.cost = cost;
        self
    }

    pub fn with_error<S: Into<String>>(mut self, error: S) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.prompt = prompt.into();
        self
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskTypeTally {
    pub count: u64,
    pub success: u64,
}

impl TaskTypeTally {
    /// Percentage in `[0, 100]`
    pub fn success_rate(&self) -> f64 {
        percent(self.success, self.count)
    }
}

/// A fast successful task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BestTask {
    pub task_id: String,
    pub description: String,
    pub duration_secs: f64,
    pub timestamp: DateTime<Utc>,
}

/// Everything the ledger knows about one agent
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentInsights {
    pub task_types: BTreeMap<String, TaskTypeTally>,
    /// Error snippet to occurrence count
    pub common_errors: BTreeMap<String, u64>,
    /// Fastest first, at most [`MAX_BEST_TASKS`]
    pub best_tasks: Vec<BestTask>,
    pub total_tasks: u64,
    pub successful_tasks: u64,
    pub total_duration_secs: f64,
    pub total_cost: f64,
}

impl AgentInsights {
    fn record(&mut self, record: &InsightRecord) {
        let tally = self.task_types.entry(record.task_type.clone()).or_default();
        tally.count += 1;
        self.total_tasks += 1;
        self.total_duration_secs += record.duration_secs;
        self.total_cost += record.cost;

        if let Some(error) = record.error.as_deref().filter(|e| !e.is_empty()) {
            *self.common_errors.entry(snippet(error)).or_default() += 1;
        }

        if record.success {
            tally.success += 1;
            self.successful_tasks += 1;
            self.best_tasks.push(BestTask {
                task_id: record.task_id.clone(),
                description: snippet(&record.task),
                duration_secs: record.duration_secs,
                timestamp: record.timestamp,
            });
            self.best_tasks
                .sort_by(|a, b| a.duration_secs.total_cmp(&b.duration_secs));
            self.best_tasks.truncate(MAX_BEST_TASKS);
        }
    }

    pub fn success_rate(&self) -> f64 {
        percent(self.successful_tasks, self.total_tasks)
    }

    pub fn avg_duration_secs(&self) -> f64 {
        if self.total_tasks == 0 {
            0.0
        } else {
            self.total_duration_secs / self.total_tasks as f64
        }
    }

    /// Highest count wins; ties go to the first error in key order
    pub fn most_common_error(&self) -> Option<(&str, u64)> {
        let mut best: Option<(&str, u64)> = None;
        for (error, &count) in &self.common_errors {
            if best.map_or(true, |(_, top)| count > top) {
                best = Some((error.as_str(), count));
            }
        }
        best
    }

    /// Tuning hints for this agent, or a single all-clear line
    pub fn suggest_improvements(&self) -> Vec<String> {
        let mut suggestions = Vec::new();

        for (task_type, tally) in &self.task_types {
            if tally.count >= LOW_SUCCESS_MIN_TASKS && tally.success_rate() < LOW_SUCCESS_PERCENT {
                suggestions.push(format!(
                    "Low success rate ({:.1}%) on {} tasks. Consider additional training or tool access.",
                    tally.success_rate(),
                    task_type
                ));
            }
        }

        if let Some((error, count)) = self.most_common_error() {
            if count >= RECURRING_ERROR_MIN {
                suggestions.push(format!(
                    "Recurring error (x{}): {}. Review error handling or tool permissions.",
                    count, error
                ));
            }
        }

        if self.total_tasks >= SLOW_MIN_TASKS && self.avg_duration_secs() > SLOW_AVG_SECS {
            suggestions.push(format!(
                "Average execution time is high ({:.1}s). Consider task decomposition or tool optimization.",
                self.avg_duration_secs()
            ));
        }

        if suggestions.is_empty() {
            suggestions.push(ALL_GOOD_SUGGESTION.to_string());
        }
        suggestions
    }
}

/// Instructions that worked for a (task type, agent) pairing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptPattern {
    pub task_type: String,
    pub agent: String,
    /// Instructions from the pairing's first success
    pub template: String,
    pub success_count: u64,
    /// Running mean over successes
    pub avg_duration_secs: f64,
    pub last_used: DateTime<Utc>,
}

fn pattern_key(task_type: &str, agent: &str) -> String {
    format!("{}:{}", task_type, agent)
}

/// Ledger-wide aggregate
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InsightSummary {
    pub total_tasks: u64,
    /// Percentage in `[0, 100]`
    pub success_rate: f64,
    pub total_cost: f64,
    pub total_duration_secs: f64,
    pub avg_duration_secs: f64,
    pub task_type_distribution: BTreeMap<String, u64>,
    /// Highest success rate first, ties in name order
    pub agent_rankings: Vec<(String, f64)>,
    pub learned_prompts: usize,
    pub agents_tracked: usize,
}

/// Accumulated insights for every agent
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InsightLedger {
    #[serde(default)]
    pub agents: BTreeMap<String, AgentInsights>,
    #[serde(default)]
    pub prompt_patterns: BTreeMap<String, PromptPattern>,
}

impl InsightLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, record: &InsightRecord) {
        self.agents
            .entry(record.agent.clone())
            .or_default()
            .record(record);
        if record.success {
            self.learn_prompt(record);
        }
    }

    fn learn_prompt(&mut self, record: &InsightRecord) {
        let key = pattern_key(&record.task_type, &record.agent);
        match self.prompt_patterns.get_mut(&key) {
            Some(pattern) => {
                pattern.success_count += 1;
                let n = pattern.success_count as f64;
                pattern.avg_duration_secs += (record.duration_secs - pattern.avg_duration_secs) / n;
                pattern.last_used = record.timestamp;
            }
            None => {
                self.prompt_patterns.insert(
                    key,
                    PromptPattern {
                        task_type: record.task_type.clone(),
                        agent: record.agent.clone(),
                        template: record.prompt.clone(),
                        success_count: 1,
                        avg_duration_secs: record.duration_secs,
                        last_used: record.timestamp,
                    },
                );
            }
        }
    }

    pub fn agent(&self, name: &str) -> Option<&AgentInsights> {
        self.agents.get(name)
    }

    /// Instructions proven on this pairing, once it has enough successes
    pub fn best_prompt(&self, task_type: &str, agent: &str) -> Option<&str> {
        self.prompt_patterns
            .get(&pattern_key(task_type, agent))
            .filter(|p| p.success_count >= PROVEN_PROMPT_SUCCESSES)
            .map(|p| p.template.as_str())
    }

    pub fn suggest_improvements(&self, agent: &str) -> Vec<String> {
        match self.agents.get(agent) {
            Some(insights) => insights.suggest_improvements(),
            None => vec![NO_DATA_SUGGESTION.to_string()],
        }
    }

    pub fn summary(&self) -> InsightSummary {
        let mut summary = InsightSummary {
            learned_prompts: self.prompt_patterns.len(),
            agents_tracked: self.agents.len(),
            ..InsightSummary::default()
        };
        let mut successful = 0;
        for (name, insights) in &self.agents {
            summary.total_tasks += insights.total_tasks;
            successful += insights.successful_tasks;
            summary.total_cost += insights.total_cost;
            summary.total_duration_secs += insights.total_duration_secs;
            for (task_type, tally) in &insights.task_types {
                *summary
                    .task_type_distribution
                    .entry(task_type.clone())
                    .or_default() += tally.count;
            }
            summary
                .agent_rankings
                .push((name.clone(), insights.success_rate()));
        }
        summary.success_rate = percent(successful, summary.total_tasks);
        if summary.total_tasks > 0 {
            summary.avg_duration_secs = summary.total_duration_secs / summary.total_tasks as f64;
        }
        // Stable sort keeps name order among equal rates.
        summary
            .agent_rankings
            .sort_by(|a, b| b.1.total_cmp(&a.1));
        summary
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

/// Markdown skills report over the whole ledger
pub fn render_insights_report(ledger: &InsightLedger, generated_at: DateTime<Utc>) -> String {
    let mut out = String::from("# Agent Skills Report\n\n");
    out.push_str(&format!(
        "Generated: {}\n\n",
        generated_at.format("%Y-%m-%d %H:%M:%S")
    ));

    let summary = ledger.summary();
    if summary.total_tasks == 0 {
        out.push_str("No agent activity recorded yet.\n");
        return out;
    }

    out.push_str("## Overall Statistics\n\n");
    out.push_str(&format!("- **Total Tasks**: {}\n", summary.total_tasks));
    out.push_str(&format!("- **Success Rate**: {:.2}%\n", summary.success_rate));
    out.push_str(&format!("- **Total Cost**: ${:.2}\n", summary.total_cost));
    out.push_str(&format!(
        "- **Average Time per Task**: {}\n",
        format_duration(summary.avg_duration_secs)
    ));
    out.push_str(&format!("- **Proven Prompts**: {}\n\n", proven_prompts(ledger)));

    out.push_str("## Agent Performance Rankings\n\n");
    for (agent, rate) in &summary.agent_rankings {
        out.push_str(&format!("1. **{}**: {:.1}% success rate\n", agent, rate));
    }
    out.push('\n');

    out.push_str("## Task Type Distribution\n\n");
    for (task_type, count) in &summary.task_type_distribution {
        out.push_str(&format!("- {}: {} tasks\n", task_type, count));
    }
    out.push('\n');

    out.push_str("## Improvement Suggestions\n");
    for (agent, insights) in &ledger.agents {
        out.push_str(&format!("\n### {}\n\n", agent));
        for suggestion in insights.suggest_improvements() {
            out.push_str(&format!("- {}\n", suggestion));
        }
    }
    out
}

fn proven_prompts(ledger: &InsightLedger) -> usize {
    ledger
        .prompt_patterns
        .values()
        .filter(|p| p.success_count >= PROVEN_PROMPT_SUCCESSES)
        .count()
}

/// Durable sink for the insight ledger
#[async_trait]
pub trait InsightStore: Send + Sync {
    async fn save_insights(&self, ledger: &InsightLedger) -> Result<()>;
}

/// Shared handle over one ledger.
///
/// Records are folded in under a write lock and, when a store is attached,
/// the ledger is written through after each one. A failed write is logged;
/// the in-memory ledger stays authoritative.
#[derive(Clone, Default)]
pub struct InsightTracker {
    ledger: Arc<RwLock<InsightLedger>>,
    store: Option<Arc<dyn InsightStore>>,
}

impl std::fmt::Debug for InsightTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InsightTracker")
            .field("persistent", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

impl InsightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ledger(ledger: InsightLedger) -> Self {
        Self {
            ledger: Arc::new(RwLock::new(ledger)),
            store: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn InsightStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub async fn record(&self, record: InsightRecord) {
        let mut ledger = self.ledger.write().await;
        ledger.record(&record);
        debug!(
            agent = %record.agent,
            task_type = %record.task_type,
            success = record.success,
            "Recorded agent insight"
        );
        if let Some(store) = &self.store {
            if let Err(e) = store.save_insights(&ledger).await {
                warn!("Failed to persist insights for agent {}: {}", record.agent, e);
            }
        }
    }

    pub async fn snapshot(&self) -> InsightLedger {
        self.ledger.read().await.clone()
    }

    pub async fn suggest_improvements(&self, agent: &str) -> Vec<String> {
        self.ledger.read().await.suggest_improvements(agent)
    }

    pub async fn best_prompt(&self, task_type: &str, agent: &str) -> Option<String> {
        self.ledger
            .read()
            .await
            .best_prompt(task_type, agent)
            .map(str::to_string)
    }
}
