//! Learning from execution history
//!
//! Past task descriptions are clustered by a coarse keyword signature. A
//! cluster that recurs often enough, and whose runs completed a consistent
//! sequence of agents, becomes a candidate template. Candidates are never
//! activated automatically; callers store them separately for review.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::execution::{ExecutionStatus, WorkflowExecution};
use crate::statistics::{format_duration, GlobalStatistics, WorkflowStatistics};
use crate::workflow::{TemplatePriority, WorkflowStep, WorkflowTemplate};

/// Author recorded on synthesized templates
pub const LEARNING_AUTHOR: &str = "learning-system";

/// Timeout given to every synthesized step, in seconds
pub const LEARNED_STEP_TIMEOUT: u64 = 300;

const SIGNATURE_LEN: usize = 5;

const SIGNATURE_STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "as", "is", "was", "are", "were", "be", "been", "being", "have", "has", "had", "do",
    "does", "did", "will", "would", "should", "could", "may", "might", "must", "can", "this",
    "that", "these", "those", "i", "you", "he", "she", "it", "we", "they",
];

/// A recurring task shape observed in the history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskPattern {
    /// Space-joined signature keywords
    pub keywords: String,
    pub occurrences: usize,
    /// Most frequent sequence of agents over completed steps
    pub agent_sequence: Vec<String>,
    pub avg_duration_secs: f64,
    /// Fraction of runs that completed
    pub success_rate: f64,
    pub sample_tasks: Vec<String>,
}

/// Sorted keywords (at most five) used to group similar tasks. Length and
/// stopwords are judged on the word as written, before trailing punctuation
/// is trimmed; repeated words are kept.
pub fn keyword_signature(task: &str) -> Vec<String> {
    let mut keywords: Vec<String> = task
        .to_lowercase()
        .split_whitespace()
        .filter(|w| w.chars().count() > 3 && !SIGNATURE_STOPWORDS.contains(w))
        .map(|w| w.trim_matches(|c: char| ".,!?;:".contains(c)).to_string())
        .collect();
    keywords.sort();
    keywords.truncate(SIGNATURE_LEN);
    keywords
}

fn most_common_sequence(runs: &[&WorkflowExecution]) -> Option<Vec<String>> {
    let mut seen: Vec<Vec<String>> = Vec::new();
    let mut counts: HashMap<Vec<String>, usize> = HashMap::new();
    for run in runs {
        let sequence = run.completed_agent_sequence();
        if sequence.is_empty() {
            continue;
        }
        let count = counts.entry(sequence.clone()).or_insert(0);
        if *count == 0 {
            seen.push(sequence);
        }
        *count += 1;
    }
    // First-seen sequence wins a tie.
    let mut best: Option<(Vec<String>, usize)> = None;
    for sequence in seen {
        let count = counts.get(&sequence).copied().unwrap_or(0);
        if best.as_ref().map_or(true, |(_, c)| count > *c) {
            best = Some((sequence, count));
        }
    }
    best.map(|(sequence, _)| sequence)
}

/// Find recurring task shapes with at least `min_occurrences` runs, most
/// frequent first.
pub fn detect_task_patterns(
    history: &[WorkflowExecution],
    min_occurrences: usize,
) -> Vec<TaskPattern> {
    let min_occurrences = min_occurrences.max(1);
    let mut order: Vec<String> = Vec::new();
    let mut clusters: HashMap<String, Vec<&WorkflowExecution>> = HashMap::new();
    for execution in history {
        let signature = keyword_signature(&execution.task_description).join(" ");
        if signature.is_empty() {
            continue;
        }
        clusters
            .entry(signature.clone())
            .or_insert_with(|| {
                order.push(signature);
                Vec::new()
            })
            .push(execution);
    }

    let mut patterns: Vec<TaskPattern> = order
        .into_iter()
        .filter_map(|keywords| {
            let runs = clusters.remove(&keywords)?;
            if runs.len() < min_occurrences {
                return None;
            }
            let agent_sequence = most_common_sequence(&runs)?;
            let occurrences = runs.len();
            let completed = runs
                .iter()
                .filter(|e| e.status == ExecutionStatus::Completed)
                .count();
            Some(TaskPattern {
                keywords,
                occurrences,
                agent_sequence,
                avg_duration_secs: runs.iter().map(|e| e.duration_secs).sum::<f64>()
                    / occurrences as f64,
                success_rate: completed as f64 / occurrences as f64,
                sample_tasks: runs
                    .iter()
                    .take(3)
                    .map(|e| e.task_description.clone())
                    .collect(),
            })
        })
        .collect();
    patterns.sort_by(|a, b| b.occurrences.cmp(&a.occurrences));
    patterns
}

fn title_case(agent: &str) -> String {
    agent
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Build a candidate template: one required step per agent, each depending on
/// the one before.
pub fn synthesize_template(pattern: &TaskPattern, name: &str) -> WorkflowTemplate {
    let mut agents_required: Vec<String> = Vec::new();
    for agent in &pattern.agent_sequence {
        if !agents_required.contains(agent) {
            agents_required.push(agent.clone());
        }
    }

    let steps = pattern
        .agent_sequence
        .iter()
        .enumerate()
        .map(|(i, agent)| WorkflowStep {
            id: format!("step{}", i + 1),
            name: format!("{} Task", title_case(agent)),
            agent: agent.clone(),
            action: format!("Perform {} tasks based on requirements", agent),
            required: true,
            depends_on: if i == 0 {
                Vec::new()
            } else {
                vec![format!("step{}", i)]
            },
            timeout: Some(LEARNED_STEP_TIMEOUT),
            ..WorkflowStep::default()
        })
        .collect();

    WorkflowTemplate {
        name: name.to_string(),
        version: "1.0.0".to_string(),
        description: format!(
            "Auto-generated workflow based on {} similar tasks",
            pattern.occurrences
        ),
        author: Some(LEARNING_AUTHOR.to_string()),
        task_types: pattern.keywords.split_whitespace().map(String::from).collect(),
        tags: vec!["auto-generated".to_string(), "learned".to_string()],
        agents_required,
        steps,
        priority: TemplatePriority::Medium,
        usage_count: 0,
        success_rate: pattern.success_rate,
        estimated_duration: pattern.avg_duration_secs.max(0.0) as u64,
        ..WorkflowTemplate::default()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ImprovementKind {
    HighFailureRate,
    FrequentlySkipped,
    LowSuccessRate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Improvement {
    pub kind: ImprovementKind,
    /// `None` for workflow-level suggestions
    pub step_id: Option<String>,
    pub rate: f64,
    pub recommendation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowAnalysis {
    pub workflow_name: String,
    pub statistics: WorkflowStatistics,
    pub improvements: Vec<Improvement>,
}

fn percent(rate: f64) -> String {
    format!("{:.1}%", rate * 100.0)
}

/// Suggest improvements: steps failing more than 20% or skipped more than
/// 80% of the time, and workflows succeeding less than 70% of the time.
pub fn analyze_workflow(stats: &WorkflowStatistics) -> WorkflowAnalysis {
    let mut improvements = Vec::new();
    for step in &stats.steps {
        let failure_rate = step.failure_rate();
        if failure_rate > 0.2 {
            improvements.push(Improvement {
                kind: ImprovementKind::HighFailureRate,
                step_id: Some(step.step_id.clone()),
                rate: failure_rate,
                recommendation: format!(
                    "Step '{}' has high failure rate ({}). Consider adding more validation \
                     or breaking into smaller steps.",
                    step.step_name,
                    percent(failure_rate)
                ),
            });
        }
        let skip_rate = step.skip_rate();
        if skip_rate > 0.8 {
            improvements.push(Improvement {
                kind: ImprovementKind::FrequentlySkipped,
                step_id: Some(step.step_id.clone()),
                rate: skip_rate,
                recommendation: format!(
                    "Step '{}' is skipped {} of the time. Consider making it optional or removing it.",
                    step.step_name,
                    percent(skip_rate)
                ),
            });
        }
    }
    if stats.success_rate < 0.7 {
        improvements.push(Improvement {
            kind: ImprovementKind::LowSuccessRate,
            step_id: None,
            rate: stats.success_rate,
            recommendation: format!(
                "Workflow has low success rate ({}). Review failed steps and add better error handling.",
                percent(stats.success_rate)
            ),
        });
    }
    WorkflowAnalysis {
        workflow_name: stats.workflow_name.clone(),
        statistics: stats.clone(),
        improvements,
    }
}

/// Timeout per step that has completed at least once:
/// `max(60, 1.5 × mean completed duration)` seconds.
pub fn suggest_timeouts(stats: &WorkflowStatistics) -> BTreeMap<String, u64> {
    stats
        .steps
        .iter()
        .filter(|s| s.completed > 0)
        .map(|s| {
            let suggested = (s.avg_duration_secs * 1.5) as u64;
            (s.step_id.clone(), suggested.max(60))
        })
        .collect()
}

/// Markdown report of global statistics, per-workflow analysis and patterns
pub fn render_learning_report(
    global: &GlobalStatistics,
    analyses: &[WorkflowAnalysis],
    patterns: &[TaskPattern],
    generated_at: DateTime<Utc>,
) -> String {
    let mut out = String::from("# Workflow Learning Report\n\n");
    out.push_str(&format!(
        "Generated: {}\n\n",
        generated_at.format("%Y-%m-%d %H:%M:%S")
    ));

    out.push_str("## Global Statistics\n\n");
    out.push_str(&format!("- **Total Executions**: {}\n", global.total_executions));
    out.push_str(&format!("- **Workflows Used**: {}\n", global.workflows_used));
    out.push_str(&format!(
        "- **Overall Success Rate**: {}\n",
        percent(global.success_rate)
    ));
    out.push_str(&format!(
        "- **Average Duration**: {}\n\n",
        format_duration(global.avg_duration_secs)
    ));

    if !global.most_used.is_empty() {
        out.push_str("## Most Used Workflows\n\n");
        for (name, count) in &global.most_used {
            out.push_str(&format!("1. **{}**: {} executions\n", name, count));
        }
        out.push('\n');
    }

    if !analyses.is_empty() {
        out.push_str("## Workflow Analysis\n\n");
        for analysis in analyses {
            let stats = &analysis.statistics;
            out.push_str(&format!("### {}\n\n", analysis.workflow_name));
            out.push_str(&format!("- **Executions**: {}\n", stats.total_executions));
            out.push_str(&format!("- **Success Rate**: {}\n", percent(stats.success_rate)));
            out.push_str(&format!(
                "- **Average Duration**: {}\n",
                format_duration(stats.avg_duration_secs)
            ));
            if !analysis.improvements.is_empty() {
                out.push_str(&format!(
                    "\n**Recommendations ({}):**\n\n",
                    analysis.improvements.len()
                ));
                for improvement in &analysis.improvements {
                    out.push_str(&format!("- {}\n", improvement.recommendation));
                }
            }
            out.push('\n');
        }
    }

    if !patterns.is_empty() {
        out.push_str("## Detected Task Patterns\n\n");
        out.push_str("These patterns could become new workflow templates:\n\n");
        for (i, pattern) in patterns.iter().enumerate() {
            out.push_str(&format!("### Pattern {}: {}\n\n", i + 1, pattern.keywords));
            out.push_str(&format!("- **Occurrences**: {}\n", pattern.occurrences));
            out.push_str(&format!("- **Success Rate**: {}\n", percent(pattern.success_rate)));
            out.push_str(&format!(
                "- **Agent Sequence**: {}\n",
                pattern.agent_sequence.join(" -> ")
            ));
            out.push_str("- **Sample Tasks**:\n");
            for task in &pattern.sample_tasks {
                out.push_str(&format!("  - {}\n", task));
            }
            out.push('\n');
        }
    }
    out
}
