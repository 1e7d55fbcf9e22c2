//! Aggregate statistics over finalized executions
//!
//! Statistics are computed on demand from the persisted records; nothing is
//! maintained incrementally. Rates are fractions in `[0, 1]`.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::execution::{ExecutionStatus, StepStatus, WorkflowExecution};

/// Per-step aggregate within one workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepStatistics {
    pub step_id: String,
    pub step_name: String,
    pub agent: String,
    pub executions: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub success_rate: f64,
    /// Mean over completed runs
    pub avg_duration_secs: f64,
}

impl StepStatistics {
    pub fn failure_rate(&self) -> f64 {
        ratio(self.failed, self.executions)
    }

    pub fn skip_rate(&self) -> f64 {
        ratio(self.skipped, self.executions)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowStatistics {
    pub workflow_name: String,
    pub total_executions: usize,
    pub completed: usize,
    pub partial: usize,
    pub failed: usize,
    /// Completed executions over all executions
    pub success_rate: f64,
    pub total_duration_secs: f64,
    pub avg_duration_secs: f64,
    pub last_execution: Option<DateTime<Utc>>,
    /// In order of first appearance
    pub steps: Vec<StepStatistics>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GlobalStatistics {
    pub total_executions: usize,
    pub workflows_used: usize,
    pub success_rate: f64,
    pub total_duration_secs: f64,
    pub avg_duration_secs: f64,
    /// Up to five, most executions first, ties by name
    pub most_used: Vec<(String, usize)>,
    pub executions_per_workflow: BTreeMap<String, usize>,
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Statistics for one workflow, or `None` when it has no records
pub fn workflow_statistics(
    workflow_name: &str,
    records: &[WorkflowExecution],
) -> Option<WorkflowStatistics> {
    let runs: Vec<&WorkflowExecution> = records
        .iter()
        .filter(|e| e.workflow_name == workflow_name)
        .collect();
    if runs.is_empty() {
        return None;
    }

    let count = |status: ExecutionStatus| runs.iter().filter(|e| e.status == status).count();
    let total = runs.len();
    let completed = count(ExecutionStatus::Completed);
    let total_duration_secs: f64 = runs.iter().map(|e| e.duration_secs).sum();

    let mut order: Vec<String> = Vec::new();
    let mut by_step: HashMap<String, (StepStatistics, f64)> = HashMap::new();
    for step in runs.iter().flat_map(|e| e.steps.iter()) {
        let (stats, completed_duration) = by_step.entry(step.step_id.clone()).or_insert_with(|| {
            order.push(step.step_id.clone());
            (
                StepStatistics {
                    step_id: step.step_id.clone(),
                    step_name: step.step_name.clone(),
                    agent: step.agent.clone(),
                    executions: 0,
                    completed: 0,
                    failed: 0,
                    skipped: 0,
                    success_rate: 0.0,
                    avg_duration_secs: 0.0,
                },
                0.0,
            )
        });
        stats.executions += 1;
        match step.status {
            StepStatus::Completed => {
                stats.completed += 1;
                *completed_duration += step.duration_secs;
            }
            StepStatus::Failed => stats.failed += 1,
            StepStatus::Skipped => stats.skipped += 1,
            StepStatus::Pending | StepStatus::Running => {}
        }
    }

    let steps = order
        .into_iter()
        .filter_map(|id| by_step.remove(&id))
        .map(|(mut stats, completed_duration)| {
            stats.success_rate = ratio(stats.completed, stats.executions);
            if stats.completed > 0 {
                stats.avg_duration_secs = completed_duration / stats.completed as f64;
            }
            stats
        })
        .collect();

    Some(WorkflowStatistics {
        workflow_name: workflow_name.to_string(),
        total_executions: total,
        completed,
        partial: count(ExecutionStatus::Partial),
        failed: count(ExecutionStatus::Failed),
        success_rate: ratio(completed, total),
        total_duration_secs,
        avg_duration_secs: total_duration_secs / total as f64,
        last_execution: runs.iter().map(|e| e.started_at).max(),
        steps,
    })
}

pub fn global_statistics(records: &[WorkflowExecution]) -> GlobalStatistics {
    if records.is_empty() {
        return GlobalStatistics::default();
    }

    let mut executions_per_workflow: BTreeMap<String, usize> = BTreeMap::new();
    for record in records {
        *executions_per_workflow
            .entry(record.workflow_name.clone())
            .or_default() += 1;
    }

    let mut most_used: Vec<(String, usize)> = executions_per_workflow
        .iter()
        .map(|(name, count)| (name.clone(), *count))
        .collect();
    // BTreeMap iteration is name-ordered and the sort is stable.
    most_used.sort_by(|a, b| b.1.cmp(&a.1));
    most_used.truncate(5);

    let total = records.len();
    let completed = records
        .iter()
        .filter(|e| e.status == ExecutionStatus::Completed)
        .count();
    let total_duration_secs: f64 = records.iter().map(|e| e.duration_secs).sum();

    GlobalStatistics {
        total_executions: total,
        workflows_used: executions_per_workflow.len(),
        success_rate: ratio(completed, total),
        total_duration_secs,
        avg_duration_secs: total_duration_secs / total as f64,
        most_used,
        executions_per_workflow,
    }
}

/// Compact human-readable duration: `42.0s`, `3m 5s`, `2h 10m`
pub fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        format!("{:.1}s", seconds)
    } else if seconds < 3600.0 {
        let minutes = (seconds / 60.0).floor();
        format!("{}m {:.0}s", minutes as u64, seconds - minutes * 60.0)
    } else {
        let hours = (seconds / 3600.0).floor() as u64;
        let minutes = ((seconds % 3600.0) / 60.0).floor() as u64;
        format!("{}h {}m", hours, minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Finalized record with steps driven to the given outcomes
    fn record(
        workflow: &str,
        task: &str,
        steps: &[(&str, &str, StepStatus)],
    ) -> WorkflowExecution {
        let mut execution = WorkflowExecution::new(workflow, "1.0.0", task, steps.len());
        for (id, agent, status) in steps {
            match status {
                StepStatus::Completed => {
                    execution.start_step(id, id, agent).unwrap();
                    execution.complete_step(id, vec![], true, vec![]).unwrap();
                }
                StepStatus::Failed => {
                    execution.start_step(id, id, agent).unwrap();
                    execution.fail_step(id, "boom", vec![]).unwrap();
                }
                StepStatus::Skipped => execution.skip_step(id, id, agent, "skip").unwrap(),
                _ => {}
            }
        }
        execution.finalize().unwrap();
        execution
    }

    #[test]
    fn test_workflow_statistics() {
        use StepStatus::*;
        let mut records = vec![
            record("web", "a", &[("design", "researcher", Completed), ("build", "code_writer", Completed)]),
            record("web", "b", &[("design", "researcher", Completed), ("build", "code_writer", Failed)]),
            record("web", "c", &[("design", "researcher", Failed)]),
            record("other", "d", &[("x", "tester", Completed)]),
        ];
        records[0].duration_secs = 10.0;
        records[1].duration_secs = 20.0;
        records[2].duration_secs = 30.0;
        records[0].steps[0].duration_secs = 4.0;
        records[1].steps[0].duration_secs = 6.0;

        let stats = workflow_statistics("web", &records).unwrap();
        assert_eq!(stats.total_executions, 3);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.partial, 1);
        assert_eq!(stats.failed, 1);
        assert!((stats.success_rate - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.total_duration_secs, 60.0);
        assert_eq!(stats.avg_duration_secs, 20.0);
        assert_eq!(stats.last_execution, Some(records[2].started_at));

        let ids: Vec<&str> = stats.steps.iter().map(|s| s.step_id.as_str()).collect();
        assert_eq!(ids, vec!["design", "build"]);
        let design = &stats.steps[0];
        assert_eq!((design.executions, design.completed, design.failed), (3, 2, 1));
        assert_eq!(design.avg_duration_secs, 5.0);
        assert!((design.failure_rate() - 1.0 / 3.0).abs() < 1e-9);
        let build = &stats.steps[1];
        assert_eq!(build.success_rate, 0.5);
        assert_eq!(build.agent, "code_writer");

        assert!(workflow_statistics("missing", &records).is_none());
    }

    #[test]
    fn test_global_statistics() {
        use StepStatus::*;
        let records = vec![
            record("b-flow", "1", &[("s", "tester", Completed)]),
            record("a-flow", "2", &[("s", "tester", Completed)]),
            record("b-flow", "3", &[("s", "tester", Failed)]),
            record("c-flow", "4", &[("s", "tester", Completed)]),
        ];
        let stats = global_statistics(&records);
        assert_eq!(stats.total_executions, 4);
        assert_eq!(stats.workflows_used, 3);
        assert_eq!(stats.success_rate, 0.75);
        assert_eq!(
            stats.most_used,
            vec![
                ("b-flow".to_string(), 2),
                ("a-flow".to_string(), 1),
                ("c-flow".to_string(), 1)
            ]
        );
        assert_eq!(stats.executions_per_workflow["b-flow"], 2);

        assert_eq!(global_statistics(&[]), GlobalStatistics::default());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(42.04), "42.0s");
        assert_eq!(format_duration(185.0), "3m 5s");
        assert_eq!(format_duration(7800.0), "2h 10m");
    }
}
