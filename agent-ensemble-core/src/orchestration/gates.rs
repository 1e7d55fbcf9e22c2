//! Step approval and quality gates

use std::path::Path;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::execution::{StepExecution, WorkflowExecution};
use crate::workflow::{GateKind, QualityGate, WorkflowStep};

/// Decides whether a step may run and whether a manual gate passes
#[async_trait]
pub trait Approver: Send + Sync {
    async fn approve_step(&self, step: &WorkflowStep) -> bool;

    async fn approve_gate(&self, gate: &QualityGate) -> bool;
}

/// Unattended mode: every step and every manual gate is approved
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprover;

#[async_trait]
impl Approver for AutoApprover {
    async fn approve_step(&self, _step: &WorkflowStep) -> bool {
        true
    }

    async fn approve_gate(&self, gate: &QualityGate) -> bool {
        info!("Auto-approving quality gate: {}", gate.name);
        true
    }
}

/// Parsed automatic gate condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateCondition {
    Always,
    ValidationPassed,
    NoFailedSteps,
    OutputsExist,
    FileExists(String),
    FileContains { path: String, text: String },
    FileLacks { path: String, text: String },
    Unknown(String),
}

impl GateCondition {
    pub fn parse(condition: &str) -> Self {
        let condition = condition.trim();
        match condition {
            "" | "always" => return GateCondition::Always,
            "validation_passed" => return GateCondition::ValidationPassed,
            "no_failed_steps" => return GateCondition::NoFailedSteps,
            "outputs_exist" => return GateCondition::OutputsExist,
            _ => {}
        }
        if let Some(path) = condition.strip_prefix("file_exists:") {
            return GateCondition::FileExists(path.trim().to_string());
        }
        let file_text = |rest: &str| {
            rest.split_once(':')
                .map(|(path, text)| (path.trim().to_string(), text.to_string()))
        };
        if let Some((path, text)) = condition.strip_prefix("file_contains:").and_then(file_text) {
            return GateCondition::FileContains { path, text };
        }
        if let Some((path, text)) = condition.strip_prefix("file_lacks:").and_then(file_text) {
            return GateCondition::FileLacks { path, text };
        }
        GateCondition::Unknown(condition.to_string())
    }
}

/// What an automatic gate can observe
#[derive(Debug, Clone, Copy)]
pub struct GateContext<'a> {
    pub execution: &'a WorkflowExecution,
    /// Record of the step the gate follows
    pub step: Option<&'a StepExecution>,
    /// Outputs the step declared
    pub expected_outputs: &'a [String],
    pub working_dir: &'a Path,
}

impl GateCondition {
    pub async fn evaluate(&self, ctx: &GateContext<'_>) -> bool {
        match self {
            GateCondition::Always => true,
            GateCondition::ValidationPassed => ctx.step.is_some_and(|s| s.validation_passed),
            GateCondition::NoFailedSteps => ctx.execution.failed_steps == 0,
            GateCondition::OutputsExist => {
                for output in ctx.expected_outputs {
                    if !exists(ctx.working_dir, output).await {
                        return false;
                    }
                }
                true
            }
            GateCondition::FileExists(path) => exists(ctx.working_dir, path).await,
            GateCondition::FileContains { path, text } => {
                matches!(read(ctx.working_dir, path).await, Some(content) if content.contains(text.as_str()))
            }
            GateCondition::FileLacks { path, text } => {
                matches!(read(ctx.working_dir, path).await, Some(content) if !content.contains(text.as_str()))
            }
            GateCondition::Unknown(raw) => {
                warn!("Unknown quality gate condition '{}'; treating as failed", raw);
                false
            }
        }
    }
}

async fn exists(dir: &Path, file: &str) -> bool {
    tokio::fs::try_exists(dir.join(file)).await.unwrap_or(false)
}

async fn read(dir: &Path, file: &str) -> Option<String> {
    tokio::fs::read_to_string(dir.join(file)).await.ok()
}

/// Result of evaluating one gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateDecision {
    pub passed: bool,
    /// Decided by the approver rather than a condition
    pub manual: bool,
}

/// Evaluate a gate: manual gates ask the approver, automatic gates check
/// their condition.
pub async fn evaluate_gate(
    gate: &QualityGate,
    ctx: &GateContext<'_>,
    approver: &dyn Approver,
) -> GateDecision {
    match gate.kind {
        GateKind::Manual => GateDecision {
            passed: approver.approve_gate(gate).await,
            manual: true,
        },
        GateKind::Automatic => GateDecision {
            passed: GateCondition::parse(&gate.condition).evaluate(ctx).await,
            manual: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Rejecting;

    #[async_trait]
    impl Approver for Rejecting {
        async fn approve_step(&self, _step: &WorkflowStep) -> bool {
            false
        }

        async fn approve_gate(&self, _gate: &QualityGate) -> bool {
            false
        }
    }

    fn gate(kind: GateKind, condition: &str) -> QualityGate {
        QualityGate {
            name: "review".to_string(),
            after_step: "build".to_string(),
            kind,
            condition: condition.to_string(),
            required: true,
            ..QualityGate::default()
        }
    }

    #[test]
    fn test_parse_conditions() {
        assert_eq!(GateCondition::parse(""), GateCondition::Always);
        assert_eq!(GateCondition::parse(" always "), GateCondition::Always);
        assert_eq!(
            GateCondition::parse("validation_passed"),
            GateCondition::ValidationPassed
        );
        assert_eq!(
            GateCondition::parse("file_exists: dist/index.html"),
            GateCondition::FileExists("dist/index.html".to_string())
        );
        assert_eq!(
            GateCondition::parse("file_contains:QA_REPORT.md:PASS: all"),
            GateCondition::FileContains {
                path: "QA_REPORT.md".to_string(),
                text: "PASS: all".to_string()
            }
        );
        assert_eq!(
            GateCondition::parse("file_lacks:log.txt:ERROR"),
            GateCondition::FileLacks {
                path: "log.txt".to_string(),
                text: "ERROR".to_string()
            }
        );
        assert_eq!(
            GateCondition::parse("file_contains:no-separator"),
            GateCondition::Unknown("file_contains:no-separator".to_string())
        );
        assert_eq!(
            GateCondition::parse("coverage > 80"),
            GateCondition::Unknown("coverage > 80".to_string())
        );
    }

    #[tokio::test]
    async fn test_automatic_conditions() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("QA_REPORT.md"), "All tests PASS").unwrap();

        let mut execution = WorkflowExecution::new("wf", "1.0.0", "task", 2);
        execution.start_step("build", "Build", "code_writer").unwrap();
        execution
            .complete_step("build", vec!["QA_REPORT.md".into()], false, vec!["x".into()])
            .unwrap();
        let expected = vec!["QA_REPORT.md".to_string()];
        let ctx = GateContext {
            execution: &execution,
            step: execution.step("build"),
            expected_outputs: &expected,
            working_dir: dir.path(),
        };

        assert!(GateCondition::Always.evaluate(&ctx).await);
        assert!(!GateCondition::ValidationPassed.evaluate(&ctx).await);
        assert!(GateCondition::NoFailedSteps.evaluate(&ctx).await);
        assert!(GateCondition::OutputsExist.evaluate(&ctx).await);
        assert!(GateCondition::parse("file_contains:QA_REPORT.md:PASS").evaluate(&ctx).await);
        assert!(!GateCondition::parse("file_lacks:QA_REPORT.md:PASS").evaluate(&ctx).await);
        assert!(!GateCondition::parse("file_contains:missing.md:PASS").evaluate(&ctx).await);
        assert!(!GateCondition::parse("file_exists:missing.md").evaluate(&ctx).await);
        assert!(!GateCondition::parse("mystery").evaluate(&ctx).await);
    }

    #[tokio::test]
    async fn test_manual_gates_use_approver() {
        let dir = TempDir::new().unwrap();
        let execution = WorkflowExecution::new("wf", "1.0.0", "task", 1);
        let ctx = GateContext {
            execution: &execution,
            step: None,
            expected_outputs: &[],
            working_dir: dir.path(),
        };
        let manual = gate(GateKind::Manual, "");

        let approved = evaluate_gate(&manual, &ctx, &AutoApprover).await;
        assert_eq!(approved, GateDecision { passed: true, manual: true });

        let rejected = evaluate_gate(&manual, &ctx, &Rejecting).await;
        assert_eq!(rejected, GateDecision { passed: false, manual: true });

        let automatic = evaluate_gate(&gate(GateKind::Automatic, "no_failed_steps"), &ctx, &Rejecting).await;
        assert_eq!(automatic, GateDecision { passed: true, manual: false });
    }
}
