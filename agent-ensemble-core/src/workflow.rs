//! Workflow template model
//!
//! A template is a declarative, versioned list of steps, each owned by one
//! agent, with validation rules, quality gates and lifecycle hooks. Templates
//! are read-only while they execute. Steps always run in list order; a
//! `depends_on` entry must name an earlier step, which keeps list order a
//! valid topological order.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Scheduling hint for template listings
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum TemplatePriority {
    High,
    #[default]
    Medium,
    Low,
}

impl TemplatePriority {
    pub fn as_str(self) -> &'static str {
        match self {
            TemplatePriority::High => "high",
            TemplatePriority::Medium => "medium",
            TemplatePriority::Low => "low",
        }
    }
}

/// Declarative step list plus metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct WorkflowTemplate {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default)]
    pub task_types: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub agents_required: Vec<String>,
    #[serde(default)]
    pub agents_optional: Vec<String>,
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub hooks: WorkflowHooks,
    #[serde(default)]
    pub quality_gates: Vec<QualityGate>,
    #[serde(default)]
    pub priority: TemplatePriority,
    #[serde(default)]
    pub usage_count: u64,
    #[serde(default)]
    pub success_rate: f64,
    /// Seconds
    #[serde(default)]
    pub estimated_duration: u64,
}

fn default_required() -> bool {
    true
}

/// One agent invocation within a template
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct WorkflowStep {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub agent: String,
    #[serde(default)]
    pub action: String,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub validation: Vec<ValidationRule>,
    #[serde(default)]
    pub max_retries: u32,
    /// Seconds; the engine default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Artifact whose contents are prepended to the instructions on retry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback_from: Option<String>,
}

impl WorkflowStep {
    /// Display name, falling back to the id
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// Post-invocation check on produced artifacts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValidationRule {
    OutputExists { file: String },
    MinLines { file: String, value: usize },
    MinSize { file: String, bytes: u64 },
    SyntaxValid { file: String, language: SyntaxLanguage },
    Custom { check: String },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyntaxLanguage {
    Html,
    Json,
    Yaml,
    Markdown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GateKind {
    /// Blocks for external approval
    #[default]
    Manual,
    /// Evaluates a condition
    Automatic,
}

/// Pass/fail checkpoint evaluated after a named step completes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct QualityGate {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub after_step: String,
    #[serde(rename = "type", default)]
    pub kind: GateKind,
    #[serde(default)]
    pub condition: String,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct HookAction {
    pub action: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct WorkflowHooks {
    #[serde(default)]
    pub pre_workflow: Vec<HookAction>,
    #[serde(default)]
    pub post_workflow: Vec<HookAction>,
    #[serde(default)]
    pub on_error: Vec<HookAction>,
}

/// Structural check result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TemplateReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl TemplateReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Coarse relevance band for a template match
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Relevance {
    High,
    Medium,
    Low,
}

impl Relevance {
    pub fn from_score(score: u32) -> Self {
        if score >= 10 {
            Relevance::High
        } else if score >= 5 {
            Relevance::Medium
        } else {
            Relevance::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemplateMatch {
    pub template: WorkflowTemplate,
    pub score: u32,
    pub relevance: Relevance,
}

impl WorkflowTemplate {
    /// Parse a template document without structural checks
    pub fn from_yaml(document: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(document)?)
    }

    /// Parse and reject documents with structural errors
    pub fn parse(document: &str) -> Result<Self> {
        let template = Self::from_yaml(document)?;
        let report = template.validate();
        if !report.is_valid() {
            return Err(Error::validation(format!(
                "Invalid workflow template '{}': {}",
                template.name,
                report.errors.join("; ")
            )));
        }
        Ok(template)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    pub fn step(&self, id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Quality gates attached to the given step, in declaration order
    pub fn gates_after<'a>(&'a self, step_id: &'a str) -> impl Iterator<Item = &'a QualityGate> {
        self.quality_gates
            .iter()
            .filter(move |g| g.after_step == step_id)
    }

    /// Distinct agent names referenced by steps, in first-use order
    pub fn step_agents(&self) -> Vec<String> {
        let mut agents: Vec<String> = Vec::new();
        for step in &self.steps {
            if !agents.contains(&step.agent) {
                agents.push(step.agent.clone());
            }
        }
        agents
    }

    /// Structural validation: required fields, unique ids, backward-only
    /// dependencies and gates attached to existing steps.
    pub fn validate(&self) -> TemplateReport {
        let mut report = TemplateReport::default();

        for (field, value) in [
            ("name", &self.name),
            ("version", &self.version),
            ("description", &self.description),
        ] {
            if value.trim().is_empty() {
                report
                    .errors
                    .push(format!("Missing required field: {}", field));
            }
        }
        if self.steps.is_empty() {
            report.warnings.push("No steps defined".to_string());
        }

        let mut seen: Vec<&str> = Vec::new();
        for (index, step) in self.steps.iter().enumerate() {
            let label = if step.id.is_empty() {
                format!("Step {}", index)
            } else {
                format!("Step {} ({})", index, step.id)
            };

            if step.id.trim().is_empty() {
                report.errors.push(format!("{}: Missing 'id' field", label));
            } else if seen.contains(&step.id.as_str()) {
                report
                    .errors
                    .push(format!("{}: Duplicate step ID '{}'", label, step.id));
            }
            if step.agent.trim().is_empty() {
                report.errors.push(format!("{}: Missing 'agent' field", label));
            }
            if step.action.trim().is_empty() {
                report
                    .errors
                    .push(format!("{}: Missing 'action' field", label));
            }
            for dependency in &step.depends_on {
                if !seen.contains(&dependency.as_str()) {
                    report.errors.push(format!(
                        "{}: Dependency '{}' does not name an earlier step",
                        label, dependency
                    ));
                }
            }
            if !step.id.is_empty() {
                seen.push(step.id.as_str());
            }
        }

        for gate in &self.quality_gates {
            if !seen.contains(&gate.after_step.as_str()) {
                report.errors.push(format!(
                    "Quality gate '{}': unknown step '{}'",
                    gate.name, gate.after_step
                ));
            }
        }

        report
    }

    /// Step agents that are not present in the given directory listing
    pub fn unknown_agents(&self, known: &[String]) -> Vec<String> {
        self.step_agents()
            .into_iter()
            .filter(|a| !known.contains(a))
            .collect()
    }

    /// Relevance of this template to a task description.
    ///
    /// +10 per task type mentioned, +5 when the name (dashes as spaces)
    /// appears, +2 when any description word appears, +3 per tag mentioned.
    pub fn match_score(&self, task: &str) -> u32 {
        let task = task.to_lowercase();
        let task_words: Vec<&str> = task
            .split(|c: char| !c.is_alphanumeric() && c != '_' && c != '-')
            .filter(|w| !w.is_empty())
            .collect();
        let mut score = 0;

        for task_type in &self.task_types {
            let task_type = task_type.to_lowercase();
            if !task_type.is_empty()
                && (task.contains(&task_type) || task.contains(&task_type.replace('_', " ")))
            {
                score += 10;
            }
        }

        let name = self.name.to_lowercase().replace('-', " ");
        if !name.trim().is_empty() && task.contains(&name) {
            score += 5;
        }

        let description = self.description.to_lowercase();
        if description
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
            .filter(|w| w.chars().count() >= 3)
            .any(|w| task_words.contains(&w))
        {
            score += 2;
        }

        for tag in &self.tags {
            let tag = tag.to_lowercase();
            if !tag.is_empty() && task.contains(&tag) {
                score += 3;
            }
        }

        score
    }
}

/// Score every template and return the non-zero matches, best first
pub fn match_templates(templates: &[WorkflowTemplate], task: &str) -> Vec<TemplateMatch> {
    let mut matches: Vec<TemplateMatch> = templates
        .iter()
        .filter_map(|template| {
            let score = template.match_score(task);
            (score > 0).then(|| TemplateMatch {
                template: template.clone(),
                score,
                relevance: Relevance::from_score(score),
            })
        })
        .collect();
    matches.sort_by(|a, b| b.score.cmp(&a.score));
    matches
}
