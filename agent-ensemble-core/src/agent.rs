//! Agent domain model and related types
//!
//! Agents are capability-tagged workers. Each one carries the instruction
//! text handed to the external executor, an allow-list of tools, a skill
//! tier and a rolling performance aggregate that feeds back into selection.
//!
//! # Examples
//!
//! ```rust
//! use agent_ensemble_core::agent::*;
//!
//! let agent = Agent::builder()
//!     .name("rust_writer")
//!     .description("Writes idiomatic Rust")
//!     .capability("implementation")
//!     .capability("rust")
//!     .tool("Read")
//!     .tool("Edit")
//!     .build()
//!     .unwrap();
//!
//! assert!(agent.has_capability("Rust"));
//! assert_eq!(agent.success_rate(), 0.0);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Model identifier used when a definition does not name one
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";

/// A capability-tagged worker definition plus its performance history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Agent {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub tools: Vec<String>,
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub instructions: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub skill_level: SkillLevel,
    #[serde(default)]
    pub metrics: AgentMetrics,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

/// Ordered proficiency tier, promoted automatically from performance history
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum SkillLevel {
    #[default]
    Novice,
    Intermediate,
    Expert,
    Master,
}

impl SkillLevel {
    /// Weight applied to capability overlap when ranking candidates
    pub fn score_multiplier(self) -> f64 {
        match self {
            SkillLevel::Novice => 1.0,
            SkillLevel::Intermediate => 1.2,
            SkillLevel::Expert => 1.5,
            SkillLevel::Master => 2.0,
        }
    }

    /// Weight applied when estimating assignment confidence
    pub fn confidence_multiplier(self) -> f64 {
        match self {
            SkillLevel::Novice => 0.8,
            SkillLevel::Intermediate => 1.0,
            SkillLevel::Expert => 1.2,
            SkillLevel::Master => 1.5,
        }
    }

    /// Next tier earned by the given record, if any.
    ///
    /// Thresholds are checked from the highest tier down and only ever move
    /// one step up from the current tier.
    pub fn promotion(self, total_tasks: u64, success_rate: f64) -> Option<SkillLevel> {
        if total_tasks >= 50 && success_rate >= 90.0 && self == SkillLevel::Expert {
            Some(SkillLevel::Master)
        } else if total_tasks >= 20 && success_rate >= 85.0 && self == SkillLevel::Intermediate {
            Some(SkillLevel::Expert)
        } else if total_tasks >= 5 && success_rate >= 75.0 && self == SkillLevel::Novice {
            Some(SkillLevel::Intermediate)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SkillLevel::Novice => "novice",
            SkillLevel::Intermediate => "intermediate",
            SkillLevel::Expert => "expert",
            SkillLevel::Master => "master",
        }
    }
}

impl std::fmt::Display for SkillLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rolling performance aggregate for one agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AgentMetrics {
    pub total_tasks: u64,
    pub successful_tasks: u64,
    pub failed_tasks: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub avg_completion_secs: f64,
    pub last_used: Option<DateTime<Utc>>,
}

/// Outcome of one finished task, as reported back to the directory
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaskOutcome {
    pub success: bool,
    pub tokens: u64,
    pub cost: f64,
    pub duration_secs: f64,
}

impl TaskOutcome {
    pub fn new(success: bool, tokens: u64, cost: f64, duration_secs: f64) -> Self {
        Self {
            success,
            tokens,
            cost,
            duration_secs,
        }
    }
}

impl AgentMetrics {
    /// Percentage of successful tasks, 0 when nothing has run yet
    pub fn success_rate(&self) -> f64 {
        if self.total_tasks == 0 {
            0.0
        } else {
            self.successful_tasks as f64 / self.total_tasks as f64 * 100.0
        }
    }

    /// Fold one task outcome into the aggregate
    pub fn record(&mut self, outcome: &TaskOutcome) {
        self.total_tasks += 1;
        if outcome.success {
            self.successful_tasks += 1;
        } else {
            self.failed_tasks += 1;
        }
        self.total_tokens += outcome.tokens;
        self.total_cost += outcome.cost;

        let n = self.total_tasks as f64;
        self.avg_completion_secs =
            (self.avg_completion_secs * (n - 1.0) + outcome.duration_secs) / n;
        self.last_used = Some(Utc::now());
    }
}

impl Agent {
    /// Create a new agent instance with validation
    pub fn new(name: String, capabilities: Vec<String>) -> Result<Self> {
        Self::validate_name(&name)?;
        Self::validate_capabilities(&capabilities)?;

        Ok(Self {
            name,
            description: String::new(),
            role: String::new(),
            tools: Vec::new(),
            capabilities,
            instructions: String::new(),
            model: default_model(),
            skill_level: SkillLevel::Novice,
            metrics: AgentMetrics::default(),
        })
    }

    /// Create a builder for constructing an Agent
    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    /// Re-run the load-time checks on an agent that was deserialized directly
    pub fn validate(&self) -> Result<()> {
        Self::validate_name(&self.name)?;
        Self::validate_capabilities(&self.capabilities)
    }

    fn validate_name(name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(Error::validation("Agent name cannot be empty"));
        }
        if name.len() > 100 {
            return Err(Error::constraint_violation(
                "name_length",
                "Agent name cannot exceed 100 characters",
            ));
        }
        if !name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::validation(
                "Agent name can only contain alphanumeric characters, hyphens, and underscores",
            ));
        }
        Ok(())
    }

    fn validate_capabilities(capabilities: &[String]) -> Result<()> {
        if capabilities.is_empty() {
            return Err(Error::constraint_violation(
                "min_capabilities",
                "Agent must have at least one capability",
            ));
        }
        for capability in capabilities {
            if capability.trim().is_empty() {
                return Err(Error::validation("Capability cannot be empty"));
            }
            if capability.len() > 50 {
                return Err(Error::constraint_violation(
                    "capability_length",
                    "Capability name cannot exceed 50 characters",
                ));
            }
        }
        Ok(())
    }

    /// Check if the agent has a specific capability (case-insensitive)
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities
            .iter()
            .any(|c| c.eq_ignore_ascii_case(capability))
    }

    /// Number of distinct required capabilities this agent declares
    pub fn capability_overlap(&self, required: &[String]) -> usize {
        let mut seen: Vec<String> = Vec::with_capacity(required.len());
        for capability in required {
            let lowered = capability.to_lowercase();
            if !seen.contains(&lowered) && self.has_capability(&lowered) {
                seen.push(lowered);
            }
        }
        seen.len()
    }

    pub fn success_rate(&self) -> f64 {
        self.metrics.success_rate()
    }

    /// Record a finished task and apply any earned promotion.
    ///
    /// Returns the new tier when a promotion happened. Tiers never decrease.
    pub fn record_outcome(&mut self, outcome: &TaskOutcome) -> Option<SkillLevel> {
        self.metrics.record(outcome);
        let promoted = self
            .skill_level
            .promotion(self.metrics.total_tasks, self.metrics.success_rate())?;
        self.skill_level = promoted;
        Some(promoted)
    }

    /// Instruction text for the executor, falling back to a one-line persona
    pub fn persona(&self) -> String {
        if self.instructions.trim().is_empty() {
            format!("You are {}: {}", self.name, self.description)
        } else {
            self.instructions.clone()
        }
    }
}

/// Builder for constructing Agent instances with validation
#[derive(Debug, Clone, Default)]
pub struct AgentBuilder {
    name: Option<String>,
    description: String,
    role: String,
    tools: Vec<String>,
    capabilities: Vec<String>,
    instructions: String,
    model: Option<String>,
    skill_level: SkillLevel,
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = description.into();
        self
    }

    pub fn role<S: Into<String>>(mut self, role: S) -> Self {
        self.role = role.into();
        self
    }

    pub fn tool<S: Into<String>>(mut self, tool: S) -> Self {
        self.tools.push(tool.into());
        self
    }

    pub fn tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools.extend(tools.into_iter().map(Into::into));
        self
    }

    pub fn capability<S: Into<String>>(mut self, capability: S) -> Self {
        self.capabilities.push(capability.into());
        self
    }

    pub fn capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities
            .extend(capabilities.into_iter().map(Into::into));
        self
    }

    pub fn instructions<S: Into<String>>(mut self, instructions: S) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn model<S: Into<String>>(mut self, model: S) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn skill_level(mut self, skill_level: SkillLevel) -> Self {
        self.skill_level = skill_level;
        self
    }

    /// Build the Agent instance
    pub fn build(self) -> Result<Agent> {
        let name = self
            .name
            .ok_or_else(|| Error::validation("Agent name is required"))?;

        let mut agent = Agent::new(name, self.capabilities)?;
        agent.description = self.description;
        agent.role = self.role;
        agent.tools = self.tools;
        agent.instructions = self.instructions;
        if let Some(model) = self.model {
            agent.model = model;
        }
        agent.skill_level = self.skill_level;
        Ok(agent)
    }
}

fn roster_entry(
    name: &str,
    description: &str,
    role: &str,
    tools: &[&str],
    capabilities: &[&str],
    instructions: &str,
) -> Agent {
    Agent {
        name: name.to_string(),
        description: description.to_string(),
        role: role.to_string(),
        tools: tools.iter().map(|t| t.to_string()).collect(),
        capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
        instructions: instructions.to_string(),
        model: default_model(),
        skill_level: SkillLevel::Novice,
        metrics: AgentMetrics::default(),
    }
}

/// Built-in specialists used to seed an empty registry
pub fn default_roster() -> Vec<Agent> {
    vec![
        roster_entry(
            "code_analyst",
            "Expert in code analysis, architecture review, and refactoring recommendations",
            "Analyzes code structure, identifies issues, suggests improvements",
            &["Read", "Grep", "Glob"],
            &[
                "code_review",
                "architecture",
                "python",
                "javascript",
                "typescript",
                "refactoring",
                "best_practices",
            ],
            "You are an expert code analyst. Assess architecture, code quality and \
             technical debt, and give specific, actionable recommendations with file \
             paths and line numbers.",
        ),
        roster_entry(
            "code_writer",
            "Implements features, fixes bugs, and writes clean, maintainable code",
            "Writes and modifies code based on specifications",
            &["Read", "Write", "Edit", "Glob"],
            &[
                "implementation",
                "python",
                "javascript",
                "typescript",
                "bug_fixing",
                "feature_development",
            ],
            "You are an expert software developer. Follow the existing code style, fix \
             bugs with minimal changes and implement features with proper error handling.",
        ),
        roster_entry(
            "tester",
            "Runs tests, validates functionality, and ensures quality",
            "Executes test suites and validates code quality",
            &["Bash", "Read", "Grep"],
            &["testing", "qa", "validation", "pytest", "jest", "unittest"],
            "You are a quality assurance specialist. Run the test suites, analyze \
             failures and untested paths, and summarize results with concrete fixes.",
        ),
        roster_entry(
            "researcher",
            "Gathers information, researches best practices, and finds documentation",
            "Conducts research and information gathering",
            &["WebSearch", "WebFetch", "Read", "Write"],
            &[
                "research",
                "documentation",
                "best_practices",
                "libraries",
                "apis",
            ],
            "You are a research specialist. Find relevant documentation, compare \
             libraries and cite your sources with actionable conclusions.",
        ),
        roster_entry(
            "devops",
            "Handles builds, deployments, environment setup, and infrastructure",
            "Manages development operations and infrastructure",
            &["Bash", "Read", "Write", "Edit"],
            &[
                "devops",
                "deployment",
                "docker",
                "ci_cd",
                "build",
                "environment",
            ],
            "You are a DevOps engineer. Keep builds and deployments reliable and \
             reproducible and document every setup step.",
        ),
        roster_entry(
            "docs_writer",
            "Creates clear, comprehensive documentation and guides",
            "Writes technical documentation",
            &["Read", "Write", "Glob"],
            &[
                "documentation",
                "technical_writing",
                "markdown",
                "tutorials",
                "api_docs",
            ],
            "You are a technical documentation specialist. Write for the target \
             audience in well-structured markdown with practical examples.",
        ),
    ]
}
