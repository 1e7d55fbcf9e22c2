//! Agent selection
//!
//! Ranks agents against a [`TaskAnalysis`] and produces ordered assignments:
//! one primary pick (best capability score, first registered wins ties),
//! then rule-based supporting and optional picks, capped at `max_agents`.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::agent::Agent;
use crate::directory::AgentDirectory;
use crate::task::{Complexity, TaskAnalysis, TaskClassifier, TaskType};

/// Upper bound for any confidence score
pub const MAX_CONFIDENCE: f64 = 0.95;

/// Role of an assignment within a dispatch
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentPriority {
    /// Does the core work
    Primary,
    /// Validates or reviews
    Supporting,
    /// Adds value if resources allow
    Optional,
}

impl AssignmentPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            AssignmentPriority::Primary => "primary",
            AssignmentPriority::Supporting => "supporting",
            AssignmentPriority::Optional => "optional",
        }
    }
}

impl std::fmt::Display for AssignmentPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scored pairing of a task with an agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentAssignment {
    pub agent: Agent,
    pub priority: AssignmentPriority,
    pub confidence: f64,
    pub reason: String,
}

/// Names of the agents the layered rules refer to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelectorConfig {
    /// Fallback when nothing overlaps the required capabilities
    pub generalist: String,
    /// Added to implementation, bug-fix and refactoring tasks
    pub tester: String,
    /// Added to complex tasks
    pub researcher: String,
    /// Added to medium and complex implementation tasks
    pub reviewer: String,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            generalist: "code_writer".to_string(),
            tester: "tester".to_string(),
            researcher: "researcher".to_string(),
            reviewer: "code_analyst".to_string(),
        }
    }
}

/// Capability-overlap ranking score used to choose the primary agent
pub fn match_score(agent: &Agent, required: &[String]) -> f64 {
    agent.capability_overlap(required) as f64
        * agent.skill_level.score_multiplier()
        * (agent.success_rate() / 100.0)
}

/// Confidence estimate for an assignment, always within `[0, 0.95]`
pub fn confidence(agent: &Agent, required: &[String]) -> f64 {
    let overlap_ratio = if required.is_empty() {
        0.5
    } else {
        let mut distinct: Vec<String> = required.iter().map(|c| c.to_lowercase()).collect();
        distinct.sort();
        distinct.dedup();
        agent.capability_overlap(&distinct) as f64 / distinct.len() as f64
    };
    let value = overlap_ratio
        * (agent.success_rate() / 100.0)
        * agent.skill_level.confidence_multiplier();
    value.clamp(0.0, MAX_CONFIDENCE)
}

/// Highest scoring agent with any overlap; earlier agents win exact ties
pub fn best_match<'a>(
    agents: &'a [Agent],
    required: &[String],
    exclude: &[String],
) -> Option<&'a Agent> {
    let mut best: Option<(&Agent, f64)> = None;
    for agent in agents {
        if exclude.contains(&agent.name) || agent.capability_overlap(required) == 0 {
            continue;
        }
        let score = match_score(agent, required);
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((agent, score)),
        }
    }
    best.map(|(agent, _)| agent)
}

/// Stateless selector; the directory is passed in per call
#[derive(Debug, Clone, Default)]
pub struct AgentSelector {
    classifier: TaskClassifier,
    config: SelectorConfig,
}

impl AgentSelector {
    pub fn new(classifier: TaskClassifier, config: SelectorConfig) -> Self {
        Self { classifier, config }
    }

    pub fn classifier(&self) -> &TaskClassifier {
        &self.classifier
    }

    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    /// Classify a description and select agents for it
    pub async fn select_for_task(
        &self,
        directory: &AgentDirectory,
        description: &str,
        max_agents: usize,
    ) -> (TaskAnalysis, Vec<AgentAssignment>) {
        let analysis = self.classifier.classify(description);
        let assignments = self.select(directory, &analysis, max_agents, &[]).await;
        (analysis, assignments)
    }

    /// Select against the current directory contents
    pub async fn select(
        &self,
        directory: &AgentDirectory,
        analysis: &TaskAnalysis,
        max_agents: usize,
        exclude: &[String],
    ) -> Vec<AgentAssignment> {
        let agents = directory.agents().await;
        self.select_from(&agents, analysis, max_agents, exclude)
    }

    /// Select from an agent snapshot.
    ///
    /// A `max_agents` of zero is treated as one. The result is empty only
    /// when every agent is excluded.
    pub fn select_from(
        &self,
        agents: &[Agent],
        analysis: &TaskAnalysis,
        max_agents: usize,
        exclude: &[String],
    ) -> Vec<AgentAssignment> {
        let limit = max_agents.max(1);
        let required = &analysis.required_capabilities;
        let mut taken: Vec<String> = exclude.to_vec();
        let mut assignments: Vec<AgentAssignment> = Vec::new();

        let primary = if required.is_empty() {
            None
        } else {
            best_match(agents, required, &taken)
        };

        match primary {
            Some(agent) => {
                let shown: Vec<&str> = required.iter().take(2).map(String::as_str).collect();
                assignments.push(AgentAssignment {
                    agent: agent.clone(),
                    priority: AssignmentPriority::Primary,
                    confidence: confidence(agent, required),
                    reason: format!("Best match for {}", shown.join(", ")),
                });
            }
            None => {
                let fallback = agents
                    .iter()
                    .find(|a| a.name == self.config.generalist && !taken.contains(&a.name))
                    .or_else(|| agents.iter().find(|a| !taken.contains(&a.name)));
                if let Some(agent) = fallback {
                    assignments.push(AgentAssignment {
                        agent: agent.clone(),
                        priority: AssignmentPriority::Primary,
                        confidence: 0.0,
                        reason: "No capability match; defaulting to general-purpose agent"
                            .to_string(),
                    });
                }
            }
        }
        taken.extend(assignments.iter().map(|a| a.agent.name.clone()));

        for (name, priority, fixed_confidence, reason) in self.supporting_rules(analysis) {
            if assignments.len() >= limit {
                break;
            }
            if taken.contains(&name) {
                continue;
            }
            if let Some(agent) = agents.iter().find(|a| a.name == name) {
                assignments.push(AgentAssignment {
                    agent: agent.clone(),
                    priority,
                    confidence: fixed_confidence,
                    reason: reason.to_string(),
                });
                taken.push(name);
            }
        }

        debug!(
            task_type = %analysis.task_type,
            selected = assignments.len(),
            "Selected agents"
        );
        assignments
    }

    fn supporting_rules(
        &self,
        analysis: &TaskAnalysis,
    ) -> Vec<(String, AssignmentPriority, f64, &'static str)> {
        let mut rules = Vec::new();
        if analysis.task_type.needs_validation() {
            rules.push((
                self.config.tester.clone(),
                AssignmentPriority::Supporting,
                0.8,
                "Validate implementation",
            ));
        }
        if analysis.complexity == Complexity::Complex {
            rules.push((
                self.config.researcher.clone(),
                AssignmentPriority::Optional,
                0.6,
                "Research best practices for complex task",
            ));
        }
        if analysis.task_type == TaskType::Implementation
            && analysis.complexity >= Complexity::Medium
        {
            rules.push((
                self.config.reviewer.clone(),
                AssignmentPriority::Supporting,
                0.7,
                "Review implementation quality",
            ));
        }
        rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{default_roster, SkillLevel, TaskOutcome};

    fn selector() -> AgentSelector {
        AgentSelector::default()
    }

    fn names(assignments: &[AgentAssignment]) -> Vec<&str> {
        assignments.iter().map(|a| a.agent.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_bug_fix_selects_writer_and_tester() {
        let directory = AgentDirectory::from_agents(default_roster());
        let (analysis, assignments) = selector()
            .select_for_task(&directory, "Fix bug in login flow", 3)
            .await;

        assert_eq!(analysis.task_type, TaskType::BugFixing);
        assert_eq!(names(&assignments), vec!["code_writer", "tester"]);
        assert_eq!(assignments[0].priority, AssignmentPriority::Primary);
        assert_eq!(assignments[0].reason, "Best match for bug_fixing, implementation");
        assert_eq!(assignments[1].priority, AssignmentPriority::Supporting);
        assert_eq!(assignments[1].confidence, 0.8);
    }

    #[test]
    fn test_ties_go_to_first_registered() {
        let agents = default_roster();
        let required = vec!["documentation".to_string()];
        // researcher and docs_writer both overlap once with zero history.
        assert_eq!(best_match(&agents, &required, &[]).unwrap().name, "researcher");
    }

    #[test]
    fn test_history_and_tier_influence_primary() {
        let mut agents = default_roster();
        let docs = agents.iter_mut().find(|a| a.name == "docs_writer").unwrap();
        docs.record_outcome(&TaskOutcome::new(true, 0, 0.0, 1.0));
        docs.skill_level = SkillLevel::Expert;

        let required = vec!["documentation".to_string()];
        assert_eq!(best_match(&agents, &required, &[]).unwrap().name, "docs_writer");
        let excluded = vec!["docs_writer".to_string()];
        assert_eq!(
            best_match(&agents, &required, &excluded).unwrap().name,
            "researcher"
        );
    }

    #[test]
    fn test_confidence_formula_and_cap() {
        let mut agent = default_roster().remove(1);
        let required = vec!["bug_fixing".to_string(), "implementation".to_string()];
        assert_eq!(confidence(&agent, &required), 0.0);

        agent.record_outcome(&TaskOutcome::new(true, 0, 0.0, 1.0));
        // 1.0 overlap * 1.0 success * 0.8 novice
        assert!((confidence(&agent, &required) - 0.8).abs() < 1e-9);

        agent.skill_level = SkillLevel::Master;
        assert_eq!(confidence(&agent, &required), MAX_CONFIDENCE);

        let half = vec!["bug_fixing".to_string(), "testing".to_string()];
        agent.skill_level = SkillLevel::Intermediate;
        assert!((confidence(&agent, &half) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_general_task_falls_back_to_generalist() {
        let agents = default_roster();
        let analysis = TaskClassifier::new().classify("Make the coffee");
        let assignments = selector().select_from(&agents, &analysis, 3, &[]);
        assert_eq!(names(&assignments), vec!["code_writer"]);
        assert_eq!(assignments[0].confidence, 0.0);
        assert_eq!(assignments[0].priority, AssignmentPriority::Primary);
    }

    #[test]
    fn test_fallback_when_generalist_missing() {
        let agents: Vec<Agent> = default_roster()
            .into_iter()
            .filter(|a| a.name != "code_writer")
            .collect();
        let analysis = TaskClassifier::new().classify("Make the coffee");
        let assignments = selector().select_from(&agents, &analysis, 3, &[]);
        assert_eq!(names(&assignments), vec!["code_analyst"]);
    }

    #[test]
    fn test_complex_implementation_fills_all_rules_within_cap() {
        let agents = default_roster();
        let analysis = TaskClassifier::new()
            .classify("Implement feature for distributed system architecture");
        assert_eq!(analysis.complexity, Complexity::Complex);

        let assignments = selector().select_from(&agents, &analysis, 5, &[]);
        assert_eq!(
            names(&assignments),
            vec!["code_writer", "tester", "researcher", "code_analyst"]
        );
        assert_eq!(assignments[2].priority, AssignmentPriority::Optional);

        let capped = selector().select_from(&agents, &analysis, 2, &[]);
        assert_eq!(names(&capped), vec!["code_writer", "tester"]);

        let zero = selector().select_from(&agents, &analysis, 0, &[]);
        assert_eq!(zero.len(), 1);
    }

    #[test]
    fn test_exclusions_apply_to_supporting_rules() {
        let agents = default_roster();
        let analysis = TaskClassifier::new().classify("Fix bug in login flow");
        let exclude = vec!["tester".to_string()];
        let assignments = selector().select_from(&agents, &analysis, 3, &exclude);
        assert_eq!(names(&assignments), vec!["code_writer"]);
    }

    #[test]
    fn test_everything_excluded_yields_nothing() {
        let agents = default_roster();
        let exclude: Vec<String> = agents.iter().map(|a| a.name.clone()).collect();
        let analysis = TaskClassifier::new().classify("Fix bug in login flow");
        assert!(selector().select_from(&agents, &analysis, 3, &exclude).is_empty());
    }
}
