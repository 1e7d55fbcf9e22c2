//! Property-based tests for agent-ensemble-core
//!
//! These tests check the scoring, metrics and verdict invariants against
//! randomly generated agents, outcomes and task descriptions.

use proptest::prelude::*;

use agent_ensemble_core::{
    agent::{Agent, SkillLevel, TaskOutcome},
    execution::{overall_success, ExecutionStatus, WorkflowExecution},
    selection::{confidence, AgentSelector, MAX_CONFIDENCE},
    task::TaskClassifier,
};

/// Strategy for generating agent names
fn agent_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_-]{2,20}").unwrap()
}

/// Strategy for generating capability sets
fn capabilities_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(
        prop::sample::select(vec![
            "implementation",
            "testing",
            "qa",
            "bug_fixing",
            "refactoring",
            "code_review",
            "research",
            "documentation",
            "devops",
            "python",
            "rust",
            "javascript",
        ]),
        1..5,
    )
    .prop_map(|caps| caps.into_iter().map(String::from).collect())
}

fn skill_strategy() -> impl Strategy<Value = SkillLevel> {
    prop::sample::select(vec![
        SkillLevel::Novice,
        SkillLevel::Intermediate,
        SkillLevel::Expert,
        SkillLevel::Master,
    ])
}

/// Strategy for generating agents with arbitrary track records
fn agent_strategy() -> impl Strategy<Value = Agent> {
    (
        agent_name_strategy(),
        capabilities_strategy(),
        skill_strategy(),
        0u64..200,
        0u64..200,
    )
        .prop_map(|(name, capabilities, skill, successes, failures)| {
            let mut agent = Agent::builder()
                .name(name)
                .capabilities(capabilities)
                .skill_level(skill)
                .build()
                .unwrap();
            agent.metrics.successful_tasks = successes;
            agent.metrics.failed_tasks = failures;
            agent.metrics.total_tasks = successes + failures;
            agent
        })
}

/// Agents with unique names, in generation order
fn directory_strategy() -> impl Strategy<Value = Vec<Agent>> {
    prop::collection::vec(agent_strategy(), 1..8).prop_map(|agents| {
        let mut unique: Vec<Agent> = Vec::new();
        for agent in agents {
            if !unique.iter().any(|a| a.name == agent.name) {
                unique.push(agent);
            }
        }
        unique
    })
}

fn outcome_strategy() -> impl Strategy<Value = TaskOutcome> {
    (any::<bool>(), 0u64..10_000, 0.0f64..5.0, 0.0f64..600.0)
        .prop_map(|(success, tokens, cost, duration)| TaskOutcome::new(success, tokens, cost, duration))
}

/// Strategy for generating task descriptions from domain vocabulary
fn task_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(
        prop::sample::select(vec![
            "fix", "bug", "in", "login", "implement", "feature", "test", "code", "then",
            "refactor", "the", "system", "and", "research", "library", "python", "deploy",
            "application", "docs", "review", "module", ",", "also", "complex", "api",
        ]),
        0..16,
    )
    .prop_map(|words| words.join(" "))
}

proptest! {
    /// Success rate is derived from the counters and is 0 before any task
    #[test]
    fn test_success_rate_is_derived(outcomes in prop::collection::vec(outcome_strategy(), 0..40)) {
        let mut agent = Agent::builder()
            .name("worker")
            .capability("testing")
            .build()
            .unwrap();
        prop_assert_eq!(agent.success_rate(), 0.0);

        for outcome in &outcomes {
            agent.record_outcome(outcome);
        }
        let metrics = &agent.metrics;
        prop_assert_eq!(metrics.total_tasks, outcomes.len() as u64);
        prop_assert_eq!(metrics.successful_tasks + metrics.failed_tasks, metrics.total_tasks);
        if metrics.total_tasks == 0 {
            prop_assert_eq!(agent.success_rate(), 0.0);
        } else {
            let expected = metrics.successful_tasks as f64 / metrics.total_tasks as f64 * 100.0;
            prop_assert!((agent.success_rate() - expected).abs() < 1e-9);
        }
    }
}

proptest! {
    /// Skill tiers never go down
    #[test]
    fn test_skill_tiers_are_monotone(
        start in skill_strategy(),
        outcomes in prop::collection::vec(outcome_strategy(), 0..120),
    ) {
        let mut agent = Agent::builder()
            .name("worker")
            .capability("implementation")
            .skill_level(start)
            .build()
            .unwrap();
        let mut previous = agent.skill_level;
        for outcome in &outcomes {
            let promoted = agent.record_outcome(outcome);
            prop_assert!(agent.skill_level >= previous);
            if let Some(level) = promoted {
                prop_assert!(level > previous);
                prop_assert_eq!(level, agent.skill_level);
            }
            previous = agent.skill_level;
        }
    }
}

proptest! {
    /// Confidence always lies in [0, 0.95]
    #[test]
    fn test_confidence_is_bounded(agent in agent_strategy(), required in capabilities_strategy()) {
        let value = confidence(&agent, &required);
        prop_assert!((0.0..=MAX_CONFIDENCE).contains(&value));
        let value = confidence(&agent, &[]);
        prop_assert!((0.0..=MAX_CONFIDENCE).contains(&value));
    }
}

proptest! {
    /// The selector respects max_agents and never returns nothing for a
    /// non-empty directory
    #[test]
    fn test_selector_cardinality(
        agents in directory_strategy(),
        task in task_strategy(),
        max_agents in 0usize..6,
    ) {
        let selector = AgentSelector::default();
        let analysis = selector.classifier().classify(&task);
        let assignments = selector.select_from(&agents, &analysis, max_agents, &[]);

        prop_assert!(!assignments.is_empty());
        prop_assert!(assignments.len() <= max_agents.max(1));
        for assignment in &assignments {
            prop_assert!((0.0..=MAX_CONFIDENCE).contains(&assignment.confidence));
        }
        let mut names: Vec<&str> = assignments.iter().map(|a| a.agent.name.as_str()).collect();
        names.sort();
        names.dedup();
        prop_assert_eq!(names.len(), assignments.len());
    }
}

proptest! {
    /// Classification is a pure function of the text
    #[test]
    fn test_classifier_is_pure(task in task_strategy()) {
        let classifier = TaskClassifier::new();
        let first = classifier.classify(&task);
        let second = TaskClassifier::new().classify(&task);
        prop_assert_eq!(&first, &second);
        prop_assert!(first.estimated_subtasks >= 1);
        prop_assert!(first.keywords.len() <= 10);
    }
}

proptest! {
    /// The verdict matches the lenient rule and finalization agrees with it
    #[test]
    fn test_overall_success_rule(total in 0usize..8, completed_seed in 0usize..8, failed_seed in 0usize..8) {
        let completed = completed_seed.min(total);
        let failed = failed_seed.min(total - completed);
        let expected = failed == 0 || (completed > 0 && failed < total);
        prop_assert_eq!(overall_success(completed, failed, total), expected);

        let mut execution = WorkflowExecution::new("wf", "1.0.0", "task", total);
        for i in 0..completed {
            let id = format!("ok{}", i);
            execution.start_step(&id, &id, "code_writer").unwrap();
            execution.complete_step(&id, vec![], true, vec![]).unwrap();
        }
        for i in 0..failed {
            let id = format!("bad{}", i);
            execution.start_step(&id, &id, "tester").unwrap();
            execution.fail_step(&id, "boom", vec![]).unwrap();
        }
        let status = execution.finalize().unwrap();
        prop_assert!(execution.completed_steps + execution.failed_steps + execution.skipped_steps <= total);
        if failed == 0 {
            prop_assert_eq!(status, ExecutionStatus::Completed);
        } else if expected {
            prop_assert_eq!(status, ExecutionStatus::Partial);
        } else {
            prop_assert_eq!(status, ExecutionStatus::Failed);
        }
    }
}

#[test]
fn test_documented_verdict_cases() {
    assert!(overall_success(3, 0, 3));
    assert!(overall_success(2, 1, 3));
    assert!(!overall_success(0, 3, 3));
    assert!(overall_success(0, 0, 0));
}
