//! Task classification
//!
//! Turns a free-text task description into a [`TaskAnalysis`]: task type,
//! required capabilities, complexity tier, parallelizability and an estimate
//! of the number of subtasks. Classification is an ordered rule list where
//! the first matching rule wins; there is no scoring across rules.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Closed task taxonomy plus a generic fallback
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    CodeAnalysis,
    Implementation,
    Refactoring,
    BugFixing,
    Testing,
    Research,
    Documentation,
    Devops,
    General,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::CodeAnalysis => "code_analysis",
            TaskType::Implementation => "implementation",
            TaskType::Refactoring => "refactoring",
            TaskType::BugFixing => "bug_fixing",
            TaskType::Testing => "testing",
            TaskType::Research => "research",
            TaskType::Documentation => "documentation",
            TaskType::Devops => "devops",
            TaskType::General => "general",
        }
    }

    /// Task types whose work can be split across concurrent agents
    pub fn is_parallelizable(self) -> bool {
        matches!(
            self,
            TaskType::Research | TaskType::CodeAnalysis | TaskType::Testing
        )
    }

    /// Task types that always get a tester in a supporting role
    pub fn needs_validation(self) -> bool {
        matches!(
            self,
            TaskType::Implementation | TaskType::BugFixing | TaskType::Refactoring
        )
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "code_analysis" => Ok(TaskType::CodeAnalysis),
            "implementation" => Ok(TaskType::Implementation),
            "refactoring" => Ok(TaskType::Refactoring),
            "bug_fixing" => Ok(TaskType::BugFixing),
            "testing" => Ok(TaskType::Testing),
            "research" => Ok(TaskType::Research),
            "documentation" => Ok(TaskType::Documentation),
            "devops" => Ok(TaskType::Devops),
            "general" => Ok(TaskType::General),
            other => Err(Error::validation(format!("Unknown task type: {}", other))),
        }
    }
}

/// Complexity tier
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
}

impl Complexity {
    fn subtask_factor(self) -> f64 {
        match self {
            Complexity::Simple => 1.0,
            Complexity::Medium => 1.5,
            Complexity::Complex => 2.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Complexity::Simple => "simple",
            Complexity::Medium => "medium",
            Complexity::Complex => "complex",
        }
    }
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured interpretation of one task description
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskAnalysis {
    pub task_type: TaskType,
    /// Deduplicated, lower-case, in discovery order
    pub required_capabilities: Vec<String>,
    pub complexity: Complexity,
    pub parallelizable: bool,
    pub estimated_subtasks: u32,
    pub keywords: Vec<String>,
}

/// One (pattern → outcome) entry of the ordered rule list
#[derive(Debug, Clone)]
pub struct ClassificationRule {
    pattern: Regex,
    task_type: TaskType,
    capabilities: Vec<String>,
}

impl ClassificationRule {
    /// Compile a rule; patterns are matched case-insensitively
    pub fn new(pattern: &str, task_type: TaskType, capabilities: &[&str]) -> Result<Self> {
        let pattern = Regex::new(&format!("(?i){}", pattern)).map_err(|e| {
            Error::configuration(format!("Invalid classification pattern '{}': {}", pattern, e))
        })?;
        Ok(Self {
            pattern,
            task_type,
            capabilities: capabilities.iter().map(|c| c.to_lowercase()).collect(),
        })
    }

    pub fn task_type(&self) -> TaskType {
        self.task_type
    }

    fn matches(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

const BUILTIN_RULES: &[(&str, TaskType, &[&str])] = &[
    (
        r"\b(review|analyze|examine|inspect)\s+(code|implementation|module|function)",
        TaskType::CodeAnalysis,
        &["code_review", "architecture", "best_practices"],
    ),
    (
        r"\b(implement|create|build|add|write)\s+(feature|functionality|function|class|module)",
        TaskType::Implementation,
        &["implementation", "feature_development"],
    ),
    (
        r"\b(refactor|improve|optimize|clean\s*up)\s+(code|implementation)",
        TaskType::Refactoring,
        &["refactoring", "code_review", "implementation"],
    ),
    (
        r"\b(fix|resolve|debug)\s+(bug|issue|error|problem)",
        TaskType::BugFixing,
        &["bug_fixing", "implementation"],
    ),
    (
        r"\b(test|validate|verify|check)\s+(code|functionality|feature|implementation)",
        TaskType::Testing,
        &["testing", "qa", "validation"],
    ),
    (
        r"\b(research|investigate|find|search\s*for)\s+(documentation|library|best\s*practice|solution)",
        TaskType::Research,
        &["research", "documentation", "best_practices"],
    ),
    (
        r"\b(document|write\s*docs|create\s*documentation|add\s*comments)",
        TaskType::Documentation,
        &["documentation", "technical_writing"],
    ),
    (
        r"\b(deploy|build|setup|configure)\s+(application|environment|pipeline|infrastructure)",
        TaskType::Devops,
        &["devops", "deployment", "environment"],
    ),
    (
        r"\b(docker|containerize|kubernetes)",
        TaskType::Devops,
        &["devops", "docker"],
    ),
];

static DEFAULT_RULES: LazyLock<Vec<ClassificationRule>> = LazyLock::new(|| {
    BUILTIN_RULES
        .iter()
        .map(|(pattern, task_type, caps)| {
            ClassificationRule::new(pattern, *task_type, caps).expect("built-in rule compiles")
        })
        .collect()
});

static LANGUAGE_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)\bpython\b", "python"),
        (r"(?i)\bjavascript\b|\bjs\b|\bnode\b", "javascript"),
        (r"(?i)\btypescript\b|\bts\b", "typescript"),
        (r"(?i)\bjava\b", "java"),
        (r"(?i)\bgo\b|\bgolang\b", "go"),
        (r"(?i)\brust\b", "rust"),
        (r"(?i)\bc\+\+\b|\bcpp\b", "cpp"),
    ]
    .into_iter()
    .map(|(pattern, language)| (Regex::new(pattern).expect("language pattern compiles"), language))
    .collect()
});

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\w+\b").expect("word pattern"));

const HIGH_COMPLEXITY: &[&str] = &[
    "refactor",
    "architecture",
    "system",
    "multiple",
    "complex",
    "scalable",
    "distributed",
    "migration",
];

const MEDIUM_COMPLEXITY: &[&str] = &["implement", "feature", "integration", "api", "module"];

const SEQUENTIAL_WORDS: &[&str] = &["then", "after", "before", "first", "next", "finally", "step"];

/// Counted as plain substrings, so "standard" contributes an "and"
const LIST_MARKERS: &[&str] = &["and", ",", ";", "then", "also", "plus"];

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "up", "about", "into", "through", "during",
];

const MAX_KEYWORDS: usize = 10;

/// Pure, rule-driven task classifier
#[derive(Debug, Clone)]
pub struct TaskClassifier {
    rules: Vec<ClassificationRule>,
}

impl Default for TaskClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskClassifier {
    /// Classifier with the built-in rule list
    pub fn new() -> Self {
        Self {
            rules: DEFAULT_RULES.clone(),
        }
    }

    /// Classifier with custom rules evaluated before the built-in ones
    pub fn with_rules(custom: Vec<ClassificationRule>) -> Self {
        let mut rules = custom;
        rules.extend(DEFAULT_RULES.iter().cloned());
        Self { rules }
    }

    pub fn rules(&self) -> &[ClassificationRule] {
        &self.rules
    }

    /// Classify a task description. Never fails; unmatched text is `General`.
    pub fn classify(&self, description: &str) -> TaskAnalysis {
        let lowered = description.to_lowercase();

        let (task_type, mut capabilities) = self
            .rules
            .iter()
            .find(|rule| rule.matches(&lowered))
            .map(|rule| (rule.task_type, rule.capabilities.clone()))
            .unwrap_or((TaskType::General, Vec::new()));

        for (pattern, language) in LANGUAGE_PATTERNS.iter() {
            if pattern.is_match(&lowered) {
                capabilities.push(language.to_string());
            }
        }
        let mut required_capabilities: Vec<String> = Vec::with_capacity(capabilities.len());
        for capability in capabilities {
            if !required_capabilities.contains(&capability) {
                required_capabilities.push(capability);
            }
        }

        let words = words(&lowered);
        let complexity = complexity_of(&lowered);
        let parallelizable = task_type.is_parallelizable()
            && !SEQUENTIAL_WORDS.iter().any(|k| lowered.contains(k));

        TaskAnalysis {
            task_type,
            required_capabilities,
            complexity,
            parallelizable,
            estimated_subtasks: estimate_subtasks(&lowered, complexity),
            keywords: extract_keywords(&words),
        }
    }
}

fn words(lowered: &str) -> Vec<String> {
    WORD.find_iter(lowered)
        .map(|m| m.as_str().to_string())
        .collect()
}

fn complexity_of(lowered: &str) -> Complexity {
    let high = HIGH_COMPLEXITY
        .iter()
        .filter(|k| lowered.contains(*k))
        .count();
    let medium = MEDIUM_COMPLEXITY
        .iter()
        .filter(|k| lowered.contains(*k))
        .count();

    if high >= 2 {
        Complexity::Complex
    } else if high >= 1 || medium >= 2 {
        Complexity::Medium
    } else {
        Complexity::Simple
    }
}

fn estimate_subtasks(lowered: &str, complexity: Complexity) -> u32 {
    let markers: usize = LIST_MARKERS.iter().map(|m| lowered.matches(m).count()).sum();
    let count = 1 + markers;
    let scaled = (count as f64 * complexity.subtask_factor()).floor() as u32;
    scaled.max(1)
}

/// Stopword-stripped tokens longer than three characters, in original order
pub fn extract_keywords(words: &[String]) -> Vec<String> {
    words
        .iter()
        .filter(|w| !STOPWORDS.contains(&w.as_str()) && w.chars().count() > 3)
        .take(MAX_KEYWORDS)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(text: &str) -> TaskAnalysis {
        TaskClassifier::new().classify(text)
    }

    #[test]
    fn test_bug_fix_classification() {
        let analysis = classify("Fix bug in login flow");
        assert_eq!(analysis.task_type, TaskType::BugFixing);
        assert_eq!(
            analysis.required_capabilities,
            vec!["bug_fixing".to_string(), "implementation".to_string()]
        );
        assert_eq!(analysis.complexity, Complexity::Simple);
        assert!(!analysis.parallelizable);
        assert_eq!(analysis.estimated_subtasks, 1);
        assert_eq!(analysis.keywords, vec!["login".to_string(), "flow".to_string()]);
    }

    #[test]
    fn test_first_matching_rule_wins() {
        // Matches both the implementation and the testing rule; implementation is listed first.
        let analysis = classify("Write function and test code for parsing");
        assert_eq!(analysis.task_type, TaskType::Implementation);
    }

    #[test]
    fn test_unmatched_text_is_general() {
        let analysis = classify("Make the coffee");
        assert_eq!(analysis.task_type, TaskType::General);
        assert!(analysis.required_capabilities.is_empty());
    }

    #[test]
    fn test_languages_are_appended() {
        let analysis = classify("Implement feature in Rust and Python");
        assert_eq!(analysis.task_type, TaskType::Implementation);
        assert!(analysis.required_capabilities.contains(&"rust".to_string()));
        assert!(analysis.required_capabilities.contains(&"python".to_string()));
        assert!(!analysis.required_capabilities.contains(&"java".to_string()));

        let analysis = classify("Port the service from javascript to golang");
        assert!(analysis.required_capabilities.contains(&"javascript".to_string()));
        assert!(analysis.required_capabilities.contains(&"go".to_string()));
    }

    #[test]
    fn test_complexity_tiers() {
        assert_eq!(classify("rename a variable").complexity, Complexity::Simple);
        assert_eq!(
            classify("implement the api module").complexity,
            Complexity::Medium
        );
        assert_eq!(
            classify("refactor the parser").complexity,
            Complexity::Medium
        );
        assert_eq!(
            classify("plan a distributed architecture migration").complexity,
            Complexity::Complex
        );
    }

    #[test]
    fn test_parallelizable_requires_allowed_type_and_no_ordering_words() {
        assert!(classify("Research best practice for caching").parallelizable);
        assert!(!classify("Research best practice for caching then summarize").parallelizable);
        assert!(!classify("Fix bug in parser").parallelizable);
        assert!(classify("Review code in the scheduler").parallelizable);
    }

    #[test]
    fn test_ordering_words_match_inside_longer_words() {
        // "authentication" contains "then"
        let analysis = classify("Research best practice for authentication");
        assert_eq!(analysis.task_type, TaskType::Research);
        assert!(!analysis.parallelizable);
    }

    #[test]
    fn test_list_markers_match_inside_longer_words() {
        // "standard" contains "and", "authentication" contains "then"
        let analysis = classify("Document the standard authentication flow");
        assert_eq!(analysis.complexity, Complexity::Simple);
        assert_eq!(analysis.estimated_subtasks, 3);
    }

    #[test]
    fn test_subtask_estimate() {
        // 1 base + "and" + "," + "also" = 4, medium complexity => 6
        let analysis = classify("implement feature A and B, also an api");
        assert_eq!(analysis.complexity, Complexity::Medium);
        assert_eq!(analysis.estimated_subtasks, 6);
    }

    #[test]
    fn test_keywords_limit_and_stopwords() {
        let analysis = classify(
            "alpha bravo charlie delta echoes foxtrot golfer hotel india juliet kilos lima",
        );
        assert_eq!(analysis.keywords.len(), 10);
        assert_eq!(analysis.keywords[0], "alpha");
        assert!(!analysis.keywords.contains(&"lima".to_string()));

        let analysis = classify("about through during");
        assert!(analysis.keywords.is_empty());
    }

    #[test]
    fn test_custom_rules_take_precedence() {
        let rule = ClassificationRule::new(r"\bfix\b", TaskType::Testing, &["QA"]).unwrap();
        let classifier = TaskClassifier::with_rules(vec![rule]);
        let analysis = classifier.classify("Fix bug in login flow");
        assert_eq!(analysis.task_type, TaskType::Testing);
        assert_eq!(analysis.required_capabilities, vec!["qa".to_string()]);
    }

    #[test]
    fn test_invalid_custom_rule_is_configuration_error() {
        let err = ClassificationRule::new("(unclosed", TaskType::Testing, &[]).unwrap_err();
        assert_eq!(err.category(), "configuration");
    }

    #[test]
    fn test_task_type_parsing() {
        assert_eq!("bug_fixing".parse::<TaskType>().unwrap(), TaskType::BugFixing);
        assert!("cooking".parse::<TaskType>().is_err());
    }
}
