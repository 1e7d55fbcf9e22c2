//! Post-invocation output validation
//!
//! Rules are checked against the step's working directory after a
//! successful invocation. Every failing rule contributes one message; a step
//! without rules is vacuously valid.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::workflow::{SyntaxLanguage, ValidationRule};

/// Report read by the `all_tests_pass` custom check
pub const QA_REPORT: &str = "QA_REPORT.md";

/// Outcome of checking one step's rules
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ValidationOutcome {
    pub passed: bool,
    pub errors: Vec<String>,
}

impl ValidationOutcome {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            passed: errors.is_empty(),
            errors,
        }
    }

    /// One-line summary used as the step's failure message
    pub fn message(&self) -> String {
        format!("Validation failed: {}", self.errors.join("; "))
    }
}

/// Check `rules` against `working_dir`. `produced` lists the files the
/// invocation created or modified, relative to `working_dir`.
pub async fn validate_outputs(
    rules: &[ValidationRule],
    working_dir: &Path,
    produced: &[String],
) -> ValidationOutcome {
    let mut errors = Vec::new();
    for rule in rules {
        if let Some(error) = check_rule(rule, working_dir, produced).await {
            debug!("Validation rule failed: {}", error);
            errors.push(error);
        }
    }
    ValidationOutcome::from_errors(errors)
}

async fn check_rule(rule: &ValidationRule, dir: &Path, produced: &[String]) -> Option<String> {
    match rule {
        ValidationRule::OutputExists { file } => {
            let exists = tokio::fs::try_exists(dir.join(file)).await.unwrap_or(false);
            let listed = produced.iter().any(|p| p == file);
            // A file left over from an earlier attempt does not count.
            match (listed, exists) {
                (true, true) => None,
                (true, false) => Some(format!("Output file '{}' listed but doesn't exist", file)),
                (false, _) => Some(format!("Expected output file '{}' not generated", file)),
            }
        }
        ValidationRule::MinLines { file, value } => match read(dir, file).await {
            Ok(content) => {
                let lines = content.lines().count();
                (lines < *value).then(|| {
                    format!(
                        "File '{}' has {} lines, expected at least {}",
                        file, lines, value
                    )
                })
            }
            Err(error) => Some(error),
        },
        ValidationRule::MinSize { file, bytes } => {
            match tokio::fs::metadata(dir.join(file)).await {
                Ok(meta) if meta.len() >= *bytes => None,
                Ok(meta) => Some(format!(
                    "File '{}' is {} bytes, expected at least {}",
                    file,
                    meta.len(),
                    bytes
                )),
                Err(_) => Some(format!("Cannot validate '{}': file not found", file)),
            }
        }
        ValidationRule::SyntaxValid { file, language } => match read(dir, file).await {
            Ok(content) => (!syntax_ok(*language, &content))
                .then(|| format!("{} syntax error in '{}'", language_label(*language), file)),
            Err(error) => Some(error),
        },
        ValidationRule::Custom { check } => match check.as_str() {
            "all_tests_pass" => match tokio::fs::read_to_string(dir.join(QA_REPORT)).await {
                Ok(report) => {
                    let report = report.to_lowercase();
                    ["fail", "bug", "issue"]
                        .iter()
                        .any(|marker| report.contains(marker))
                        .then(|| format!("QA testing found issues - check {}", QA_REPORT))
                }
                // No report means nothing was flagged.
                Err(_) => None,
            },
            other => Some(format!("Unknown custom validation check '{}'", other)),
        },
    }
}

async fn read(dir: &Path, file: &str) -> std::result::Result<String, String> {
    let path = dir.join(file);
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Err(format!("Cannot validate '{}': file not found", file));
    }
    tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| format!("Error reading '{}': {}", file, e))
}

fn language_label(language: SyntaxLanguage) -> &'static str {
    match language {
        SyntaxLanguage::Html => "HTML",
        SyntaxLanguage::Json => "JSON",
        SyntaxLanguage::Yaml => "YAML",
        SyntaxLanguage::Markdown => "Markdown",
    }
}

/// Lightweight format checks; structured data must parse
pub fn syntax_ok(language: SyntaxLanguage, content: &str) -> bool {
    match language {
        SyntaxLanguage::Html => {
            let lower = content.to_lowercase();
            lower.contains("<!doctype")
                && content.contains("<html")
                && content.contains("<body")
                && content.matches("<html").count() == content.matches("</html>").count()
        }
        SyntaxLanguage::Json => serde_json::from_str::<serde_json::Value>(content).is_ok(),
        SyntaxLanguage::Yaml => serde_yaml::from_str::<serde_yaml::Value>(content).is_ok(),
        SyntaxLanguage::Markdown => {
            !content.trim().is_empty()
                && content
                    .lines()
                    .filter(|l| l.trim_start().starts_with("```"))
                    .count()
                    % 2
                    == 0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PAGE: &str = "<!DOCTYPE html>\n<html>\n<body>\n<p>hi</p>\n</body>\n</html>\n";

    fn write(dir: &TempDir, name: &str, content: &str) {
        std::fs::write(dir.path().join(name), content).unwrap();
    }

    #[tokio::test]
    async fn test_empty_rules_are_vacuously_valid() {
        let dir = TempDir::new().unwrap();
        let outcome = validate_outputs(&[], dir.path(), &[]).await;
        assert!(outcome.passed);
        assert!(outcome.errors.is_empty());
    }

    #[tokio::test]
    async fn test_output_exists() {
        let dir = TempDir::new().unwrap();
        write(&dir, "index.html", PAGE);
        let rules = vec![
            ValidationRule::OutputExists { file: "index.html".into() },
            ValidationRule::OutputExists { file: "app.js".into() },
            ValidationRule::OutputExists { file: "style.css".into() },
        ];
        let produced = vec!["index.html".to_string(), "style.css".to_string()];
        let outcome = validate_outputs(&rules, dir.path(), &produced).await;

        assert!(!outcome.passed);
        assert_eq!(
            outcome.errors,
            vec![
                "Expected output file 'app.js' not generated",
                "Output file 'style.css' listed but doesn't exist",
            ]
        );
    }

    #[tokio::test]
    async fn test_output_exists_ignores_stale_files() {
        let dir = TempDir::new().unwrap();
        write(&dir, "index.html", PAGE);
        let rules = vec![ValidationRule::OutputExists { file: "index.html".into() }];

        let outcome = validate_outputs(&rules, dir.path(), &[]).await;
        assert!(!outcome.passed);
        assert_eq!(
            outcome.errors,
            vec!["Expected output file 'index.html' not generated"]
        );

        let produced = vec!["index.html".to_string()];
        assert!(validate_outputs(&rules, dir.path(), &produced).await.passed);
    }

    #[tokio::test]
    async fn test_min_lines_and_min_size() {
        let dir = TempDir::new().unwrap();
        write(&dir, "notes.md", "one\ntwo\n");
        let rules = vec![
            ValidationRule::MinLines { file: "notes.md".into(), value: 5 },
            ValidationRule::MinLines { file: "missing.md".into(), value: 1 },
            ValidationRule::MinSize { file: "notes.md".into(), bytes: 4 },
            ValidationRule::MinSize { file: "notes.md".into(), bytes: 100 },
        ];
        let outcome = validate_outputs(&rules, dir.path(), &[]).await;

        assert_eq!(
            outcome.errors,
            vec![
                "File 'notes.md' has 2 lines, expected at least 5",
                "Cannot validate 'missing.md': file not found",
                "File 'notes.md' is 8 bytes, expected at least 100",
            ]
        );
        assert_eq!(
            outcome.message(),
            "Validation failed: File 'notes.md' has 2 lines, expected at least 5; \
             Cannot validate 'missing.md': file not found; \
             File 'notes.md' is 8 bytes, expected at least 100"
        );
    }

    #[test]
    fn test_syntax_checks() {
        assert!(syntax_ok(SyntaxLanguage::Html, PAGE));
        assert!(!syntax_ok(SyntaxLanguage::Html, "<html><body></body></html>"));
        assert!(!syntax_ok(
            SyntaxLanguage::Html,
            "<!doctype html><html><body><html></body></html>"
        ));
        assert!(syntax_ok(SyntaxLanguage::Json, r#"{"a": [1, 2]}"#));
        assert!(!syntax_ok(SyntaxLanguage::Json, r#"{"a": [1, 2}"#));
        assert!(syntax_ok(SyntaxLanguage::Yaml, "name: x\nsteps:\n  - id: a\n"));
        assert!(!syntax_ok(SyntaxLanguage::Yaml, "name: [unclosed\n"));
        assert!(syntax_ok(SyntaxLanguage::Markdown, "# Title\n```rust\nfn x() {}\n```\n"));
        assert!(!syntax_ok(SyntaxLanguage::Markdown, "# Title\n```\nopen fence\n"));
        assert!(!syntax_ok(SyntaxLanguage::Markdown, "   \n"));
    }

    #[tokio::test]
    async fn test_syntax_rule_reports_language() {
        let dir = TempDir::new().unwrap();
        write(&dir, "data.json", "{not json");
        let rules = vec![ValidationRule::SyntaxValid {
            file: "data.json".into(),
            language: SyntaxLanguage::Json,
        }];
        let outcome = validate_outputs(&rules, dir.path(), &[]).await;
        assert_eq!(outcome.errors, vec!["JSON syntax error in 'data.json'"]);
    }

    #[tokio::test]
    async fn test_custom_checks() {
        let dir = TempDir::new().unwrap();
        let rules = vec![ValidationRule::Custom { check: "all_tests_pass".into() }];
        assert!(validate_outputs(&rules, dir.path(), &[]).await.passed);

        write(&dir, QA_REPORT, "All 12 tests passed.");
        assert!(validate_outputs(&rules, dir.path(), &[]).await.passed);

        write(&dir, QA_REPORT, "2 tests FAILED");
        let outcome = validate_outputs(&rules, dir.path(), &[]).await;
        assert_eq!(outcome.errors, vec!["QA testing found issues - check QA_REPORT.md"]);

        let unknown = vec![ValidationRule::Custom { check: "lint_clean".into() }];
        let outcome = validate_outputs(&unknown, dir.path(), &[]).await;
        assert_eq!(outcome.errors, vec!["Unknown custom validation check 'lint_clean'"]);
    }
}
