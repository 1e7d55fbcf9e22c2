//! Instruction payload composition
//!
//! Every invocation receives one combined payload: the agent persona, the
//! task, the step's action, and the working-directory constraint. On a retry
//! the previous error and any feedback artifact are placed in front so the
//! agent sees them first.

use std::path::Path;

use handlebars::Handlebars;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::agent::Agent;
use crate::{Error, Result};

const AGENT_PROMPT: &str = "agent_prompt";

const AGENT_PROMPT_TEMPLATE: &str = r#"{{#if retry}}## Retry
This is attempt {{retry.attempt}} of {{retry.max_attempts}}. The previous attempt failed:
{{retry.previous_error}}
{{#if retry.feedback}}
### Feedback from {{retry.feedback.source}}
{{retry.feedback.contents}}
{{/if}}

{{/if}}{{persona}}

## Task

{{task}}
{{#if step}}

## Step: {{step.name}}

{{step.action}}
{{/if}}
{{#if previous_results}}

## Previous results

{{#each previous_results}}- {{this}}
{{/each}}
{{/if}}

## Requirements

- Work in the current directory: {{working_directory}}
- Create all necessary files and implement the solution
- Ensure the implementation is complete and functional
{{#if role}}

You are the {{role}}. Focus on your area of expertise.
{{/if}}
"#;

/// Contents of an artifact left by an earlier attempt or step
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Feedback {
    pub source: String,
    pub contents: String,
}

/// What a retry attempt is told about the previous one
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RetryContext {
    /// 1-based number of the attempt being prepared
    pub attempt: u32,
    pub max_attempts: u32,
    pub previous_error: String,
    pub feedback: Option<Feedback>,
}

#[derive(Debug, Clone, Serialize)]
struct StepSection<'a> {
    name: &'a str,
    action: &'a str,
}

/// Per-invocation inputs to [`PromptComposer::compose`]
#[derive(Debug, Clone)]
pub struct PromptContext<'a> {
    pub task: &'a str,
    pub step_name: Option<&'a str>,
    pub action: Option<&'a str>,
    pub working_directory: &'a Path,
    pub previous_results: Vec<String>,
    pub retry: Option<RetryContext>,
    /// Append the role focus line used for ad hoc dispatch
    pub role_focus: bool,
}

impl<'a> PromptContext<'a> {
    pub fn new(task: &'a str, working_directory: &'a Path) -> Self {
        Self {
            task,
            step_name: None,
            action: None,
            working_directory,
            previous_results: Vec::new(),
            retry: None,
            role_focus: false,
        }
    }

    pub fn with_step(mut self, name: &'a str, action: &'a str) -> Self {
        self.step_name = Some(name);
        self.action = Some(action);
        self
    }

    pub fn with_previous_results(mut self, results: Vec<String>) -> Self {
        self.previous_results = results;
        self
    }

    pub fn with_retry(mut self, retry: RetryContext) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_role_focus(mut self) -> Self {
        self.role_focus = true;
        self
    }
}

/// Renders instruction payloads from a fixed template
pub struct PromptComposer {
    handlebars: Handlebars<'static>,
}

impl std::fmt::Debug for PromptComposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptComposer").finish_non_exhaustive()
    }
}

impl PromptComposer {
    pub fn new() -> Result<Self> {
        let mut handlebars = Handlebars::new();
        // Payloads are plain text for a model, not HTML.
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars
            .register_template_string(AGENT_PROMPT, AGENT_PROMPT_TEMPLATE)
            .map_err(|e| Error::rendering(format!("invalid agent prompt template: {}", e)))?;
        Ok(Self { handlebars })
    }

    /// Build the payload for one invocation of `agent`
    pub fn compose(&self, agent: &Agent, ctx: &PromptContext<'_>) -> Result<String> {
        let step = match (ctx.step_name, ctx.action) {
            (Some(name), Some(action)) => Some(StepSection { name, action }),
            (None, Some(action)) => Some(StepSection {
                name: action,
                action,
            }),
            _ => None,
        };
        let role = if ctx.role_focus && !agent.role.trim().is_empty() {
            Some(agent.role.as_str())
        } else {
            None
        };

        let data = json!({
            "persona": agent.persona(),
            "task": ctx.task,
            "step": step,
            "previous_results": ctx.previous_results,
            "working_directory": ctx.working_directory.display().to_string(),
            "retry": ctx.retry,
            "role": role,
        });

        self.handlebars
            .render(AGENT_PROMPT, &data)
            .map_err(|e| Error::rendering(format!("{}: {}", agent.name, e)))
    }
}

/// Read a feedback artifact from the working directory, if it exists and is
/// not empty.
pub async fn load_feedback(working_directory: &Path, artifact: &str) -> Option<Feedback> {
    let path = working_directory.join(artifact);
    match tokio::fs::read_to_string(&path).await {
        Ok(contents) if !contents.trim().is_empty() => Some(Feedback {
            source: artifact.to_string(),
            contents,
        }),
        Ok(_) => None,
        Err(e) => {
            debug!("No feedback artifact at {}: {}", path.display(), e);
            None
        }
    }
}
