//! Workflow lifecycle hooks

use std::fmt;

use async_trait::async_trait;
use tracing::info;

use crate::workflow::HookAction;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPhase {
    PreWorkflow,
    PostWorkflow,
    OnError,
}

impl HookPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            HookPhase::PreWorkflow => "pre_workflow",
            HookPhase::PostWorkflow => "post_workflow",
            HookPhase::OnError => "on_error",
        }
    }
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives the template's hook actions. A returned error is logged by the
/// engine and never aborts the run.
#[async_trait]
pub trait HookHandler: Send + Sync {
    async fn run_hook(&self, phase: HookPhase, execution_id: &str, hook: &HookAction) -> Result<()>;
}

/// Default handler: records each hook in the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHookHandler;

#[async_trait]
impl HookHandler for LoggingHookHandler {
    async fn run_hook(&self, phase: HookPhase, execution_id: &str, hook: &HookAction) -> Result<()> {
        let label = if hook.description.is_empty() {
            &hook.action
        } else {
            &hook.description
        };
        info!(execution_id, phase = %phase, action = %hook.action, "Hook: {}", label);
        Ok(())
    }
}
