//! Workflow orchestration
//!
//! This module runs workflow templates step by step against the agent
//! directory:
//! - Headless agent execution behind the [`AgentInvoker`] seam
//! - Instruction payload composition with Handlebars
//! - Output validation and quality gates
//! - Lifecycle hooks
//! - Live execution tracking with archive-on-finalize
//!
//! # Architecture
//!
//! ```text
//! WorkflowTemplate + task
//!     |
//!     v
//! WorkflowEngine ----> Approver / HookHandler
//!     |
//!     v
//! PromptComposer -> AgentInvoker (HeadlessClaudeExecutor)
//!     |
//!     v
//! validate_outputs -> quality gates
//!     |
//!     v
//! ExecutionTracker -> ExecutionArchive
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use agent_ensemble_core::agent::default_roster;
//! use agent_ensemble_core::directory::AgentDirectory;
//! use agent_ensemble_core::orchestration::{
//!     EngineConfig, ExecutionTracker, HeadlessClaudeExecutor, RunOptions, WorkflowEngine,
//! };
//! use agent_ensemble_core::workflow::WorkflowTemplate;
//!
//! async fn example(document: &str) -> agent_ensemble_core::Result<()> {
//!     let template = WorkflowTemplate::parse(document)?;
//!     let engine = WorkflowEngine::new(
//!         AgentDirectory::from_agents(default_roster()),
//!         Arc::new(HeadlessClaudeExecutor::default()),
//!         ExecutionTracker::default(),
//!         EngineConfig::default(),
//!     )?;
//!
//!     let report = engine
//!         .execute(&template, "Fix bug in login flow", RunOptions::default())
//!         .await?;
//!     println!("{}", report.summary());
//!     Ok(())
//! }
//! ```

pub mod engine;
pub mod executor;
pub mod gates;
pub mod hooks;
pub mod prompt;
pub mod tracker;
pub mod validation;

pub use engine::{AbortReason, EngineConfig, RunOptions, WorkflowEngine, WorkflowRunReport};
pub use executor::{
    AgentInvoker, ExecutionConfig, HeadlessClaudeExecutor, InvocationOutcome, InvocationRequest,
    UsageInfo,
};
pub use gates::{Approver, AutoApprover, GateCondition};
pub use hooks::{HookHandler, HookPhase, LoggingHookHandler};
pub use prompt::{Feedback, PromptComposer, PromptContext, RetryContext};
pub use tracker::{ExecutionArchive, ExecutionTracker, FinalizedExecution, NullArchive};
pub use validation::{validate_outputs, ValidationOutcome};
