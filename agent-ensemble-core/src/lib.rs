//! Core domain models and workflow engine for Agent Ensemble
//!
//! This crate contains the agent directory, the task classifier and agent
//! selector, workflow templates and their execution records, the
//! orchestration engine that drives templates to completion, the per-agent
//! skill insights, and the statistics and learning passes over finalized
//! executions.

pub mod agent;
pub mod directory;
pub mod error;
pub mod execution;
pub mod insights;
pub mod learning;
pub mod orchestration;
pub mod selection;
pub mod statistics;
pub mod task;
pub mod workflow;

pub use error::{Error, Result};
