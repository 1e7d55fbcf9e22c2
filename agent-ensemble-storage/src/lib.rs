//! File-backed persistence for Agent Ensemble
//!
//! This crate owns the on-disk layout: agent definition documents and the
//! metrics registry, workflow templates (system, custom and learned), the
//! append-only execution history and the skill insight ledger. Repositories
//! implement the core persistence seams (`AgentStore`, `ExecutionArchive`,
//! `InsightStore`).

pub mod error;
mod files;
pub mod manager;
pub mod repositories;

pub use error::{Error, Result};
pub use manager::{StorageConfig, StorageManager, StorageStats};

/// Re-export core types for convenience
pub use agent_ensemble_core as core;
