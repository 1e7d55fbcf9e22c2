//! Command-line runner for the agent ensemble
//!
//! This crate wires configuration, storage and the orchestration engine
//! into a single [`Orchestrator`] and exposes it through the
//! `agent-ensemble` binary.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod orchestrator;


pub use config::Config;
pub use dispatcher::{DispatchReport, TaskDispatcher};
pub use error::{Error, Result};
pub use orchestrator::{Orchestrator, RunOutcome, RunRequest};

/// Re-export the component crates for convenience
pub use agent_ensemble_core as core;
pub use agent_ensemble_storage as storage;
