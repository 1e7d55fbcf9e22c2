//! Error types for the runner application

use thiserror::Error;

/// Runner application error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Config file error: {0}")]
    ConfigFile(#[from] config::ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] agent_ensemble_storage::Error),

    #[error("Core domain error: {0}")]
    Core(#[from] agent_ensemble_core::Error),

    #[error("Workflow template not found: {0}")]
    WorkflowNotFound(String),

    #[error("No agents available for task")]
    NoAgentsAvailable,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Convenience result type for runner operations
pub type Result<T> = std::result::Result<T, Error>;
