//! Error types for storage operations

use std::path::PathBuf;

use thiserror::Error;

/// Storage layer error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Core domain error: {0}")]
    Core(#[from] agent_ensemble_core::Error),

    #[error("Not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid document {}: {message}", path.display())]
    InvalidDocument { path: PathBuf, message: String },

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl Error {
    pub fn not_found<S1: Into<String>, S2: Into<String>>(entity: S1, id: S2) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn invalid_document<P: Into<PathBuf>, S: Into<String>>(path: P, message: S) -> Self {
        Self::InvalidDocument {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Repositories implement core seams, which speak the core error type
impl From<Error> for agent_ensemble_core::Error {
    fn from(err: Error) -> Self {
        use agent_ensemble_core::Error as CoreError;
        match err {
            Error::Core(inner) => inner,
            Error::Io(e) => CoreError::Io(e.to_string()),
            Error::Serialization(e) => CoreError::Serialization(e.to_string()),
            Error::Yaml(e) => CoreError::Parsing(e.to_string()),
            Error::NotFound { entity, id } => CoreError::not_found(entity, id),
            Error::Conflict(message) => CoreError::state_transition(message),
            other => CoreError::Internal(other.to_string()),
        }
    }
}

/// Convenience result type for storage operations
pub type Result<T> = std::result::Result<T, Error>;
