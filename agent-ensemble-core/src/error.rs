//! Error types for the core domain
//!
//! Variants carry rendered messages rather than source errors so that
//! errors stay `Clone` and can be recorded on step executions.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Invalid input: {message}")]
    Validation { message: String },

    #[error("{entity} '{name}' not found")]
    NotFound { entity: String, name: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Document parse error: {0}")]
    Parsing(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Invalid state transition: {message}")]
    StateTransition { message: String },

    #[error("Rule '{rule}' violated: {message}")]
    ConstraintViolation { rule: String, message: String },

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("Agent execution failed: {message}")]
    Execution { message: String },

    #[error("Instruction rendering failed: {message}")]
    Rendering { message: String },
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Parsing(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Internal(format!("{:#}", err))
    }
}

impl Error {
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// `entity` is the kind of thing looked up ("Agent", "Workflow")
    pub fn not_found<S1: Into<String>, S2: Into<String>>(entity: S1, name: S2) -> Self {
        Self::NotFound {
            entity: entity.into(),
            name: name.into(),
        }
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn state_transition<S: Into<String>>(message: S) -> Self {
        Self::StateTransition {
            message: message.into(),
        }
    }

    pub fn constraint_violation<S1: Into<String>, S2: Into<String>>(rule: S1, message: S2) -> Self {
        Self::ConstraintViolation {
            rule: rule.into(),
            message: message.into(),
        }
    }

    pub fn timeout<S: Into<String>>(operation: S, seconds: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            seconds,
        }
    }

    /// A failed agent invocation
    pub fn execution<S: Into<String>>(message: S) -> Self {
        Self::Execution {
            message: message.into(),
        }
    }

    pub fn rendering<E: std::fmt::Display>(err: E) -> Self {
        Self::Rendering {
            message: err.to_string(),
        }
    }

    /// Stable label used in logs and step records
    pub fn category(&self) -> &'static str {
        match self {
            Error::Validation { .. } => "validation",
            Error::NotFound { .. } => "not_found",
            Error::Serialization(_) => "serialization",
            Error::Parsing(_) => "parsing",
            Error::Io(_) => "io",
            Error::Internal(_) => "internal",
            Error::Configuration { .. } => "configuration",
            Error::StateTransition { .. } => "state_transition",
            Error::ConstraintViolation { .. } => "constraint_violation",
            Error::Timeout { .. } => "timeout",
            Error::Execution { .. } => "execution",
            Error::Rendering { .. } => "rendering",
        }
    }

    pub fn is_validation(&self) -> bool {
        self.category() == "validation"
    }

    pub fn is_not_found(&self) -> bool {
        self.category() == "not_found"
    }

    pub fn is_timeout(&self) -> bool {
        self.category() == "timeout"
    }

    /// Invocation-class errors (timeouts, failed runs and transport I/O);
    /// a step may be retried after one of these
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Timeout { .. } | Error::Execution { .. } | Error::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
