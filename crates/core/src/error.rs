//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// These never stop the event stream: callers log them and carry on with
/// whatever fields could be populated.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// The raw event text does not follow the scheduler log grammar.
    #[error("event text does not match grammar: {0}")]
    Grammar(String),

    /// The scheduler identifier is not a `(cluster.proc.subproc)` triple.
    #[error("invalid scheduler id: {0}")]
    SchedulerId(String),

    /// The `(return value N)` clause is missing or not an integer.
    #[error("invalid exit code: {0}")]
    ExitCode(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A field failed validation (e.g. empty cluster id).
    #[error("validation failed: {0}")]
    Validation(String),
}

impl DomainError {
    pub fn grammar(msg: impl Into<String>) -> Self {
        Self::Grammar(msg.into())
    }

    pub fn scheduler_id(msg: impl Into<String>) -> Self {
        Self::SchedulerId(msg.into())
    }

    pub fn exit_code(msg: impl Into<String>) -> Self {
        Self::ExitCode(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
