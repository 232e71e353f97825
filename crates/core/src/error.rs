//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic failures (validation, rejected state
/// transitions). Storage and transport concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Producer input failed validation (e.g. an unsupported verb).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A state transition was attempted from a state that does not allow it.
    #[error("invalid transition: cannot {event} a job in state {from}")]
    InvalidTransition { from: String, event: &'static str },

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn transition(from: impl core::fmt::Display, event: &'static str) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            event,
        }
    }
}
