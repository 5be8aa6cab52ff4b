//! Errors raised by the core value types.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Text that should hold an identifier did not parse.
    #[error("invalid {kind} '{value}': {reason}")]
    InvalidId {
        kind: &'static str,
        value: String,
        reason: String,
    },
}

impl DomainError {
    pub fn invalid_id(kind: &'static str, value: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidId {
            kind,
            value: value.into(),
            reason: reason.to_string(),
        }
    }
}
