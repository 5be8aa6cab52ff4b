//! Ledger error taxonomy.

use stockledger_core::{BatchId, DomainError};
use thiserror::Error;

use crate::stock::StockKey;

/// Result type used by ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors raised by stock ledger operations.
///
/// Row-level upload problems are *not* raised through this type; they are
/// collected on [`crate::BatchRow::errors`]. Everything here aborts the
/// enclosing transaction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The movement would drive on-hand (or unreserved) quantity below zero.
    #[error("insufficient stock for {key}: requested {requested}, available {available}")]
    StockInsufficient {
        key: StockKey,
        requested: i64,
        available: i64,
    },

    /// Reserved quantity would exceed on-hand quantity.
    #[error("reservation exceeds stock for {key}: reserved {reserved}, quantity {quantity}")]
    ReservationExceedsStock {
        key: StockKey,
        reserved: i64,
        quantity: i64,
    },

    /// Reserve/consume/release called out of sequence.
    #[error("invalid reservation state: {0}")]
    InvalidReservationState(String),

    /// Input rejected before touching any stock row.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The batch is not in a state that allows reversal.
    #[error("batch {batch_id} is not revertible: {reason}")]
    BatchNotRevertible { batch_id: BatchId, reason: String },

    /// Illegal batch lifecycle transition (e.g. cancelling a processed batch).
    #[error("invalid batch state: {0}")]
    InvalidBatchState(String),

    #[error("batch {0} not found")]
    BatchNotFound(BatchId),

    /// Waiting for a row lock exceeded the configured timeout. Retryable.
    #[error("lock wait timed out on {resource}")]
    LockTimeout { resource: String },

    /// A batch commit was rolled back because one of its rows failed.
    #[error("batch commit aborted at line {line}: {source}")]
    BatchCommitFailed {
        line: usize,
        source: Box<LedgerError>,
    },

    /// A reversal was rolled back because a compensating movement failed.
    #[error("reversal of batch {batch_id} blocked by {key}: {source}")]
    ReversalBlocked {
        batch_id: BatchId,
        key: StockKey,
        source: Box<LedgerError>,
    },

    /// Storage failure (connection, serialization, constraint).
    #[error("store error: {0}")]
    Store(String),
}

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_reservation(msg: impl Into<String>) -> Self {
        Self::InvalidReservationState(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Whether the caller may retry the same operation unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::LockTimeout { .. } => true,
            LedgerError::BatchCommitFailed { source, .. } => source.is_retryable(),
            LedgerError::ReversalBlocked { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// The innermost error (unwraps commit/reversal wrappers).
    pub fn root_cause(&self) -> &LedgerError {
        match self {
            LedgerError::BatchCommitFailed { source, .. }
            | LedgerError::ReversalBlocked { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<DomainError> for LedgerError {
    fn from(value: DomainError) -> Self {
        LedgerError::Validation(value.to_string())
    }
}
