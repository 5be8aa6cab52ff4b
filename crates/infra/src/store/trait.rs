use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use stockledger_core::BatchId;
use stockledger_inventory::{Batch, LedgerError, Movement, StockKey, StockRow};

/// Storage-level failure.
///
/// These are infrastructure errors (locks, connectivity, corrupt rows) as
/// opposed to ledger rule violations, which never originate in a store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Waiting for a row lock exceeded the requested timeout.
    #[error("lock wait timed out on {0}")]
    LockTimeout(String),

    /// A write conflicted with existing data (unique/check constraint).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A persisted row could not be decoded into a domain value.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// Connection, pool or driver failure.
    #[error("backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for LedgerError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::LockTimeout(resource) => LedgerError::LockTimeout { resource },
            other => LedgerError::Store(other.to_string()),
        }
    }
}

/// Factory for ledger transactions.
///
/// Every mutation of a stock row, movement or batch header happens inside a
/// [`LedgerTransaction`]; nothing is visible to other callers until commit.
#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
    type Tx: LedgerTransaction;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;
}

#[async_trait::async_trait]
impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore,
{
    type Tx = S::Tx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        (**self).begin().await
    }
}

/// One open unit of work.
///
/// Locks taken through `lock_*` are held until [`commit`](Self::commit) or
/// [`rollback`](Self::rollback) (or drop, which rolls back). Locks are
/// re-entrant within the same transaction. Reads see the transaction's own
/// uncommitted writes.
#[async_trait::async_trait]
pub trait LedgerTransaction: Send {
    /// Exclusively lock the stock row for `key`, creating a zeroed row if it
    /// does not exist yet, and return its current state.
    async fn lock_stock_row(&mut self, key: &StockKey, timeout: Duration) -> Result<StockRow, StoreError>;

    /// Persist a new state for a row previously locked in this transaction.
    async fn put_stock_row(&mut self, row: &StockRow) -> Result<(), StoreError>;

    async fn insert_movement(&mut self, movement: &Movement) -> Result<(), StoreError>;

    /// Movements carrying `document_number`, oldest first.
    async fn document_movements(&mut self, document_number: &str) -> Result<Vec<Movement>, StoreError>;

    /// Exclusively lock a batch header; `None` if it does not exist.
    async fn lock_batch(&mut self, id: BatchId, timeout: Duration) -> Result<Option<Batch>, StoreError>;

    /// Insert or replace a batch header.
    async fn put_batch(&mut self, batch: &Batch) -> Result<(), StoreError>;

    /// Movements owned by a batch, oldest first.
    async fn batch_movements(&mut self, id: BatchId) -> Result<Vec<Movement>, StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}
