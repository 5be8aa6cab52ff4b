//! The stock ledger: the only gateway through which stock rows change.

use std::time::Duration;

use chrono::Utc;
use tracing::{Span, instrument, warn};

use stockledger_core::BatchId;
use stockledger_inventory::{
    Batch, LedgerError, LedgerResult, Movement, MovementKind, MovementMetadata, StockKey, StockRow,
};

use crate::recorder::MovementRecorder;
use crate::store::{LedgerQuery, LedgerStore, LedgerTransaction};

/// Tunables for the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerSettings {
    /// Upper bound on waiting for a row lock.
    pub lock_timeout: Duration,
    /// Longest accepted movement note / reversal reason, in characters.
    pub max_note_len: usize,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            max_note_len: 500,
        }
    }
}

/// Acquires exclusive access to stock rows and batch headers for the rest of
/// a transaction, bounded by the configured lock timeout.
#[derive(Debug, Clone, Copy)]
pub struct ConcurrencyController {
    lock_timeout: Duration,
}

impl ConcurrencyController {
    pub fn new(lock_timeout: Duration) -> Self {
        Self { lock_timeout }
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    pub async fn lock_row<T>(&self, tx: &mut T, key: &StockKey) -> LedgerResult<StockRow>
    where
        T: LedgerTransaction,
    {
        Ok(tx.lock_stock_row(key, self.lock_timeout).await?)
    }

    pub async fn lock_batch<T>(&self, tx: &mut T, id: BatchId) -> LedgerResult<Option<Batch>>
    where
        T: LedgerTransaction,
    {
        Ok(tx.lock_batch(id, self.lock_timeout).await?)
    }
}

/// Transactional API over stock rows.
///
/// Composes row locking, the quantity rules on [`StockRow`] and movement
/// recording into one atomic unit: either the row update and its movement
/// both commit or neither does.
#[derive(Debug)]
pub struct StockLedger<S> {
    store: S,
    locks: ConcurrencyController,
    recorder: MovementRecorder,
    settings: LedgerSettings,
}

impl<S> StockLedger<S>
where
    S: LedgerStore + LedgerQuery,
{
    pub fn new(store: S, settings: LedgerSettings) -> Self {
        Self {
            store,
            locks: ConcurrencyController::new(settings.lock_timeout),
            recorder: MovementRecorder::new(settings.max_note_len),
            settings,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    pub fn locks(&self) -> &ConcurrencyController {
        &self.locks
    }

    pub async fn begin(&self) -> LedgerResult<S::Tx> {
        Ok(self.store.begin().await?)
    }

    /// Apply one movement in its own transaction.
    #[instrument(
        skip_all,
        fields(
            product_id = %key.product_id,
            warehouse_id = %key.warehouse_id,
            kind = %kind,
            quantity = quantity,
            delta = tracing::field::Empty
        ),
        err
    )]
    pub async fn apply(
        &self,
        key: &StockKey,
        quantity: i64,
        kind: MovementKind,
        metadata: MovementMetadata,
    ) -> LedgerResult<Movement> {
        let mut tx = self.begin().await?;
        match self.apply_in(&mut tx, key, quantity, kind, metadata).await {
            Ok(movement) => {
                tx.commit().await?;
                Span::current().record("delta", movement.quantity_after - movement.quantity_before);
                Ok(movement)
            }
            Err(e) => {
                rollback_quietly(tx).await;
                Err(e)
            }
        }
    }

    /// Apply one movement inside a caller-owned transaction.
    ///
    /// Locks the row (re-entrant), checks the quantity rules and appends the
    /// movement. On error the caller must roll `tx` back.
    pub async fn apply_in(
        &self,
        tx: &mut S::Tx,
        key: &StockKey,
        quantity: i64,
        kind: MovementKind,
        metadata: MovementMetadata,
    ) -> LedgerResult<Movement> {
        if quantity <= 0 {
            return Err(LedgerError::validation(format!(
                "movement quantity must be positive (got {quantity})"
            )));
        }
        self.recorder.check_metadata(&metadata)?;
        let base = match metadata.conversion {
            Some(conversion) => conversion.to_base(quantity)?,
            None => quantity,
        };

        let before = self.locks.lock_row(tx, key).await?;
        let now = Utc::now();
        let after = before.apply(kind, base, now)?;
        tx.put_stock_row(&after).await?;
        self.recorder
            .record(tx, kind, quantity, &before, &after, metadata, now)
            .await
    }
}

/// Roll back after a failure, logging (not propagating) rollback errors so
/// the original failure reaches the caller.
pub(crate) async fn rollback_quietly<T: LedgerTransaction>(tx: T) {
    if let Err(e) = tx.rollback().await {
        warn!(error = %e, "rollback failed");
    }
}
