//! Compensating reversal of committed batches.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};

use stockledger_core::{BatchId, UserId};
use stockledger_inventory::{Batch, LedgerError, LedgerResult, MovementMetadata, StockKey};

use crate::ledger::{StockLedger, rollback_quietly};
use crate::store::{LedgerQuery, LedgerStore, LedgerTransaction};

pub struct ReversalEngine<S> {
    ledger: Arc<StockLedger<S>>,
}

impl<S> ReversalEngine<S>
where
    S: LedgerStore + LedgerQuery,
{
    pub fn new(ledger: Arc<StockLedger<S>>) -> Self {
        Self { ledger }
    }

    /// Undo every movement of a processed batch with its compensating kind,
    /// all in one transaction, and mark the batch reverted.
    ///
    /// Every touched stock row is locked up front in key order, then movements
    /// are compensated newest first. Compensations carry no motive. If any compensation is
    /// rejected the whole reversal rolls back, the batch stays processed and
    /// `ReversalBlocked` names the blocking stock row.
    #[instrument(skip(self, reason), fields(batch_id = %batch_id, actor = %actor), err)]
    pub async fn revert(&self, batch_id: BatchId, reason: &str, actor: UserId) -> LedgerResult<Batch> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(LedgerError::validation("a reversal reason is required"));
        }
        let max = self.ledger.settings().max_note_len;
        if reason.chars().count() > max {
            return Err(LedgerError::validation(format!(
                "reversal reason exceeds {max} characters"
            )));
        }

        let mut tx = self.ledger.begin().await?;
        match self.revert_in(&mut tx, batch_id, reason, actor).await {
            Ok(batch) => {
                tx.commit().await?;
                info!(batch_id = %batch_id, compensated = batch.rows_processed, "batch reverted");
                Ok(batch)
            }
            Err(e) => {
                rollback_quietly(tx).await;
                warn!(batch_id = %batch_id, error = %e, "batch reversal aborted");
                Err(e)
            }
        }
    }

    async fn revert_in(
        &self,
        tx: &mut S::Tx,
        batch_id: BatchId,
        reason: &str,
        actor: UserId,
    ) -> LedgerResult<Batch> {
        let mut batch = self
            .ledger
            .locks()
            .lock_batch(tx, batch_id)
            .await?
            .ok_or(LedgerError::BatchNotFound(batch_id))?;
        batch.ensure_revertible()?;

        let originals: Vec<_> = tx
            .batch_movements(batch_id)
            .await?
            .into_iter()
            .filter(|m| m.reversal_of.is_none())
            .collect();

        if let Some(m) = originals.iter().find(|m| m.kind.compensation().is_none()) {
            return Err(LedgerError::BatchNotRevertible {
                batch_id,
                reason: format!("movement {} ({}) has no compensating kind", m.id, m.kind),
            });
        }

        let keys: BTreeSet<StockKey> = originals.iter().map(|m| m.key.clone()).collect();
        for key in &keys {
            self.ledger
                .locks()
                .lock_row(tx, key)
                .await
                .map_err(|source| LedgerError::ReversalBlocked {
                    batch_id,
                    key: key.clone(),
                    source: Box::new(source),
                })?;
        }

        for original in originals.iter().rev() {
            let Some(kind) = original.kind.compensation() else {
                continue;
            };
            // The motive stays on the original, reachable through `reversal_of`.
            let mut metadata = MovementMetadata::new(actor)
                .with_note(reason)
                .in_batch(batch_id)
                .reversing(original.id);
            if let Some(conversion) = original.conversion() {
                metadata = metadata.with_conversion(conversion);
            }
            if let Some(doc) = &original.document_number {
                metadata = metadata.with_document(doc.clone());
            }

            self.ledger
                .apply_in(tx, &original.key, original.requested_magnitude(), kind, metadata)
                .await
                .map_err(|source| LedgerError::ReversalBlocked {
                    batch_id,
                    key: original.key.clone(),
                    source: Box::new(source),
                })?;
        }

        batch.mark_reverted(actor, reason, Utc::now())?;
        tx.put_batch(&batch).await?;
        Ok(batch)
    }
}
