//! Append-only movement recording.

use chrono::{DateTime, Utc};
use tracing::debug;

use stockledger_core::MovementId;
use stockledger_inventory::{
    LedgerError, LedgerResult, Movement, MovementKind, MovementMetadata, StockRow,
};

use crate::store::LedgerTransaction;

/// Writes one immutable [`Movement`] per stock row mutation, inside the
/// transaction that performed the mutation.
#[derive(Debug, Clone, Copy)]
pub struct MovementRecorder {
    max_note_len: usize,
}

impl MovementRecorder {
    pub fn new(max_note_len: usize) -> Self {
        Self { max_note_len }
    }

    /// Reject metadata the recorder would refuse to persist.
    pub fn check_metadata(&self, metadata: &MovementMetadata) -> LedgerResult<()> {
        if let Some(note) = &metadata.note {
            let len = note.chars().count();
            if len > self.max_note_len {
                return Err(LedgerError::validation(format!(
                    "note is {len} characters, limit is {}",
                    self.max_note_len
                )));
            }
        }
        if let Some(doc) = &metadata.document_number {
            if doc.trim().is_empty() {
                return Err(LedgerError::validation("document number must not be blank"));
            }
        }
        Ok(())
    }

    /// Verify `before -> after` matches `kind` and append the movement.
    #[allow(clippy::too_many_arguments)]
    pub async fn record<T>(
        &self,
        tx: &mut T,
        kind: MovementKind,
        requested: i64,
        before: &StockRow,
        after: &StockRow,
        metadata: MovementMetadata,
        now: DateTime<Utc>,
    ) -> LedgerResult<Movement>
    where
        T: LedgerTransaction,
    {
        self.check_metadata(&metadata)?;
        let movement = Movement::record(MovementId::new(), kind, requested, before, after, metadata, now)?;
        tx.insert_movement(&movement).await?;

        debug!(
            movement_id = %movement.id,
            kind = %movement.kind,
            product_id = %movement.key.product_id,
            warehouse_id = %movement.key.warehouse_id,
            quantity_before = movement.quantity_before,
            quantity_after = movement.quantity_after,
            reserved_after = movement.reserved_after,
            "movement recorded"
        );
        Ok(movement)
    }
}

impl Default for MovementRecorder {
    fn default() -> Self {
        Self::new(500)
    }
}
