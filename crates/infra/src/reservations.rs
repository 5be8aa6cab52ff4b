//! Reserve / release / consume on top of the stock ledger.
//!
//! Reservation state is never stored; it is re-derived from the document's
//! movements after the affected rows are locked, so concurrent calls for the
//! same document see each other's committed work.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{info, instrument};

use stockledger_core::UserId;
use stockledger_inventory::{
    LedgerError, LedgerResult, Movement, MovementKind, MovementMetadata, Reservation,
    ReservationState, StockKey, derive_reservations,
};

use crate::ledger::{StockLedger, rollback_quietly};
use crate::store::{LedgerQuery, LedgerStore, LedgerTransaction};

pub struct ReservationManager<S> {
    ledger: Arc<StockLedger<S>>,
}

impl<S> ReservationManager<S>
where
    S: LedgerStore + LedgerQuery,
{
    pub fn new(ledger: Arc<StockLedger<S>>) -> Self {
        Self { ledger }
    }

    /// Hold `quantity` of `key` for `document`.
    ///
    /// Fails with `StockInsufficient` when unreserved stock is short, and with
    /// `InvalidReservationState` if the document already has a reservation
    /// (in any state) on this key.
    #[instrument(skip(self, key), fields(product_id = %key.product_id, warehouse_id = %key.warehouse_id), err)]
    pub async fn reserve(
        &self,
        key: &StockKey,
        quantity: i64,
        document: &str,
        actor: UserId,
    ) -> LedgerResult<Movement> {
        let document = normalize_document(document)?;
        let mut tx = self.ledger.begin().await?;
        match self.reserve_in(&mut tx, key, quantity, &document, actor).await {
            Ok(movement) => {
                tx.commit().await?;
                info!(document = %document, quantity, "stock reserved");
                Ok(movement)
            }
            Err(e) => {
                rollback_quietly(tx).await;
                Err(e)
            }
        }
    }

    async fn reserve_in(
        &self,
        tx: &mut S::Tx,
        key: &StockKey,
        quantity: i64,
        document: &str,
        actor: UserId,
    ) -> LedgerResult<Movement> {
        self.ledger.locks().lock_row(tx, key).await?;
        let current = state_for(tx, document, key).await?;
        if current != ReservationState::None {
            return Err(LedgerError::invalid_reservation(format!(
                "document {document} already has a {} reservation on {key}",
                current.name()
            )));
        }
        self.ledger
            .apply_in(
                tx,
                key,
                quantity,
                MovementKind::Reserva,
                MovementMetadata::new(actor).with_document(document),
            )
            .await
    }

    /// Release every open reservation of `document`.
    ///
    /// Idempotent: reservations already released or consumed (or a document
    /// with no reservations) produce no movements and succeed.
    #[instrument(skip(self), err)]
    pub async fn release(&self, document: &str, actor: UserId) -> LedgerResult<Vec<Movement>> {
        let document = normalize_document(document)?;
        let mut tx = self.ledger.begin().await?;
        match self.release_in(&mut tx, &document, actor).await {
            Ok(movements) => {
                tx.commit().await?;
                info!(document = %document, released = movements.len(), "reservations released");
                Ok(movements)
            }
            Err(e) => {
                rollback_quietly(tx).await;
                Err(e)
            }
        }
    }

    async fn release_in(&self, tx: &mut S::Tx, document: &str, actor: UserId) -> LedgerResult<Vec<Movement>> {
        let keys = self.lock_document_rows(tx, document).await?;
        let mut movements = Vec::new();
        for key in keys {
            if let ReservationState::Reserved { quantity } = state_for(tx, document, &key).await? {
                let m = self
                    .ledger
                    .apply_in(
                        tx,
                        &key,
                        quantity,
                        MovementKind::LiberacionReserva,
                        MovementMetadata::new(actor).with_document(document),
                    )
                    .await?;
                movements.push(m);
            }
        }
        Ok(movements)
    }

    /// Consume every reservation of `document`, decrementing both on-hand and
    /// reserved by the reserved amount.
    ///
    /// Legal only while every reservation of the document is `Reserved`.
    #[instrument(skip(self), err)]
    pub async fn consume(&self, document: &str, actor: UserId) -> LedgerResult<Vec<Movement>> {
        let document = normalize_document(document)?;
        let mut tx = self.ledger.begin().await?;
        match self.consume_in(&mut tx, &document, actor).await {
            Ok(movements) => {
                tx.commit().await?;
                info!(document = %document, consumed = movements.len(), "reservations consumed");
                Ok(movements)
            }
            Err(e) => {
                rollback_quietly(tx).await;
                Err(e)
            }
        }
    }

    async fn consume_in(&self, tx: &mut S::Tx, document: &str, actor: UserId) -> LedgerResult<Vec<Movement>> {
        let keys = self.lock_document_rows(tx, document).await?;
        if keys.is_empty() {
            return Err(LedgerError::invalid_reservation(format!(
                "document {document} has no reservation to consume"
            )));
        }

        let mut open = Vec::with_capacity(keys.len());
        for key in keys {
            match state_for(tx, document, &key).await? {
                ReservationState::Reserved { quantity } => open.push((key, quantity)),
                other => {
                    return Err(LedgerError::invalid_reservation(format!(
                        "reservation of {document} on {key} is {}",
                        other.name()
                    )));
                }
            }
        }

        let mut movements = Vec::with_capacity(open.len());
        for (key, quantity) in open {
            let m = self
                .ledger
                .apply_in(
                    tx,
                    &key,
                    quantity,
                    MovementKind::ConsumoReserva,
                    MovementMetadata::new(actor).with_document(document),
                )
                .await?;
            movements.push(m);
        }
        Ok(movements)
    }

    /// Derived state of every reservation of `document` (committed data only).
    pub async fn status(&self, document: &str) -> LedgerResult<Vec<Reservation>> {
        let document = normalize_document(document)?;
        let movements = self.ledger.store().document_movements(&document).await?;
        derive_reservations(&document, &movements)
    }

    /// Lock every row the document has reservation movements on, in key
    /// order, and return those keys.
    async fn lock_document_rows(&self, tx: &mut S::Tx, document: &str) -> LedgerResult<Vec<StockKey>> {
        let keys: BTreeSet<StockKey> = tx
            .document_movements(document)
            .await?
            .into_iter()
            .filter(|m| m.kind.affects_reserved())
            .map(|m| m.key)
            .collect();
        for key in &keys {
            self.ledger.locks().lock_row(tx, key).await?;
        }
        Ok(keys.into_iter().collect())
    }
}

async fn state_for<T: LedgerTransaction>(
    tx: &mut T,
    document: &str,
    key: &StockKey,
) -> LedgerResult<ReservationState> {
    let movements = tx.document_movements(document).await?;
    let state = derive_reservations(document, &movements)?
        .into_iter()
        .find(|r| &r.key == key)
        .map(|r| r.state)
        .unwrap_or(ReservationState::None);
    Ok(state)
}

fn normalize_document(document: &str) -> LedgerResult<String> {
    let trimmed = document.trim();
    if trimmed.is_empty() {
        return Err(LedgerError::validation("document number is required"));
    }
    Ok(trimmed.to_string())
}
