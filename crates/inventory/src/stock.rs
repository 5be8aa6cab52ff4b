//! Stock rows: on-hand and reserved quantity per product × warehouse × lot.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{ProductId, WarehouseId};

use crate::error::{LedgerError, LedgerResult};
use crate::movement::MovementKind;

/// Identity of a stock row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockKey {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lot: Option<String>,
}

impl StockKey {
    pub fn new(product_id: ProductId, warehouse_id: WarehouseId) -> Self {
        Self {
            product_id,
            warehouse_id,
            lot: None,
        }
    }

    /// Same product/warehouse, scoped to a lot. Blank lots collapse to `None`.
    pub fn with_lot(mut self, lot: impl Into<String>) -> Self {
        let lot = lot.into();
        let trimmed = lot.trim();
        self.lot = if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        };
        self
    }
}

impl core::fmt::Display for StockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "product {} @ warehouse {}", self.product_id, self.warehouse_id)?;
        if let Some(lot) = &self.lot {
            write!(f, " lot {lot}")?;
        }
        Ok(())
    }
}

/// Quantity-bearing aggregate for one product/warehouse/lot.
///
/// Invariant at every committed state: `0 <= reserved <= quantity`.
/// Rows are never deleted, only zeroed, and only the ledger mutates them
/// (through [`StockRow::apply`], which returns the successor state).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRow {
    key: StockKey,
    quantity: i64,
    reserved: i64,
    expiration_date: Option<NaiveDate>,
    version: u64,
    updated_at: DateTime<Utc>,
}

impl StockRow {
    /// A row that has never seen a movement.
    pub fn empty(key: StockKey, now: DateTime<Utc>) -> Self {
        Self {
            key,
            quantity: 0,
            reserved: 0,
            expiration_date: None,
            version: 0,
            updated_at: now,
        }
    }

    /// Rebuild a row from persisted columns, re-checking the invariant.
    pub fn restore(
        key: StockKey,
        quantity: i64,
        reserved: i64,
        expiration_date: Option<NaiveDate>,
        version: u64,
        updated_at: DateTime<Utc>,
    ) -> LedgerResult<Self> {
        let row = Self {
            key,
            quantity,
            reserved,
            expiration_date,
            version,
            updated_at,
        };
        row.check_invariant()?;
        Ok(row)
    }

    pub fn key(&self) -> &StockKey {
        &self.key
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn reserved(&self) -> i64 {
        self.reserved
    }

    /// On-hand stock not held by a reservation.
    pub fn available(&self) -> i64 {
        self.quantity - self.reserved
    }

    pub fn expiration_date(&self) -> Option<NaiveDate> {
        self.expiration_date
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn with_expiration_date(mut self, date: Option<NaiveDate>) -> Self {
        self.expiration_date = date;
        self
    }

    /// Decide the successor state for a movement of `magnitude` base units.
    ///
    /// The sign of the change comes from `kind`; `magnitude` must be positive.
    /// Does not mutate `self`, so a rejected movement leaves no trace.
    pub fn apply(&self, kind: MovementKind, magnitude: i64, now: DateTime<Utc>) -> LedgerResult<StockRow> {
        if magnitude <= 0 {
            return Err(LedgerError::validation(format!(
                "movement quantity must be positive (got {magnitude})"
            )));
        }

        let effect = kind.effect(magnitude);
        let quantity = self
            .quantity
            .checked_add(effect.quantity_delta)
            .ok_or_else(|| LedgerError::validation("quantity overflow"))?;
        let reserved = self
            .reserved
            .checked_add(effect.reserved_delta)
            .ok_or_else(|| LedgerError::validation("reserved quantity overflow"))?;

        if quantity < 0 {
            return Err(LedgerError::StockInsufficient {
                key: self.key.clone(),
                requested: magnitude,
                available: self.quantity,
            });
        }

        if kind == MovementKind::Reserva && magnitude > self.available() {
            return Err(LedgerError::StockInsufficient {
                key: self.key.clone(),
                requested: magnitude,
                available: self.available(),
            });
        }

        if reserved < 0 {
            return Err(LedgerError::invalid_reservation(format!(
                "{} of {magnitude} exceeds reserved quantity {} for {}",
                kind.as_str(),
                self.reserved,
                self.key
            )));
        }

        if reserved > quantity {
            return Err(LedgerError::ReservationExceedsStock {
                key: self.key.clone(),
                reserved,
                quantity,
            });
        }

        Ok(StockRow {
            key: self.key.clone(),
            quantity,
            reserved,
            expiration_date: self.expiration_date,
            version: self.version + 1,
            updated_at: now,
        })
    }

    fn check_invariant(&self) -> LedgerResult<()> {
        if self.quantity < 0 || self.reserved < 0 || self.reserved > self.quantity {
            return Err(LedgerError::store(format!(
                "stock row {} violates 0 <= reserved ({}) <= quantity ({})",
                self.key, self.reserved, self.quantity
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_key() -> StockKey {
        StockKey::new(ProductId::new(), WarehouseId::new())
    }

    fn row_with(quantity: i64, reserved: i64) -> StockRow {
        StockRow::restore(test_key(), quantity, reserved, None, 0, Utc::now()).unwrap()
    }

    #[test]
    fn inbound_movement_increases_quantity_and_version() {
        let row = StockRow::empty(test_key(), Utc::now());
        let next = row.apply(MovementKind::EntradaAjuste, 100, Utc::now()).unwrap();
        assert_eq!(next.quantity(), 100);
        assert_eq!(next.reserved(), 0);
        assert_eq!(next.version(), 1);
        assert_eq!(row.quantity(), 0);
    }

    #[test]
    fn outbound_beyond_on_hand_is_insufficient() {
        let row = row_with(10, 0);
        let err = row.apply(MovementKind::SalidaVenta, 11, Utc::now()).unwrap_err();
        match err {
            LedgerError::StockInsufficient {
                requested, available, ..
            } => {
                assert_eq!(requested, 11);
                assert_eq!(available, 10);
            }
            other => panic!("expected StockInsufficient, got {other:?}"),
        }
    }

    #[test]
    fn outbound_into_reserved_stock_is_rejected() {
        let row = row_with(100, 80);
        let err = row.apply(MovementKind::Salida, 50, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::ReservationExceedsStock {
                reserved: 80,
                quantity: 50,
                ..
            }
        ));
    }

    #[test]
    fn reserve_is_limited_by_available_stock() {
        let row = row_with(100, 60);
        let err = row.apply(MovementKind::Reserva, 50, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::StockInsufficient { available: 40, .. }
        ));

        let ok = row.apply(MovementKind::Reserva, 40, Utc::now()).unwrap();
        assert_eq!(ok.reserved(), 100);
        assert_eq!(ok.quantity(), 100);
    }

    #[test]
    fn consuming_a_reservation_decrements_both_sides() {
        let row = row_with(1000, 100);
        let next = row.apply(MovementKind::ConsumoReserva, 100, Utc::now()).unwrap();
        assert_eq!(next.quantity(), 900);
        assert_eq!(next.reserved(), 0);
    }

    #[test]
    fn releasing_more_than_reserved_is_a_state_error() {
        let row = row_with(10, 5);
        let err = row.apply(MovementKind::LiberacionReserva, 6, Utc::now()).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidReservationState(_)));
    }

    #[test]
    fn zero_or_negative_magnitude_is_rejected() {
        let row = row_with(10, 0);
        assert!(matches!(
            row.apply(MovementKind::Entrada, 0, Utc::now()),
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            row.apply(MovementKind::Entrada, -5, Utc::now()),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn restore_rejects_rows_that_break_the_invariant() {
        assert!(StockRow::restore(test_key(), 5, 6, None, 0, Utc::now()).is_err());
        assert!(StockRow::restore(test_key(), -1, 0, None, 0, Utc::now()).is_err());
    }

    #[test]
    fn blank_lot_collapses_to_none() {
        let key = test_key().with_lot("   ");
        assert_eq!(key.lot, None);
        let key = test_key().with_lot(" L-01 ");
        assert_eq!(key.lot.as_deref(), Some("L-01"));
    }

    fn any_kind() -> impl Strategy<Value = MovementKind> {
        prop::sample::select(MovementKind::ALL.to_vec())
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: whatever sequence of movements is attempted, every accepted
        /// state keeps `0 <= reserved <= quantity`, and the on-hand change of an
        /// accepted movement equals the kind's signed effect.
        #[test]
        fn invariant_holds_for_any_movement_sequence(
            ops in prop::collection::vec((any_kind(), 1i64..500i64), 1..60)
        ) {
            let mut row = StockRow::empty(test_key(), Utc::now());
            for (kind, magnitude) in ops {
                match row.apply(kind, magnitude, Utc::now()) {
                    Ok(next) => {
                        prop_assert!(next.quantity() >= 0);
                        prop_assert!(next.reserved() >= 0);
                        prop_assert!(next.reserved() <= next.quantity());
                        prop_assert_eq!(
                            next.quantity() - row.quantity(),
                            kind.effect(magnitude).quantity_delta
                        );
                        prop_assert_eq!(next.version(), row.version() + 1);
                        row = next;
                    }
                    Err(_) => {
                        prop_assert!(row.reserved() <= row.quantity());
                    }
                }
            }
        }
    }
}
