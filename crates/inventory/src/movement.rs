//! Ledger movements: the immutable audit trail of every stock change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{BatchId, MovementId, UserId};

use crate::error::{LedgerError, LedgerResult};
use crate::stock::{StockKey, StockRow};
use crate::taxonomy::Motive;

/// Whether a movement brings stock in or takes it out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Entrada,
    Salida,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Entrada => "entrada",
            Direction::Salida => "salida",
        }
    }

    pub fn sign(self) -> i64 {
        match self {
            Direction::Entrada => 1,
            Direction::Salida => -1,
        }
    }
}

/// Closed set of movement classifications.
///
/// Each kind fixes its effect on `quantity` and `reserved`; callers supply an
/// unsigned magnitude and the sign is always derived from here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementKind {
    Entrada,
    Salida,
    TransferenciaEntrada,
    TransferenciaSalida,
    EntradaAjuste,
    SalidaAjuste,
    Reserva,
    LiberacionReserva,
    ConsumoReserva,
    EntradaCompra,
    SalidaVenta,
    /// Shrinkage: an outbound movement whose motive is a shrinkage reason.
    Merma,
}

/// Signed change a movement applies to a stock row, in base units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockEffect {
    pub quantity_delta: i64,
    pub reserved_delta: i64,
}

impl MovementKind {
    pub const ALL: [MovementKind; 12] = [
        MovementKind::Entrada,
        MovementKind::Salida,
        MovementKind::TransferenciaEntrada,
        MovementKind::TransferenciaSalida,
        MovementKind::EntradaAjuste,
        MovementKind::SalidaAjuste,
        MovementKind::Reserva,
        MovementKind::LiberacionReserva,
        MovementKind::ConsumoReserva,
        MovementKind::EntradaCompra,
        MovementKind::SalidaVenta,
        MovementKind::Merma,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MovementKind::Entrada => "ENTRADA",
            MovementKind::Salida => "SALIDA",
            MovementKind::TransferenciaEntrada => "TRANSFERENCIA_ENTRADA",
            MovementKind::TransferenciaSalida => "TRANSFERENCIA_SALIDA",
            MovementKind::EntradaAjuste => "ENTRADA_AJUSTE",
            MovementKind::SalidaAjuste => "SALIDA_AJUSTE",
            MovementKind::Reserva => "RESERVA",
            MovementKind::LiberacionReserva => "LIBERACION_RESERVA",
            MovementKind::ConsumoReserva => "CONSUMO_RESERVA",
            MovementKind::EntradaCompra => "ENTRADA_COMPRA",
            MovementKind::SalidaVenta => "SALIDA_VENTA",
            MovementKind::Merma => "MERMA",
        }
    }

    /// Effect on on-hand quantity, or `None` for reservation-only kinds.
    pub fn direction(self) -> Option<Direction> {
        match self {
            MovementKind::Entrada
            | MovementKind::TransferenciaEntrada
            | MovementKind::EntradaAjuste
            | MovementKind::EntradaCompra => Some(Direction::Entrada),
            MovementKind::Salida
            | MovementKind::TransferenciaSalida
            | MovementKind::SalidaAjuste
            | MovementKind::SalidaVenta
            | MovementKind::Merma
            | MovementKind::ConsumoReserva => Some(Direction::Salida),
            MovementKind::Reserva | MovementKind::LiberacionReserva => None,
        }
    }

    pub fn affects_reserved(self) -> bool {
        matches!(
            self,
            MovementKind::Reserva | MovementKind::LiberacionReserva | MovementKind::ConsumoReserva
        )
    }

    pub fn effect(self, magnitude: i64) -> StockEffect {
        let quantity_delta = self.direction().map(|d| d.sign() * magnitude).unwrap_or(0);
        let reserved_delta = match self {
            MovementKind::Reserva => magnitude,
            MovementKind::LiberacionReserva | MovementKind::ConsumoReserva => -magnitude,
            _ => 0,
        };
        StockEffect {
            quantity_delta,
            reserved_delta,
        }
    }

    /// Sign of the movement as recorded on `Movement::quantity`.
    ///
    /// Quantity-moving kinds use their direction; reservation-only kinds use
    /// the sign of their effect on `reserved`.
    pub fn recorded_sign(self) -> i64 {
        match self.direction() {
            Some(d) => d.sign(),
            None if self == MovementKind::Reserva => 1,
            None => -1,
        }
    }

    /// Kind that undoes this one during batch reversal.
    ///
    /// `ConsumoReserva` has no compensation: consumed reservations are not
    /// revertible through the ledger.
    pub fn compensation(self) -> Option<MovementKind> {
        match self {
            MovementKind::Entrada => Some(MovementKind::Salida),
            MovementKind::Salida => Some(MovementKind::Entrada),
            MovementKind::TransferenciaEntrada => Some(MovementKind::TransferenciaSalida),
            MovementKind::TransferenciaSalida => Some(MovementKind::TransferenciaEntrada),
            MovementKind::EntradaAjuste => Some(MovementKind::SalidaAjuste),
            MovementKind::SalidaAjuste => Some(MovementKind::EntradaAjuste),
            MovementKind::EntradaCompra => Some(MovementKind::SalidaVenta),
            MovementKind::SalidaVenta => Some(MovementKind::EntradaCompra),
            MovementKind::Reserva => Some(MovementKind::LiberacionReserva),
            MovementKind::LiberacionReserva => Some(MovementKind::Reserva),
            MovementKind::Merma => Some(MovementKind::EntradaAjuste),
            MovementKind::ConsumoReserva => None,
        }
    }
}

impl core::fmt::Display for MovementKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for MovementKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        MovementKind::ALL
            .into_iter()
            .find(|k| k.as_str() == wanted)
            .ok_or_else(|| LedgerError::validation(format!("unknown movement kind '{s}'")))
    }
}

/// Unit conversion between the operation unit and the base storage unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversion {
    /// Base units per operation unit (e.g. 12 for a box of twelve).
    pub factor: i64,
}

impl Conversion {
    pub fn new(factor: i64) -> LedgerResult<Self> {
        if factor <= 0 {
            return Err(LedgerError::validation(format!(
                "conversion factor must be positive (got {factor})"
            )));
        }
        Ok(Self { factor })
    }

    pub fn to_base(self, requested: i64) -> LedgerResult<i64> {
        requested
            .checked_mul(self.factor)
            .ok_or_else(|| LedgerError::validation("converted quantity overflow"))
    }
}

/// Who/why/what-for context attached to a movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementMetadata {
    pub user_id: UserId,
    #[serde(default)]
    pub document_number: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub conversion: Option<Conversion>,
    #[serde(default)]
    pub motive: Motive,
    #[serde(default)]
    pub batch_id: Option<BatchId>,
    #[serde(default)]
    pub reversal_of: Option<MovementId>,
}

impl MovementMetadata {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            document_number: None,
            note: None,
            conversion: None,
            motive: Motive::None,
            batch_id: None,
            reversal_of: None,
        }
    }

    pub fn with_document(mut self, document_number: impl Into<String>) -> Self {
        self.document_number = Some(document_number.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_conversion(mut self, conversion: Conversion) -> Self {
        self.conversion = Some(conversion);
        self
    }

    pub fn with_motive(mut self, motive: Motive) -> Self {
        self.motive = motive;
        self
    }

    pub fn in_batch(mut self, batch_id: BatchId) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    pub fn reversing(mut self, movement_id: MovementId) -> Self {
        self.reversal_of = Some(movement_id);
        self
    }
}

/// Immutable record of one stock change.
///
/// Never updated or deleted; corrections are new movements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub id: MovementId,
    pub kind: MovementKind,
    #[serde(flatten)]
    pub key: StockKey,
    /// Signed change in the unit the operation was expressed in.
    pub quantity: i64,
    pub quantity_before: i64,
    pub quantity_after: i64,
    pub reserved_before: i64,
    pub reserved_after: i64,
    pub requested_quantity: Option<i64>,
    pub conversion_factor: Option<i64>,
    pub user_id: UserId,
    pub document_number: Option<String>,
    pub note: Option<String>,
    pub motive: Motive,
    pub batch_id: Option<BatchId>,
    pub reversal_of: Option<MovementId>,
    pub created_at: DateTime<Utc>,
}

impl Movement {
    /// Build the record documenting `before -> after` for a movement of
    /// `requested` operation units.
    ///
    /// Fails if the transition does not match the kind's signed effect, which
    /// would mean the row was mutated by something other than this movement.
    pub fn record(
        id: MovementId,
        kind: MovementKind,
        requested: i64,
        before: &StockRow,
        after: &StockRow,
        metadata: MovementMetadata,
        created_at: DateTime<Utc>,
    ) -> LedgerResult<Movement> {
        if before.key() != after.key() {
            return Err(LedgerError::store("movement spans two different stock rows"));
        }

        let base = match metadata.conversion {
            Some(c) => c.to_base(requested)?,
            None => requested,
        };
        let expected = kind.effect(base);
        let actual_quantity = after.quantity() - before.quantity();
        let actual_reserved = after.reserved() - before.reserved();
        if actual_quantity != expected.quantity_delta || actual_reserved != expected.reserved_delta {
            return Err(LedgerError::store(format!(
                "{kind} on {} recorded quantity change {actual_quantity}/{actual_reserved}, expected {}/{}",
                before.key(),
                expected.quantity_delta,
                expected.reserved_delta
            )));
        }

        Ok(Movement {
            id,
            kind,
            key: before.key().clone(),
            quantity: kind.recorded_sign() * requested,
            quantity_before: before.quantity(),
            quantity_after: after.quantity(),
            reserved_before: before.reserved(),
            reserved_after: after.reserved(),
            requested_quantity: metadata.conversion.map(|_| requested),
            conversion_factor: metadata.conversion.map(|c| c.factor),
            user_id: metadata.user_id,
            document_number: metadata.document_number,
            note: metadata.note,
            motive: metadata.motive,
            batch_id: metadata.batch_id,
            reversal_of: metadata.reversal_of,
            created_at,
        })
    }

    /// Magnitude in base units, as applied to the stock row.
    pub fn base_magnitude(&self) -> i64 {
        let moved = (self.quantity_after - self.quantity_before).abs();
        if moved != 0 {
            moved
        } else {
            (self.reserved_after - self.reserved_before).abs()
        }
    }

    /// Magnitude in the operation unit (what the caller originally supplied).
    pub fn requested_magnitude(&self) -> i64 {
        self.requested_quantity.unwrap_or_else(|| self.quantity.abs())
    }

    pub fn conversion(&self) -> Option<Conversion> {
        self.conversion_factor.map(|factor| Conversion { factor })
    }
}
