//! Reservation state machine.
//!
//! A reservation has no row of its own: its state is derived from the
//! RESERVA / LIBERACION_RESERVA / CONSUMO_RESERVA movements carrying the same
//! document number on the same stock key.
//!
//! `None -> Reserved -> {Consumed | Released}`; both end states are terminal.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};
use crate::movement::{Movement, MovementKind};
use crate::stock::StockKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ReservationState {
    None,
    Reserved { quantity: i64 },
    Consumed { quantity: i64 },
    Released { quantity: i64 },
}

impl ReservationState {
    pub fn quantity(self) -> i64 {
        match self {
            ReservationState::None => 0,
            ReservationState::Reserved { quantity }
            | ReservationState::Consumed { quantity }
            | ReservationState::Released { quantity } => quantity,
        }
    }

    pub fn is_open(self) -> bool {
        matches!(self, ReservationState::Reserved { .. })
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ReservationState::Consumed { .. } | ReservationState::Released { .. }
        )
    }

    /// Successor state after a reservation movement of `quantity` base units.
    pub fn transition(self, kind: MovementKind, quantity: i64) -> LedgerResult<ReservationState> {
        match (self, kind) {
            (ReservationState::None, MovementKind::Reserva) => {
                Ok(ReservationState::Reserved { quantity })
            }
            (ReservationState::Reserved { quantity: held }, MovementKind::LiberacionReserva) => {
                Ok(ReservationState::Released { quantity: held })
            }
            (ReservationState::Reserved { quantity: held }, MovementKind::ConsumoReserva) => {
                Ok(ReservationState::Consumed { quantity: held })
            }
            (state, kind) => Err(LedgerError::invalid_reservation(format!(
                "cannot apply {kind} to a reservation in state {}",
                state.name()
            ))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ReservationState::None => "none",
            ReservationState::Reserved { .. } => "reserved",
            ReservationState::Consumed { .. } => "consumed",
            ReservationState::Released { .. } => "released",
        }
    }
}

/// Derived reservation of one document on one stock key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub document_number: String,
    pub key: StockKey,
    #[serde(flatten)]
    pub state: ReservationState,
}

/// Fold the reservation movements of `document` (oldest first) into one
/// [`Reservation`] per stock key, ordered by key.
///
/// Movements of other documents or other kinds are ignored. A sequence that
/// breaks the state machine is reported as `InvalidReservationState`.
pub fn derive_reservations(document: &str, movements: &[Movement]) -> LedgerResult<Vec<Reservation>> {
    let mut states: BTreeMap<StockKey, ReservationState> = BTreeMap::new();
    for m in movements {
        if !m.kind.affects_reserved() || m.document_number.as_deref() != Some(document) {
            continue;
        }
        let state = states.entry(m.key.clone()).or_insert(ReservationState::None);
        *state = state.transition(m.kind, m.base_magnitude())?;
    }

    Ok(states
        .into_iter()
        .map(|(key, state)| Reservation {
            document_number: document.to_string(),
            key,
            state,
        })
        .collect())
}
