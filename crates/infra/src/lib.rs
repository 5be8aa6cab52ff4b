//! Infrastructure layer: transactional stores and the ledger services built
//! on them.

pub mod batch_processor;
pub mod ledger;
pub mod recorder;
pub mod reservations;
pub mod reversal;
pub mod store;

pub use batch_processor::{AdjustmentBatchProcessor, CommitRequest};
pub use ledger::{ConcurrencyController, LedgerSettings, StockLedger};
pub use recorder::MovementRecorder;
pub use reservations::ReservationManager;
pub use reversal::ReversalEngine;

#[cfg(test)]
mod integration_tests;
