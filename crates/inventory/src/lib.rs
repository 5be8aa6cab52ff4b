//! Inventory stock domain.
//!
//! Business rules for stock rows, ledger movements, reservations and bulk
//! adjustment batches, implemented purely as deterministic domain logic (no IO,
//! no HTTP, no storage). Transactions and locking live in `stockledger-infra`.

pub mod batch;
pub mod catalog;
pub mod error;
pub mod movement;
pub mod reservation;
pub mod stock;
pub mod taxonomy;
pub mod upload;

pub use batch::{
    Batch, BatchRow, BatchStatus, DuplicateGroup, UploadStep, ValidationPolicy, detect_duplicates,
    merge_duplicates, project_stock, validate_rows,
};
pub use catalog::{CatalogProduct, CatalogWarehouse, Catalogs, Resolution, normalize_text};
pub use error::{LedgerError, LedgerResult};
pub use movement::{Conversion, Direction, Movement, MovementKind, MovementMetadata, StockEffect};
pub use reservation::{Reservation, ReservationState, derive_reservations};
pub use stock::{StockKey, StockRow};
pub use taxonomy::{Motive, MotiveRequirement, OperationType, ReasonEntry, Taxonomy};
pub use upload::{RawAdjustmentRow, UploadFormat};
