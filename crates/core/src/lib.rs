//! `stockledger-core`: identifiers and the error type shared by every crate.
//!
//! No infrastructure concerns live here.

pub mod error;
pub mod id;

pub use error::DomainError;
pub use id::{BatchId, MovementId, ProductId, UserId, WarehouseId};
