//! Transactional storage boundary for the ledger.
//!
//! Two backends implement the same contract: an in-memory store for tests and
//! development, and a Postgres store for production.

pub mod in_memory;
pub mod postgres;
pub mod query;
pub mod r#trait;

pub use in_memory::{InMemoryLedgerStore, InMemoryTransaction};
pub use postgres::{PostgresLedgerStore, PostgresTransaction};
pub use query::{BatchDetail, LedgerQuery, MovementFilter, Page, Pagination};
pub use r#trait::{LedgerStore, LedgerTransaction, StoreError};
