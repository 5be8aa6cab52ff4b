//! Read-side queries over stock rows, movements and batches.
//!
//! Queries run outside any ledger transaction and only see committed data.
//! List queries are paginated and return newest first.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{BatchId, ProductId, UserId, WarehouseId};
use stockledger_inventory::{Batch, BatchStatus, Movement, MovementKind, StockKey, StockRow};

use super::r#trait::StoreError;

/// Pagination parameters for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Maximum number of items to return.
    pub limit: u32,
    /// Offset (0-based).
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { limit: 50, offset: 0 }
    }
}

impl Pagination {
    pub const MAX_LIMIT: u32 = 1000;

    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(50).clamp(1, Self::MAX_LIMIT),
            offset: offset.unwrap_or(0),
        }
    }

    /// From 1-based `page` / `per_page` query parameters.
    pub fn from_page(page: Option<u32>, per_page: Option<u32>) -> Self {
        let limit = per_page.unwrap_or(50).clamp(1, Self::MAX_LIMIT);
        let page = page.unwrap_or(1).max(1);
        Self {
            limit,
            offset: (page - 1).saturating_mul(limit),
        }
    }

    pub(crate) fn slice<T: Clone>(&self, items: &[T]) -> Vec<T> {
        items
            .iter()
            .skip(self.offset as usize)
            .take(self.limit as usize)
            .cloned()
            .collect()
    }
}

/// Filter criteria for movement queries. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementFilter {
    pub product_id: Option<ProductId>,
    pub warehouse_id: Option<WarehouseId>,
    pub lot: Option<String>,
    pub kind: Option<MovementKind>,
    pub document_number: Option<String>,
    pub batch_id: Option<BatchId>,
    pub user_id: Option<UserId>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

impl MovementFilter {
    pub fn matches(&self, m: &Movement) -> bool {
        self.product_id.is_none_or(|p| m.key.product_id == p)
            && self.warehouse_id.is_none_or(|w| m.key.warehouse_id == w)
            && self.lot.as_ref().is_none_or(|l| m.key.lot.as_ref() == Some(l))
            && self.kind.is_none_or(|k| m.kind == k)
            && self
                .document_number
                .as_ref()
                .is_none_or(|d| m.document_number.as_ref() == Some(d))
            && self.batch_id.is_none_or(|b| m.batch_id == Some(b))
            && self.user_id.is_none_or(|u| m.user_id == u)
            && self.created_after.is_none_or(|t| m.created_at >= t)
            && self.created_before.is_none_or(|t| m.created_at <= t)
    }
}

/// One page of a list query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Total matches across all pages.
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, pagination: Pagination) -> Self {
        let has_more = total > u64::from(pagination.offset) + u64::from(pagination.limit);
        Self {
            items,
            total,
            pagination,
            has_more,
        }
    }
}

/// A batch header with the movements it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchDetail {
    pub batch: Batch,
    /// Oldest first; compensating movements follow the originals.
    pub movements: Vec<Movement>,
    pub errors: Vec<String>,
}

/// Async read interface shared by every store backend.
#[async_trait::async_trait]
pub trait LedgerQuery: Send + Sync {
    async fn stock(&self, key: &StockKey) -> Result<Option<StockRow>, StoreError>;

    /// Current rows for the given keys; keys with no row are omitted.
    async fn stock_rows(&self, keys: &[StockKey]) -> Result<Vec<StockRow>, StoreError>;

    async fn movements(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<Page<Movement>, StoreError>;

    /// Every movement carrying `document_number`, oldest first.
    async fn document_movements(&self, document_number: &str) -> Result<Vec<Movement>, StoreError>;

    async fn batch(&self, id: BatchId) -> Result<Option<Batch>, StoreError>;

    /// Every movement owned by the batch, oldest first.
    async fn batch_movements(&self, id: BatchId) -> Result<Vec<Movement>, StoreError>;

    async fn batches(
        &self,
        status: Option<BatchStatus>,
        pagination: Pagination,
    ) -> Result<Page<Batch>, StoreError>;

    async fn batch_detail(&self, id: BatchId) -> Result<Option<BatchDetail>, StoreError> {
        let Some(batch) = self.batch(id).await? else {
            return Ok(None);
        };
        let movements = self.batch_movements(id).await?;
        let errors = batch.errors.clone();
        Ok(Some(BatchDetail {
            batch,
            movements,
            errors,
        }))
    }
}

#[async_trait::async_trait]
impl<S> LedgerQuery for Arc<S>
where
    S: LedgerQuery + ?Sized,
{
    async fn stock(&self, key: &StockKey) -> Result<Option<StockRow>, StoreError> {
        (**self).stock(key).await
    }

    async fn stock_rows(&self, keys: &[StockKey]) -> Result<Vec<StockRow>, StoreError> {
        (**self).stock_rows(keys).await
    }

    async fn movements(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<Page<Movement>, StoreError> {
        (**self).movements(filter, pagination).await
    }

    async fn document_movements(&self, document_number: &str) -> Result<Vec<Movement>, StoreError> {
        (**self).document_movements(document_number).await
    }

    async fn batch(&self, id: BatchId) -> Result<Option<Batch>, StoreError> {
        (**self).batch(id).await
    }

    async fn batch_movements(&self, id: BatchId) -> Result<Vec<Movement>, StoreError> {
        (**self).batch_movements(id).await
    }

    async fn batches(
        &self,
        status: Option<BatchStatus>,
        pagination: Pagination,
    ) -> Result<Page<Batch>, StoreError> {
        (**self).batches(status, pagination).await
    }
}
