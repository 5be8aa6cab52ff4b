use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::OwnedMutexGuard;

use stockledger_core::BatchId;
use stockledger_inventory::{Batch, BatchStatus, Movement, StockKey, StockRow};

use super::query::{LedgerQuery, MovementFilter, Page, Pagination};
use super::r#trait::{LedgerStore, LedgerTransaction, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LockKey {
    Stock(StockKey),
    Batch(BatchId),
}

impl core::fmt::Display for LockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            LockKey::Stock(key) => write!(f, "stock row {key}"),
            LockKey::Batch(id) => write!(f, "batch {id}"),
        }
    }
}

#[derive(Debug, Default)]
struct Committed {
    rows: HashMap<StockKey, StockRow>,
    movements: Vec<Movement>,
    batches: HashMap<BatchId, Batch>,
}

#[derive(Debug, Default)]
struct Shared {
    committed: RwLock<Committed>,
    locks: Mutex<HashMap<LockKey, Arc<tokio::sync::Mutex<()>>>>,
}

/// In-memory ledger store.
///
/// Intended for tests/dev. Row locks are per-key async mutexes; a transaction
/// buffers its writes and publishes them in one step on commit, so readers
/// never observe a half-applied transaction.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedgerStore {
    shared: Arc<Shared>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Committed>, StoreError> {
        self.shared
            .committed
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.shared.locks.lock().map(|table| table.len()).unwrap_or_default()
    }
}

/// Transaction over an [`InMemoryLedgerStore`].
///
/// Dropping it without commit discards the staged writes and releases locks.
pub struct InMemoryTransaction {
    shared: Arc<Shared>,
    guards: HashMap<LockKey, OwnedMutexGuard<()>>,
    rows: HashMap<StockKey, StockRow>,
    movements: Vec<Movement>,
    batches: HashMap<BatchId, Batch>,
}

impl InMemoryTransaction {
    async fn acquire(&mut self, key: LockKey, timeout: Duration) -> Result<(), StoreError> {
        if self.guards.contains_key(&key) {
            return Ok(());
        }

        let mutex = {
            let mut table = self
                .shared
                .locks
                .lock()
                .map_err(|_| StoreError::Backend("lock table poisoned".to_string()))?;
            table.entry(key.clone()).or_default().clone()
        };

        let guard = tokio::time::timeout(timeout, mutex.lock_owned())
            .await
            .map_err(|_| StoreError::LockTimeout(key.to_string()))?;
        self.guards.insert(key, guard);
        Ok(())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Committed>, StoreError> {
        self.shared
            .committed
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    /// Release every held lock and drop table entries nobody else holds or
    /// waits on, so the table only tracks contended keys.
    fn release_locks(&mut self) {
        if self.guards.is_empty() {
            return;
        }
        let keys: Vec<LockKey> = self.guards.drain().map(|(key, _guard)| key).collect();
        let Ok(mut table) = self.shared.locks.lock() else {
            return;
        };
        for key in keys {
            if table.get(&key).is_some_and(|mutex| Arc::strong_count(mutex) == 1) {
                table.remove(&key);
            }
        }
    }

    fn holds(&self, key: &LockKey) -> Result<(), StoreError> {
        if self.guards.contains_key(key) {
            Ok(())
        } else {
            Err(StoreError::Backend(format!("{key} written without holding its lock")))
        }
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        self.release_locks();
    }
}

#[async_trait::async_trait]
impl LedgerStore for InMemoryLedgerStore {
    type Tx = InMemoryTransaction;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        Ok(InMemoryTransaction {
            shared: self.shared.clone(),
            guards: HashMap::new(),
            rows: HashMap::new(),
            movements: Vec::new(),
            batches: HashMap::new(),
        })
    }
}

#[async_trait::async_trait]
impl LedgerTransaction for InMemoryTransaction {
    async fn lock_stock_row(&mut self, key: &StockKey, timeout: Duration) -> Result<StockRow, StoreError> {
        self.acquire(LockKey::Stock(key.clone()), timeout).await?;
        if let Some(row) = self.rows.get(key) {
            return Ok(row.clone());
        }
        let committed = self.read()?.rows.get(key).cloned();
        Ok(committed.unwrap_or_else(|| StockRow::empty(key.clone(), Utc::now())))
    }

    async fn put_stock_row(&mut self, row: &StockRow) -> Result<(), StoreError> {
        self.holds(&LockKey::Stock(row.key().clone()))?;
        self.rows.insert(row.key().clone(), row.clone());
        Ok(())
    }

    async fn insert_movement(&mut self, movement: &Movement) -> Result<(), StoreError> {
        let duplicate = self.movements.iter().any(|m| m.id == movement.id)
            || self.read()?.movements.iter().any(|m| m.id == movement.id);
        if duplicate {
            return Err(StoreError::Conflict(format!("movement {} already exists", movement.id)));
        }
        self.movements.push(movement.clone());
        Ok(())
    }

    async fn document_movements(&mut self, document_number: &str) -> Result<Vec<Movement>, StoreError> {
        let mut out: Vec<Movement> = self
            .read()?
            .movements
            .iter()
            .filter(|m| m.document_number.as_deref() == Some(document_number))
            .cloned()
            .collect();
        out.extend(
            self.movements
                .iter()
                .filter(|m| m.document_number.as_deref() == Some(document_number))
                .cloned(),
        );
        Ok(out)
    }

    async fn lock_batch(&mut self, id: BatchId, timeout: Duration) -> Result<Option<Batch>, StoreError> {
        self.acquire(LockKey::Batch(id), timeout).await?;
        if let Some(batch) = self.batches.get(&id) {
            return Ok(Some(batch.clone()));
        }
        Ok(self.read()?.batches.get(&id).cloned())
    }

    async fn put_batch(&mut self, batch: &Batch) -> Result<(), StoreError> {
        self.batches.insert(batch.id, batch.clone());
        Ok(())
    }

    async fn batch_movements(&mut self, id: BatchId) -> Result<Vec<Movement>, StoreError> {
        let mut out: Vec<Movement> = self
            .read()?
            .movements
            .iter()
            .filter(|m| m.batch_id == Some(id))
            .cloned()
            .collect();
        out.extend(self.movements.iter().filter(|m| m.batch_id == Some(id)).cloned());
        Ok(out)
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        {
            let mut committed = self
                .shared
                .committed
                .write()
                .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
            committed.rows.extend(self.rows.drain());
            committed.movements.append(&mut self.movements);
            committed.batches.extend(self.batches.drain());
        }
        self.release_locks();
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait::async_trait]
impl LedgerQuery for InMemoryLedgerStore {
    async fn stock(&self, key: &StockKey) -> Result<Option<StockRow>, StoreError> {
        Ok(self.read()?.rows.get(key).cloned())
    }

    async fn stock_rows(&self, keys: &[StockKey]) -> Result<Vec<StockRow>, StoreError> {
        let committed = self.read()?;
        Ok(keys.iter().filter_map(|k| committed.rows.get(k).cloned()).collect())
    }

    async fn movements(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<Page<Movement>, StoreError> {
        let committed = self.read()?;
        let matching: Vec<Movement> = committed
            .movements
            .iter()
            .rev()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect();
        Ok(Page::new(
            pagination.slice(&matching),
            matching.len() as u64,
            pagination,
        ))
    }

    async fn document_movements(&self, document_number: &str) -> Result<Vec<Movement>, StoreError> {
        Ok(self
            .read()?
            .movements
            .iter()
            .filter(|m| m.document_number.as_deref() == Some(document_number))
            .cloned()
            .collect())
    }

    async fn batch(&self, id: BatchId) -> Result<Option<Batch>, StoreError> {
        Ok(self.read()?.batches.get(&id).cloned())
    }

    async fn batch_movements(&self, id: BatchId) -> Result<Vec<Movement>, StoreError> {
        Ok(self
            .read()?
            .movements
            .iter()
            .filter(|m| m.batch_id == Some(id))
            .cloned()
            .collect())
    }

    async fn batches(
        &self,
        status: Option<BatchStatus>,
        pagination: Pagination,
    ) -> Result<Page<Batch>, StoreError> {
        let committed = self.read()?;
        let mut matching: Vec<Batch> = committed
            .batches
            .values()
            .filter(|b| status.is_none_or(|s| b.status == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(Page::new(
            pagination.slice(&matching),
            matching.len() as u64,
            pagination,
        ))
    }
}
