//! Postgres-backed ledger store.
//!
//! Row locks are real database locks: `lock_stock_row` upserts a zeroed row
//! (`INSERT ... ON CONFLICT DO NOTHING`) and then takes it with
//! `SELECT ... FOR UPDATE` under a `SET LOCAL lock_timeout`. Postgres row
//! locks are re-entrant within a transaction and released at commit/rollback.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (lock not available) | `55P03` | `LockTimeout` |
//! | Database (deadlock detected) | `40P01` | `LockTimeout` |
//! | Database (serialization failure) | `40001` | `LockTimeout` |
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (foreign key violation) | `23503` | `Conflict` |
//! | Database (check constraint violation) | `23514` | `Conflict` |
//! | Database (other) | Any other | `Backend` |
//! | PoolClosed / RowNotFound / Other | N/A | `Backend` |

use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use stockledger_core::{BatchId, MovementId, ProductId, UserId, WarehouseId};
use stockledger_inventory::{Batch, BatchStatus, Motive, Movement, MovementKind, StockKey, StockRow};

use super::query::{LedgerQuery, MovementFilter, Page, Pagination};
use super::r#trait::{LedgerStore, LedgerTransaction, StoreError};

const MOVEMENT_COLUMNS: &str = "id, kind, product_id, warehouse_id, lot, quantity, quantity_before, \
     quantity_after, reserved_before, reserved_after, requested_quantity, conversion_factor, \
     user_id, document_number, note, motive, batch_id, reversal_of, created_at";

const BATCH_COLUMNS: &str = "id, status, rows_total, rows_valid, rows_errored, rows_processed, \
     revertible, user_id, file_name, note, errors, created_at, processed_at, reverted_at, \
     reverted_by, revert_reason";

const STOCK_COLUMNS: &str =
    "product_id, warehouse_id, lot, quantity, reserved, expiration_date, version, updated_at";

/// Postgres ledger store. Cheap to clone (shares the pool).
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and run the bundled migrations.
    #[instrument(skip(database_url), err)]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Backend(format!("migration failed: {e}")))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Open Postgres transaction. Dropping it rolls back.
pub struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

impl PostgresTransaction {
    async fn set_lock_timeout(&mut self, timeout: Duration) -> Result<(), StoreError> {
        // SET does not accept bind parameters; the value is an integer.
        let statement = format!("SET LOCAL lock_timeout = '{}ms'", timeout.as_millis().max(1));
        sqlx::query(&statement)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("set_lock_timeout", e))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl LedgerStore for PostgresLedgerStore {
    type Tx = PostgresTransaction;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(PostgresTransaction { tx })
    }
}

#[async_trait::async_trait]
impl LedgerTransaction for PostgresTransaction {
    #[instrument(
        skip(self),
        fields(product_id = %key.product_id, warehouse_id = %key.warehouse_id),
        err
    )]
    async fn lock_stock_row(&mut self, key: &StockKey, timeout: Duration) -> Result<StockRow, StoreError> {
        self.set_lock_timeout(timeout).await?;

        sqlx::query(
            r#"
            INSERT INTO stock_rows (product_id, warehouse_id, lot, quantity, reserved, version, updated_at)
            VALUES ($1, $2, $3, 0, 0, 0, now())
            ON CONFLICT (product_id, warehouse_id, lot) DO NOTHING
            "#,
        )
        .bind(key.product_id.as_uuid())
        .bind(key.warehouse_id.as_uuid())
        .bind(lot_column(key))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("ensure_stock_row", e))?;

        let sql = format!(
            "SELECT {STOCK_COLUMNS} FROM stock_rows \
             WHERE product_id = $1 AND warehouse_id = $2 AND lot = $3 FOR UPDATE"
        );
        let row = sqlx::query(&sql)
            .bind(key.product_id.as_uuid())
            .bind(key.warehouse_id.as_uuid())
            .bind(lot_column(key))
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("lock_stock_row", e))?;

        decode_stock_row(&row)
    }

    async fn put_stock_row(&mut self, row: &StockRow) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE stock_rows
            SET quantity = $4, reserved = $5, expiration_date = $6, version = $7, updated_at = $8
            WHERE product_id = $1 AND warehouse_id = $2 AND lot = $3
            "#,
        )
        .bind(row.key().product_id.as_uuid())
        .bind(row.key().warehouse_id.as_uuid())
        .bind(lot_column(row.key()))
        .bind(row.quantity())
        .bind(row.reserved())
        .bind(row.expiration_date())
        .bind(row.version() as i64)
        .bind(row.updated_at())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("put_stock_row", e))?;

        if result.rows_affected() != 1 {
            return Err(StoreError::Backend(format!(
                "stock row {} was not locked in this transaction",
                row.key()
            )));
        }
        Ok(())
    }

    async fn insert_movement(&mut self, m: &Movement) -> Result<(), StoreError> {
        let motive = serde_json::to_value(&m.motive)
            .map_err(|e| StoreError::Backend(format!("motive serialization failed: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO stock_movements (
                id, kind, product_id, warehouse_id, lot,
                quantity, quantity_before, quantity_after, reserved_before, reserved_after,
                requested_quantity, conversion_factor, user_id, document_number, note,
                motive, batch_id, reversal_of, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(m.id.as_uuid())
        .bind(m.kind.as_str())
        .bind(m.key.product_id.as_uuid())
        .bind(m.key.warehouse_id.as_uuid())
        .bind(lot_column(&m.key))
        .bind(m.quantity)
        .bind(m.quantity_before)
        .bind(m.quantity_after)
        .bind(m.reserved_before)
        .bind(m.reserved_after)
        .bind(m.requested_quantity)
        .bind(m.conversion_factor)
        .bind(m.user_id.as_uuid())
        .bind(m.document_number.as_deref())
        .bind(m.note.as_deref())
        .bind(motive)
        .bind(m.batch_id.map(Uuid::from))
        .bind(m.reversal_of.map(Uuid::from))
        .bind(m.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_movement", e))?;
        Ok(())
    }

    async fn document_movements(&mut self, document_number: &str) -> Result<Vec<Movement>, StoreError> {
        let sql = format!("SELECT {MOVEMENT_COLUMNS} FROM stock_movements WHERE document_number = $1 ORDER BY seq ASC");
        let rows = sqlx::query(&sql)
            .bind(document_number)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("document_movements", e))?;
        rows.iter().map(decode_movement).collect()
    }

    #[instrument(skip(self), fields(batch_id = %id), err)]
    async fn lock_batch(&mut self, id: BatchId, timeout: Duration) -> Result<Option<Batch>, StoreError> {
        self.set_lock_timeout(timeout).await?;
        let sql = format!("SELECT {BATCH_COLUMNS} FROM stock_batches WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("lock_batch", e))?;
        row.as_ref().map(decode_batch).transpose()
    }

    async fn put_batch(&mut self, b: &Batch) -> Result<(), StoreError> {
        let errors = serde_json::to_value(&b.errors)
            .map_err(|e| StoreError::Backend(format!("batch errors serialization failed: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO stock_batches (
                id, status, rows_total, rows_valid, rows_errored, rows_processed, revertible,
                user_id, file_name, note, errors, created_at, processed_at, reverted_at,
                reverted_by, revert_reason
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                rows_total = EXCLUDED.rows_total,
                rows_valid = EXCLUDED.rows_valid,
                rows_errored = EXCLUDED.rows_errored,
                rows_processed = EXCLUDED.rows_processed,
                revertible = EXCLUDED.revertible,
                file_name = EXCLUDED.file_name,
                note = EXCLUDED.note,
                errors = EXCLUDED.errors,
                processed_at = EXCLUDED.processed_at,
                reverted_at = EXCLUDED.reverted_at,
                reverted_by = EXCLUDED.reverted_by,
                revert_reason = EXCLUDED.revert_reason
            "#,
        )
        .bind(b.id.as_uuid())
        .bind(b.status.as_str())
        .bind(count_column(b.rows_total)?)
        .bind(count_column(b.rows_valid)?)
        .bind(count_column(b.rows_errored)?)
        .bind(count_column(b.rows_processed)?)
        .bind(b.revertible)
        .bind(b.user_id.as_uuid())
        .bind(b.file_name.as_deref())
        .bind(b.note.as_deref())
        .bind(errors)
        .bind(b.created_at)
        .bind(b.processed_at)
        .bind(b.reverted_at)
        .bind(b.reverted_by.map(Uuid::from))
        .bind(b.revert_reason.as_deref())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("put_batch", e))?;
        Ok(())
    }

    async fn batch_movements(&mut self, id: BatchId) -> Result<Vec<Movement>, StoreError> {
        let sql = format!("SELECT {MOVEMENT_COLUMNS} FROM stock_movements WHERE batch_id = $1 ORDER BY seq ASC");
        let rows = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("batch_movements", e))?;
        rows.iter().map(decode_movement).collect()
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

#[async_trait::async_trait]
impl LedgerQuery for PostgresLedgerStore {
    async fn stock(&self, key: &StockKey) -> Result<Option<StockRow>, StoreError> {
        let sql = format!(
            "SELECT {STOCK_COLUMNS} FROM stock_rows WHERE product_id = $1 AND warehouse_id = $2 AND lot = $3"
        );
        let row = sqlx::query(&sql)
            .bind(key.product_id.as_uuid())
            .bind(key.warehouse_id.as_uuid())
            .bind(lot_column(key))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("stock", e))?;
        row.as_ref().map(decode_stock_row).transpose()
    }

    async fn stock_rows(&self, keys: &[StockKey]) -> Result<Vec<StockRow>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let products: Vec<Uuid> = keys.iter().map(|k| *k.product_id.as_uuid()).collect();
        let warehouses: Vec<Uuid> = keys.iter().map(|k| *k.warehouse_id.as_uuid()).collect();
        let lots: Vec<String> = keys.iter().map(|k| lot_column(k).to_string()).collect();

        let sql = format!(
            "SELECT {STOCK_COLUMNS} FROM stock_rows \
             WHERE (product_id, warehouse_id, lot) IN ( \
                 SELECT * FROM UNNEST($1::uuid[], $2::uuid[], $3::text[]))"
        );
        let rows = sqlx::query(&sql)
            .bind(products)
            .bind(warehouses)
            .bind(lots)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("stock_rows", e))?;
        rows.iter().map(decode_stock_row).collect()
    }

    #[instrument(skip(self, filter), fields(limit = pagination.limit, offset = pagination.offset), err)]
    async fn movements(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<Page<Movement>, StoreError> {
        const WHERE: &str = r#"
            WHERE ($1::uuid IS NULL OR product_id = $1)
                AND ($2::uuid IS NULL OR warehouse_id = $2)
                AND ($3::text IS NULL OR lot = $3)
                AND ($4::text IS NULL OR kind = $4)
                AND ($5::text IS NULL OR document_number = $5)
                AND ($6::uuid IS NULL OR batch_id = $6)
                AND ($7::uuid IS NULL OR user_id = $7)
                AND ($8::timestamptz IS NULL OR created_at >= $8)
                AND ($9::timestamptz IS NULL OR created_at <= $9)
        "#;

        let product = filter.product_id.map(Uuid::from);
        let warehouse = filter.warehouse_id.map(Uuid::from);
        let kind = filter.kind.map(|k| k.as_str());
        let batch = filter.batch_id.map(Uuid::from);
        let user = filter.user_id.map(Uuid::from);

        let count_sql = format!("SELECT COUNT(*) AS total FROM stock_movements {WHERE}");
        let total: i64 = sqlx::query(&count_sql)
            .bind(product)
            .bind(warehouse)
            .bind(filter.lot.as_deref())
            .bind(kind)
            .bind(filter.document_number.as_deref())
            .bind(batch)
            .bind(user)
            .bind(filter.created_after)
            .bind(filter.created_before)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_movements", e))?
            .try_get("total")
            .map_err(|e| StoreError::Corrupt(format!("failed to read count: {e}")))?;

        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements {WHERE} \
             ORDER BY created_at DESC, seq DESC LIMIT $10 OFFSET $11"
        );
        let rows = sqlx::query(&sql)
            .bind(product)
            .bind(warehouse)
            .bind(filter.lot.as_deref())
            .bind(kind)
            .bind(filter.document_number.as_deref())
            .bind(batch)
            .bind(user)
            .bind(filter.created_after)
            .bind(filter.created_before)
            .bind(i64::from(pagination.limit))
            .bind(i64::from(pagination.offset))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("query_movements", e))?;

        let items = rows.iter().map(decode_movement).collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, total.max(0) as u64, pagination))
    }

    async fn document_movements(&self, document_number: &str) -> Result<Vec<Movement>, StoreError> {
        let sql = format!("SELECT {MOVEMENT_COLUMNS} FROM stock_movements WHERE document_number = $1 ORDER BY seq ASC");
        let rows = sqlx::query(&sql)
            .bind(document_number)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("document_movements", e))?;
        rows.iter().map(decode_movement).collect()
    }

    async fn batch(&self, id: BatchId) -> Result<Option<Batch>, StoreError> {
        let sql = format!("SELECT {BATCH_COLUMNS} FROM stock_batches WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("batch", e))?;
        row.as_ref().map(decode_batch).transpose()
    }

    async fn batch_movements(&self, id: BatchId) -> Result<Vec<Movement>, StoreError> {
        let sql = format!("SELECT {MOVEMENT_COLUMNS} FROM stock_movements WHERE batch_id = $1 ORDER BY seq ASC");
        let rows = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("batch_movements", e))?;
        rows.iter().map(decode_movement).collect()
    }

    async fn batches(
        &self,
        status: Option<BatchStatus>,
        pagination: Pagination,
    ) -> Result<Page<Batch>, StoreError> {
        let status = status.map(|s| s.as_str());

        let total: i64 = sqlx::query(
            "SELECT COUNT(*) AS total FROM stock_batches WHERE ($1::text IS NULL OR status = $1)",
        )
        .bind(status)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_batches", e))?
        .try_get("total")
        .map_err(|e| StoreError::Corrupt(format!("failed to read count: {e}")))?;

        let sql = format!(
            "SELECT {BATCH_COLUMNS} FROM stock_batches WHERE ($1::text IS NULL OR status = $1) \
             ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query(&sql)
            .bind(status)
            .bind(i64::from(pagination.limit))
            .bind(i64::from(pagination.offset))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("query_batches", e))?;

        let items = rows.iter().map(decode_batch).collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, total.max(0) as u64, pagination))
    }
}

fn lot_column(key: &StockKey) -> &str {
    key.lot.as_deref().unwrap_or("")
}

fn count_column(value: usize) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|_| StoreError::Backend(format!("row count {value} out of range")))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => error_for_sqlstate(operation, db_err.code().as_deref(), db_err.message()),
        sqlx::Error::PoolClosed => StoreError::Backend(format!("connection pool closed in {operation}")),
        sqlx::Error::RowNotFound => StoreError::Backend(format!("unexpected row not found in {operation}")),
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}

/// Deadlocks and serialization failures abort only the losing transaction,
/// so they are reported as retryable lock contention.
fn error_for_sqlstate(operation: &str, code: Option<&str>, message: &str) -> StoreError {
    match code {
        Some("55P03") | Some("40P01") | Some("40001") => StoreError::LockTimeout(format!("{operation}: {message}")),
        Some("23505") | Some("23503") | Some("23514") => {
            StoreError::Conflict(format!("database error in {operation}: {message}"))
        }
        _ => StoreError::Backend(format!("database error in {operation}: {message}")),
    }
}

// SQLx row types

#[derive(Debug)]
struct StockRowRecord {
    product_id: Uuid,
    warehouse_id: Uuid,
    lot: String,
    quantity: i64,
    reserved: i64,
    expiration_date: Option<NaiveDate>,
    version: i64,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for StockRowRecord {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(StockRowRecord {
            product_id: row.try_get("product_id")?,
            warehouse_id: row.try_get("warehouse_id")?,
            lot: row.try_get("lot")?,
            quantity: row.try_get("quantity")?,
            reserved: row.try_get("reserved")?,
            expiration_date: row.try_get("expiration_date")?,
            version: row.try_get("version")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

fn key_from_columns(product_id: Uuid, warehouse_id: Uuid, lot: String) -> StockKey {
    StockKey::new(ProductId::from_uuid(product_id), WarehouseId::from_uuid(warehouse_id)).with_lot(lot)
}

fn decode_stock_row(row: &PgRow) -> Result<StockRow, StoreError> {
    let r = StockRowRecord::from_row(row)
        .map_err(|e| StoreError::Corrupt(format!("failed to decode stock row: {e}")))?;
    StockRow::restore(
        key_from_columns(r.product_id, r.warehouse_id, r.lot),
        r.quantity,
        r.reserved,
        r.expiration_date,
        r.version.max(0) as u64,
        r.updated_at,
    )
    .map_err(|e| StoreError::Corrupt(e.to_string()))
}

#[derive(Debug)]
struct MovementRecord {
    id: Uuid,
    kind: String,
    product_id: Uuid,
    warehouse_id: Uuid,
    lot: String,
    quantity: i64,
    quantity_before: i64,
    quantity_after: i64,
    reserved_before: i64,
    reserved_after: i64,
    requested_quantity: Option<i64>,
    conversion_factor: Option<i64>,
    user_id: Uuid,
    document_number: Option<String>,
    note: Option<String>,
    motive: serde_json::Value,
    batch_id: Option<Uuid>,
    reversal_of: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for MovementRecord {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(MovementRecord {
            id: row.try_get("id")?,
            kind: row.try_get("kind")?,
            product_id: row.try_get("product_id")?,
            warehouse_id: row.try_get("warehouse_id")?,
            lot: row.try_get("lot")?,
            quantity: row.try_get("quantity")?,
            quantity_before: row.try_get("quantity_before")?,
            quantity_after: row.try_get("quantity_after")?,
            reserved_before: row.try_get("reserved_before")?,
            reserved_after: row.try_get("reserved_after")?,
            requested_quantity: row.try_get("requested_quantity")?,
            conversion_factor: row.try_get("conversion_factor")?,
            user_id: row.try_get("user_id")?,
            document_number: row.try_get("document_number")?,
            note: row.try_get("note")?,
            motive: row.try_get("motive")?,
            batch_id: row.try_get("batch_id")?,
            reversal_of: row.try_get("reversal_of")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

fn decode_movement(row: &PgRow) -> Result<Movement, StoreError> {
    let r = MovementRecord::from_row(row)
        .map_err(|e| StoreError::Corrupt(format!("failed to decode movement row: {e}")))?;
    let kind: MovementKind = r
        .kind
        .parse()
        .map_err(|e: stockledger_inventory::LedgerError| StoreError::Corrupt(e.to_string()))?;
    let motive: Motive = serde_json::from_value(r.motive)
        .map_err(|e| StoreError::Corrupt(format!("movement {} has an unreadable motive: {e}", r.id)))?;

    Ok(Movement {
        id: MovementId::from_uuid(r.id),
        kind,
        key: key_from_columns(r.product_id, r.warehouse_id, r.lot),
        quantity: r.quantity,
        quantity_before: r.quantity_before,
        quantity_after: r.quantity_after,
        reserved_before: r.reserved_before,
        reserved_after: r.reserved_after,
        requested_quantity: r.requested_quantity,
        conversion_factor: r.conversion_factor,
        user_id: UserId::from_uuid(r.user_id),
        document_number: r.document_number,
        note: r.note,
        motive,
        batch_id: r.batch_id.map(BatchId::from_uuid),
        reversal_of: r.reversal_of.map(MovementId::from_uuid),
        created_at: r.created_at,
    })
}

#[derive(Debug)]
struct BatchRecord {
    id: Uuid,
    status: String,
    rows_total: i32,
    rows_valid: i32,
    rows_errored: i32,
    rows_processed: i32,
    revertible: bool,
    user_id: Uuid,
    file_name: Option<String>,
    note: Option<String>,
    errors: serde_json::Value,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    reverted_at: Option<DateTime<Utc>>,
    reverted_by: Option<Uuid>,
    revert_reason: Option<String>,
}

impl<'r> FromRow<'r, PgRow> for BatchRecord {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(BatchRecord {
            id: row.try_get("id")?,
            status: row.try_get("status")?,
            rows_total: row.try_get("rows_total")?,
            rows_valid: row.try_get("rows_valid")?,
            rows_errored: row.try_get("rows_errored")?,
            rows_processed: row.try_get("rows_processed")?,
            revertible: row.try_get("revertible")?,
            user_id: row.try_get("user_id")?,
            file_name: row.try_get("file_name")?,
            note: row.try_get("note")?,
            errors: row.try_get("errors")?,
            created_at: row.try_get("created_at")?,
            processed_at: row.try_get("processed_at")?,
            reverted_at: row.try_get("reverted_at")?,
            reverted_by: row.try_get("reverted_by")?,
            revert_reason: row.try_get("revert_reason")?,
        })
    }
}

fn decode_batch(row: &PgRow) -> Result<Batch, StoreError> {
    let r = BatchRecord::from_row(row)
        .map_err(|e| StoreError::Corrupt(format!("failed to decode batch row: {e}")))?;
    let status: BatchStatus = r
        .status
        .parse()
        .map_err(|e: stockledger_inventory::LedgerError| StoreError::Corrupt(e.to_string()))?;
    let errors: Vec<String> = serde_json::from_value(r.errors)
        .map_err(|e| StoreError::Corrupt(format!("batch {} has unreadable errors: {e}", r.id)))?;

    Ok(Batch {
        id: BatchId::from_uuid(r.id),
        status,
        rows_total: r.rows_total.max(0) as usize,
        rows_valid: r.rows_valid.max(0) as usize,
        rows_errored: r.rows_errored.max(0) as usize,
        rows_processed: r.rows_processed.max(0) as usize,
        revertible: r.revertible,
        user_id: UserId::from_uuid(r.user_id),
        file_name: r.file_name,
        note: r.note,
        errors,
        created_at: r.created_at,
        processed_at: r.processed_at,
        reverted_at: r.reverted_at,
        reverted_by: r.reverted_by.map(UserId::from_uuid),
        revert_reason: r.revert_reason,
    })
}
