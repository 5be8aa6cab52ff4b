//! Bulk adjustment batches: row validation, duplicate detection, stock
//! preview and the batch lifecycle.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{BatchId, ProductId, UserId, WarehouseId};

use crate::catalog::{Catalogs, Resolution};
use crate::error::{LedgerError, LedgerResult};
use crate::movement::{Direction, MovementKind};
use crate::stock::{StockKey, StockRow};
use crate::taxonomy::{Motive, Taxonomy};
use crate::upload::{RawAdjustmentRow, UploadFormat};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Draft,
    Processed,
    Reverted,
    Cancelled,
}

impl BatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Draft => "draft",
            BatchStatus::Processed => "processed",
            BatchStatus::Reverted => "reverted",
            BatchStatus::Cancelled => "cancelled",
        }
    }
}

impl core::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for BatchStatus {
    type Err = LedgerError;

    /// Accepts the English names and the Spanish `estado` values.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" | "borrador" => Ok(BatchStatus::Draft),
            "processed" | "procesado" => Ok(BatchStatus::Processed),
            "reverted" | "revertido" => Ok(BatchStatus::Reverted),
            "cancelled" | "canceled" | "cancelado" => Ok(BatchStatus::Cancelled),
            other => Err(LedgerError::validation(format!("unknown batch status '{other}'"))),
        }
    }
}

/// Header of a committed (or attempted) bulk adjustment.
///
/// Owns its movements through `Movement::batch_id`. Lifecycle:
/// `draft -> processed -> reverted` and `draft -> cancelled`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    pub status: BatchStatus,
    pub rows_total: usize,
    pub rows_valid: usize,
    pub rows_errored: usize,
    pub rows_processed: usize,
    pub revertible: bool,
    pub user_id: UserId,
    pub file_name: Option<String>,
    pub note: Option<String>,
    /// Commit-time failures, newest last.
    pub errors: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub reverted_at: Option<DateTime<Utc>>,
    pub reverted_by: Option<UserId>,
    pub revert_reason: Option<String>,
}

impl Batch {
    pub fn draft(id: BatchId, user_id: UserId, rows: &[BatchRow], now: DateTime<Utc>) -> Self {
        let rows_valid = rows.iter().filter(|r| r.valid).count();
        Self {
            id,
            status: BatchStatus::Draft,
            rows_total: rows.len(),
            rows_valid,
            rows_errored: rows.len() - rows_valid,
            rows_processed: 0,
            revertible: false,
            user_id,
            file_name: None,
            note: None,
            errors: Vec::new(),
            created_at: now,
            processed_at: None,
            reverted_at: None,
            reverted_by: None,
            revert_reason: None,
        }
    }

    pub fn with_file_name(mut self, file_name: Option<String>) -> Self {
        self.file_name = file_name;
        self
    }

    pub fn with_note(mut self, note: Option<String>) -> Self {
        self.note = note;
        self
    }

    pub fn ensure_draft(&self, action: &str) -> LedgerResult<()> {
        if self.status != BatchStatus::Draft {
            return Err(LedgerError::InvalidBatchState(format!(
                "cannot {action} batch {} in status {}",
                self.id, self.status
            )));
        }
        Ok(())
    }

    pub fn mark_processed(&mut self, rows_processed: usize, now: DateTime<Utc>) -> LedgerResult<()> {
        self.ensure_draft("process")?;
        self.status = BatchStatus::Processed;
        self.rows_processed = rows_processed;
        self.revertible = true;
        self.processed_at = Some(now);
        Ok(())
    }

    /// Record an aborted commit. The batch stays a draft; a batch that already
    /// left draft is not touched.
    pub fn mark_commit_failed(&mut self, error: impl Into<String>) -> LedgerResult<()> {
        self.ensure_draft("record a failed commit on")?;
        self.rows_errored += 1;
        self.errors.push(error.into());
        Ok(())
    }

    pub fn ensure_revertible(&self) -> LedgerResult<()> {
        let reason = match (self.status, self.revertible) {
            (BatchStatus::Processed, true) => return Ok(()),
            (BatchStatus::Processed, false) => "batch is marked not revertible".to_string(),
            (status, _) => format!("batch is {status}"),
        };
        Err(LedgerError::BatchNotRevertible {
            batch_id: self.id,
            reason,
        })
    }

    pub fn mark_reverted(&mut self, actor: UserId, reason: &str, now: DateTime<Utc>) -> LedgerResult<()> {
        self.ensure_revertible()?;
        self.status = BatchStatus::Reverted;
        self.revertible = false;
        self.reverted_at = Some(now);
        self.reverted_by = Some(actor);
        self.revert_reason = Some(reason.to_string());
        Ok(())
    }

    pub fn cancel(&mut self) -> LedgerResult<()> {
        self.ensure_draft("cancel")?;
        self.status = BatchStatus::Cancelled;
        Ok(())
    }
}

/// One validated upload row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRow {
    pub line: usize,
    pub raw: RawAdjustmentRow,
    pub product_id: Option<ProductId>,
    pub product_name: Option<String>,
    pub warehouse_id: Option<WarehouseId>,
    pub warehouse_name: Option<String>,
    /// Positive magnitude; 0 when the quantity cell did not parse.
    pub quantity: i64,
    /// Operation type key.
    pub operation: Option<String>,
    pub kind: Option<MovementKind>,
    #[serde(default)]
    pub motive: Motive,
    pub observation: Option<String>,
    pub errors: Vec<String>,
    pub valid: bool,
    pub stock_before: Option<i64>,
    pub stock_after: Option<i64>,
}

impl BatchRow {
    fn from_raw(line: usize, raw: &RawAdjustmentRow) -> Self {
        Self {
            line,
            raw: raw.clone(),
            product_id: None,
            product_name: None,
            warehouse_id: None,
            warehouse_name: None,
            quantity: 0,
            operation: None,
            kind: None,
            motive: Motive::None,
            observation: raw
                .observacion
                .as_deref()
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string),
            errors: Vec::new(),
            valid: false,
            stock_before: None,
            stock_after: None,
        }
    }

    pub fn stock_key(&self) -> Option<StockKey> {
        match (self.product_id, self.warehouse_id) {
            (Some(p), Some(w)) => Some(StockKey::new(p, w)),
            _ => None,
        }
    }

    fn reject(&mut self, reason: impl Into<String>) {
        self.errors.push(reason.into());
        self.valid = false;
    }
}

/// Limits applied during validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationPolicy {
    pub max_observation_len: usize,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            max_observation_len: 500,
        }
    }
}

/// Resolve every raw row against the catalogs and the taxonomy.
///
/// Never fails: problems are collected on each row's `errors`.
pub fn validate_rows(
    rows: &[RawAdjustmentRow],
    catalogs: &Catalogs,
    taxonomy: &Taxonomy,
    policy: &ValidationPolicy,
) -> Vec<BatchRow> {
    let mut rows: Vec<BatchRow> = rows
        .iter()
        .enumerate()
        .map(|(idx, raw)| validate_row(raw.line.unwrap_or(idx + 1), raw, catalogs, taxonomy, policy))
        .collect();
    reject_overflowing_totals(&mut rows);
    rows
}

/// Reject valid rows whose quantity would overflow the running total of
/// their (product, warehouse, operation) group, so that duplicate totals
/// and merged quantities always fit in an `i64`.
fn reject_overflowing_totals(rows: &mut [BatchRow]) {
    let mut totals: HashMap<(ProductId, WarehouseId, String), i64> = HashMap::new();
    for row in rows.iter_mut().filter(|r| r.valid) {
        let (Some(product_id), Some(warehouse_id), Some(operation)) =
            (row.product_id, row.warehouse_id, row.operation.clone())
        else {
            continue;
        };
        let total = totals.entry((product_id, warehouse_id, operation)).or_insert(0);
        match total.checked_add(row.quantity) {
            Some(sum) => *total = sum,
            None => row.reject(format!(
                "quantity {} overflows the total of earlier rows for the same product, warehouse and operation",
                row.quantity
            )),
        }
    }
}

fn validate_row(
    line: usize,
    raw: &RawAdjustmentRow,
    catalogs: &Catalogs,
    taxonomy: &Taxonomy,
    policy: &ValidationPolicy,
) -> BatchRow {
    let mut row = BatchRow::from_raw(line, raw);

    if raw.producto.trim().is_empty() {
        row.errors.push("product is required".to_string());
    } else {
        match catalogs.find_product(&raw.producto) {
            Resolution::Found(p) => {
                row.product_id = Some(p.id);
                row.product_name = Some(p.name.clone());
            }
            Resolution::NotFound => row.errors.push(format!("product '{}' not found", raw.producto.trim())),
            Resolution::Ambiguous(names) => row.errors.push(format!(
                "product '{}' is ambiguous: {}",
                raw.producto.trim(),
                names.join(", ")
            )),
        }
    }

    if raw.almacen.trim().is_empty() {
        row.errors.push("warehouse is required".to_string());
    } else {
        match catalogs.find_warehouse(&raw.almacen) {
            Resolution::Found(w) => {
                row.warehouse_id = Some(w.id);
                row.warehouse_name = Some(w.name.clone());
            }
            Resolution::NotFound => row.errors.push(format!("warehouse '{}' not found", raw.almacen.trim())),
            Resolution::Ambiguous(names) => row.errors.push(format!(
                "warehouse '{}' is ambiguous: {}",
                raw.almacen.trim(),
                names.join(", ")
            )),
        }
    }

    match raw.parse_quantity() {
        Ok(q) => row.quantity = q,
        Err(e) => row.errors.push(e),
    }

    match resolve_operation(raw, taxonomy) {
        Ok((key, kind, motive)) => {
            row.operation = Some(key);
            row.kind = Some(kind);
            row.motive = motive;
        }
        Err(e) => row.errors.push(e),
    }

    if let Some(obs) = &row.observation {
        let len = obs.chars().count();
        if len > policy.max_observation_len {
            row.errors.push(format!(
                "observation is {len} characters, limit is {}",
                policy.max_observation_len
            ));
        }
    }

    row.valid = row.errors.is_empty();
    row
}

fn resolve_operation(raw: &RawAdjustmentRow, taxonomy: &Taxonomy) -> Result<(String, MovementKind, Motive), String> {
    match raw.format() {
        UploadFormat::Operation => {
            let text = raw
                .tipo_operacion
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .ok_or_else(|| "operation type is required".to_string())?;
            let operation = taxonomy
                .operation(text)
                .ok_or_else(|| format!("unknown operation type '{text}'"))?;
            let motive = taxonomy.resolve_motive(operation, raw.tipo_motivo.as_deref())?;
            Ok((operation.key.clone(), operation.kind, motive))
        }
        UploadFormat::Legacy => {
            let text = raw.tipo_ajuste.as_deref().unwrap_or_default().trim();
            let reason = taxonomy
                .adjustment_reason(text)
                .ok_or_else(|| format!("unknown adjustment type '{text}'"))?;
            let kind = match reason.direction {
                Some(Direction::Entrada) => MovementKind::EntradaAjuste,
                Some(Direction::Salida) => MovementKind::SalidaAjuste,
                None => {
                    return Err(format!(
                        "adjustment type '{}' has no direction; use tipo_operacion",
                        reason.key
                    ));
                }
            };
            let operation = taxonomy
                .operation_for_kind(kind)
                .ok_or_else(|| format!("no operation type configured for {kind}"))?;
            Ok((
                operation.key.clone(),
                kind,
                Motive::AdjustmentReason {
                    key: reason.key.clone(),
                },
            ))
        }
    }
}

/// Valid rows sharing (product, warehouse, operation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub operation: String,
    pub lines: Vec<usize>,
    pub total_quantity: i64,
}

/// Group valid rows that target the same stock row with the same operation.
///
/// Advisory only: rows are never summed here. Groups come out in the order
/// their first line appears. A row that would overflow its group's total is
/// left out of the group.
pub fn detect_duplicates(rows: &[BatchRow]) -> Vec<DuplicateGroup> {
    let mut groups: Vec<DuplicateGroup> = Vec::new();
    let mut index: HashMap<(ProductId, WarehouseId, String), usize> = HashMap::new();

    for row in rows.iter().filter(|r| r.valid) {
        let (Some(product_id), Some(warehouse_id), Some(operation)) =
            (row.product_id, row.warehouse_id, row.operation.clone())
        else {
            continue;
        };
        let slot = *index
            .entry((product_id, warehouse_id, operation.clone()))
            .or_insert_with(|| {
                groups.push(DuplicateGroup {
                    product_id,
                    warehouse_id,
                    operation,
                    lines: Vec::new(),
                    total_quantity: 0,
                });
                groups.len() - 1
            });
        let group = &mut groups[slot];
        if let Some(total) = group.total_quantity.checked_add(row.quantity) {
            group.total_quantity = total;
            group.lines.push(row.line);
        }
    }

    groups.retain(|g| g.lines.len() > 1);
    groups
}

/// Collapse each duplicate group into its first row, summing quantities.
///
/// The surviving row keeps its own motive and observation; the other lines
/// of the group are dropped. Rows outside any group pass through unchanged.
pub fn merge_duplicates(rows: Vec<BatchRow>, groups: &[DuplicateGroup]) -> Vec<BatchRow> {
    let mut survivor_total: HashMap<usize, i64> = HashMap::new();
    let mut dropped: Vec<usize> = Vec::new();
    for group in groups {
        if let Some((first, rest)) = group.lines.split_first() {
            survivor_total.insert(*first, group.total_quantity);
            dropped.extend_from_slice(rest);
        }
    }

    rows.into_iter()
        .filter(|r| !(r.valid && dropped.contains(&r.line)))
        .map(|mut r| {
            if r.valid {
                if let Some(total) = survivor_total.get(&r.line) {
                    r.quantity = *total;
                    r.stock_before = None;
                    r.stock_after = None;
                }
            }
            r
        })
        .collect()
}

/// Fill `stock_before` / `stock_after` for valid rows by folding the upload in
/// order over `current` stock.
///
/// Rows the ledger would reject (e.g. driving stock negative) are marked
/// invalid with the ledger's reason and do not advance the projection.
pub fn project_stock(rows: &mut [BatchRow], current: &HashMap<StockKey, StockRow>, now: DateTime<Utc>) {
    let mut projected: HashMap<StockKey, StockRow> = HashMap::new();
    for row in rows.iter_mut().filter(|r| r.valid) {
        let (Some(key), Some(kind)) = (row.stock_key(), row.kind) else {
            continue;
        };
        let before = projected
            .get(&key)
            .or_else(|| current.get(&key))
            .cloned()
            .unwrap_or_else(|| StockRow::empty(key.clone(), now));

        row.stock_before = Some(before.quantity());
        match before.apply(kind, row.quantity, now) {
            Ok(after) => {
                row.stock_after = Some(after.quantity());
                projected.insert(key, after);
            }
            Err(e) => {
                row.stock_after = None;
                row.reject(e.to_string());
            }
        }
    }
}

/// Upload wizard step, passed by value between calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStep {
    Draft,
    Confirming,
    Processing,
}

impl UploadStep {
    /// Draft -> Confirming, once at least one row validated.
    pub fn review(self, valid_rows: usize) -> LedgerResult<UploadStep> {
        match self {
            UploadStep::Draft if valid_rows > 0 => Ok(UploadStep::Confirming),
            UploadStep::Draft => Err(LedgerError::validation("upload has no valid rows to commit")),
            other => Err(other.illegal("review")),
        }
    }

    /// Confirming -> Processing.
    pub fn confirm(self) -> LedgerResult<UploadStep> {
        match self {
            UploadStep::Confirming => Ok(UploadStep::Processing),
            other => Err(other.illegal("confirm")),
        }
    }

    /// Back to Draft from any step (edit rows, or commit finished/failed).
    pub fn reset(self) -> UploadStep {
        UploadStep::Draft
    }

    fn illegal(self, action: &str) -> LedgerError {
        LedgerError::InvalidBatchState(format!("cannot {action} an upload in step {self:?}"))
    }
}
