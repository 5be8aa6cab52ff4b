use std::str::FromStr;

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{BatchId, ProductId, WarehouseId};
use stockledger_infra::store::{MovementFilter, Pagination};
use stockledger_inventory::{
    BatchRow, BatchStatus, Catalogs, DuplicateGroup, Motive, MovementKind, RawAdjustmentRow, StockKey,
    StockRow,
};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

/// Upload rows plus the catalogs to resolve them against.
#[derive(Debug, Deserialize)]
pub struct AdjustmentUploadRequest {
    pub rows: Vec<RawAdjustmentRow>,
    #[serde(default)]
    pub catalogs: Catalogs,
    /// Collapse duplicate groups into their first row before preview/commit.
    #[serde(default)]
    pub merge_duplicates: bool,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RevertRequest {
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ReserveRequest {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    #[serde(default)]
    pub lot: Option<String>,
    pub quantity: i64,
    pub document_number: String,
}

#[derive(Debug, Deserialize)]
pub struct ApplyMovementRequest {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    #[serde(default)]
    pub lot: Option<String>,
    pub kind: MovementKind,
    pub quantity: i64,
    #[serde(default)]
    pub document_number: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    /// Base units per operation unit.
    #[serde(default)]
    pub conversion_factor: Option<i64>,
    #[serde(default)]
    pub motive: Motive,
}

#[derive(Debug, Deserialize)]
pub struct StockQuery {
    pub product_id: Option<String>,
    pub warehouse_id: Option<String>,
    pub lot: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MovementsQuery {
    pub product_id: Option<String>,
    pub warehouse_id: Option<String>,
    pub lot: Option<String>,
    pub kind: Option<String>,
    pub document_number: Option<String>,
    pub batch_id: Option<String>,
    pub user_id: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BatchesQuery {
    pub estado: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct ValidationResponse {
    pub rows_valid: Vec<BatchRow>,
    pub rows_errored: Vec<BatchRow>,
    pub duplicate_groups: Vec<DuplicateGroup>,
}

impl ValidationResponse {
    pub fn new(rows: Vec<BatchRow>, duplicate_groups: Vec<DuplicateGroup>) -> Self {
        let (rows_valid, rows_errored) = rows.into_iter().partition(|r| r.valid);
        Self {
            rows_valid,
            rows_errored,
            duplicate_groups,
        }
    }
}

pub fn stock_to_json(row: &StockRow) -> serde_json::Value {
    serde_json::json!({
        "product_id": row.key().product_id,
        "warehouse_id": row.key().warehouse_id,
        "lot": row.key().lot,
        "quantity": row.quantity(),
        "reserved": row.reserved(),
        "available": row.available(),
        "expiration_date": row.expiration_date(),
        "updated_at": row.updated_at(),
    })
}

// -------------------------
// Parsing helpers
// -------------------------

pub fn stock_key(product_id: ProductId, warehouse_id: WarehouseId, lot: Option<String>) -> StockKey {
    let key = StockKey::new(product_id, warehouse_id);
    match lot {
        Some(lot) => key.with_lot(lot),
        None => key,
    }
}

pub fn parse_param<T: FromStr>(name: &'static str, value: &str) -> Result<T, axum::response::Response> {
    value.trim().parse().map_err(|_| {
        errors::json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "invalid_parameter",
            format!("invalid {name}: '{value}'"),
        )
    })
}

fn parse_opt<T: FromStr>(name: &'static str, value: Option<&str>) -> Result<Option<T>, axum::response::Response> {
    value
        .filter(|v| !v.trim().is_empty())
        .map(|v| parse_param(name, v))
        .transpose()
}

pub fn parse_batch_id(id: &str) -> Result<BatchId, axum::response::Response> {
    id.parse()
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid batch id"))
}

impl MovementsQuery {
    pub fn filter(&self) -> Result<MovementFilter, axum::response::Response> {
        Ok(MovementFilter {
            product_id: parse_opt("product_id", self.product_id.as_deref())?,
            warehouse_id: parse_opt("warehouse_id", self.warehouse_id.as_deref())?,
            lot: self.lot.clone().filter(|l| !l.trim().is_empty()),
            kind: parse_opt::<MovementKind>("kind", self.kind.as_deref())?,
            document_number: self.document_number.clone().filter(|d| !d.trim().is_empty()),
            batch_id: parse_opt("batch_id", self.batch_id.as_deref())?,
            user_id: parse_opt("user_id", self.user_id.as_deref())?,
            created_after: parse_opt::<DateTime<Utc>>("from", self.from.as_deref())?,
            created_before: parse_opt::<DateTime<Utc>>("to", self.to.as_deref())?,
        })
    }

    pub fn pagination(&self) -> Pagination {
        Pagination::from_page(self.page, self.per_page)
    }
}

impl BatchesQuery {
    pub fn status(&self) -> Result<Option<BatchStatus>, axum::response::Response> {
        parse_opt("estado", self.estado.as_deref())
    }

    pub fn pagination(&self) -> Pagination {
        Pagination::from_page(self.page, self.per_page)
    }
}
