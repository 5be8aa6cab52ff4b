use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;

use stockledger_core::{ProductId, WarehouseId};
use stockledger_infra::store::{LedgerQuery, LedgerStore};
use stockledger_inventory::{Conversion, MovementMetadata, StockRow};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::ActorContext;

pub fn router<S>() -> Router
where
    S: LedgerStore + LedgerQuery + 'static,
{
    Router::new()
        .route("/", get(get_stock::<S>))
        .route("/movements", post(apply_movement::<S>))
}

/// Current row for a key. Keys that never moved read as zero.
pub async fn get_stock<S>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Query(query): Query<dto::StockQuery>,
) -> axum::response::Response
where
    S: LedgerStore + LedgerQuery + 'static,
{
    let (Some(product), Some(warehouse)) = (query.product_id.as_deref(), query.warehouse_id.as_deref()) else {
        return errors::json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "validation_error",
            "product_id and warehouse_id are required",
        );
    };
    let product_id: ProductId = match dto::parse_param("product_id", product) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let warehouse_id: WarehouseId = match dto::parse_param("warehouse_id", warehouse) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let key = dto::stock_key(product_id, warehouse_id, query.lot);

    match services.query().stock(&key).await {
        Ok(row) => {
            let row = row.unwrap_or_else(|| StockRow::empty(key, Utc::now()));
            (StatusCode::OK, Json(dto::stock_to_json(&row))).into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}

/// Apply one movement through the ledger.
pub async fn apply_movement<S>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(actor): Extension<ActorContext>,
    Json(body): Json<dto::ApplyMovementRequest>,
) -> axum::response::Response
where
    S: LedgerStore + LedgerQuery + 'static,
{
    let mut metadata = MovementMetadata::new(actor.user_id()).with_motive(body.motive);
    if let Some(doc) = body.document_number {
        metadata = metadata.with_document(doc);
    }
    if let Some(note) = body.note {
        metadata = metadata.with_note(note);
    }
    if let Some(factor) = body.conversion_factor {
        match Conversion::new(factor) {
            Ok(c) => metadata = metadata.with_conversion(c),
            Err(e) => return errors::ledger_error_to_response(e),
        }
    }

    let key = dto::stock_key(body.product_id, body.warehouse_id, body.lot);
    match services.ledger().apply(&key, body.quantity, body.kind, metadata).await {
        Ok(movement) => (StatusCode::CREATED, Json(movement)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
