use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use stockledger_infra::store::{LedgerQuery, LedgerStore};
use stockledger_inventory::LedgerError;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::ActorContext;

pub fn router<S>() -> Router
where
    S: LedgerStore + LedgerQuery + 'static,
{
    Router::new()
        .route("/", get(list_batches::<S>))
        .route("/:id", get(get_batch::<S>))
        .route("/:id/revert", post(revert_batch::<S>))
        .route("/:id/cancel", post(cancel_batch::<S>))
}

pub async fn list_batches<S>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Query(query): Query<dto::BatchesQuery>,
) -> axum::response::Response
where
    S: LedgerStore + LedgerQuery + 'static,
{
    let status = match query.status() {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    match services.query().batches(status, query.pagination()).await {
        Ok(page) => (StatusCode::OK, Json(page)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// Batch header, its movements, and its recorded errors.
pub async fn get_batch<S>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Path(id): Path<String>,
) -> axum::response::Response
where
    S: LedgerStore + LedgerQuery + 'static,
{
    let batch_id = match dto::parse_batch_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.query().batch_detail(batch_id).await {
        Ok(Some(detail)) => (StatusCode::OK, Json(detail)).into_response(),
        Ok(None) => errors::ledger_error_to_response(LedgerError::BatchNotFound(batch_id)),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn revert_batch<S>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::RevertRequest>,
) -> axum::response::Response
where
    S: LedgerStore + LedgerQuery + 'static,
{
    let batch_id = match dto::parse_batch_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.reversal().revert(batch_id, &body.reason, actor.user_id()).await {
        Ok(batch) => (StatusCode::OK, Json(batch)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn cancel_batch<S>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Path(id): Path<String>,
) -> axum::response::Response
where
    S: LedgerStore + LedgerQuery + 'static,
{
    let batch_id = match dto::parse_batch_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.batches().cancel(batch_id).await {
        Ok(batch) => (StatusCode::OK, Json(batch)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
