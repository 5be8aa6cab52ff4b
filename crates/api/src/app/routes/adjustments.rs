use std::sync::Arc;

use axum::{
    Json, Router,
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};

use stockledger_infra::CommitRequest;
use stockledger_infra::store::{LedgerQuery, LedgerStore};
use stockledger_inventory::{BatchRow, DuplicateGroup, merge_duplicates};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::ActorContext;

pub fn router<S>() -> Router
where
    S: LedgerStore + LedgerQuery + 'static,
{
    Router::new()
        .route("/validate", post(validate_upload::<S>))
        .route("/commit", post(commit_upload::<S>))
}

fn resolve<S>(services: &AppServices<S>, body: &dto::AdjustmentUploadRequest) -> (Vec<BatchRow>, Vec<DuplicateGroup>)
where
    S: LedgerStore + LedgerQuery,
{
    let rows = services.batches().validate(&body.rows, &body.catalogs);
    let groups = services.batches().detect_duplicates(&rows);
    if body.merge_duplicates {
        (merge_duplicates(rows, &groups), groups)
    } else {
        (rows, groups)
    }
}

/// Validate and preview an upload. Nothing is written.
pub async fn validate_upload<S>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Json(body): Json<dto::AdjustmentUploadRequest>,
) -> axum::response::Response
where
    S: LedgerStore + LedgerQuery + 'static,
{
    let (rows, groups) = resolve(&services, &body);
    match services.batches().preview(rows).await {
        Ok(rows) => (StatusCode::OK, Json(dto::ValidationResponse::new(rows, groups))).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn commit_upload<S>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(actor): Extension<ActorContext>,
    Json(body): Json<dto::AdjustmentUploadRequest>,
) -> axum::response::Response
where
    S: LedgerStore + LedgerQuery + 'static,
{
    let (rows, _) = resolve(&services, &body);
    let request = CommitRequest {
        user_id: actor.user_id(),
        file_name: body.file_name,
        note: body.note,
    };
    match services.batches().commit(&rows, request).await {
        Ok(batch) => (StatusCode::CREATED, Json(batch)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
