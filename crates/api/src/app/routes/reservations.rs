use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use stockledger_infra::store::{LedgerQuery, LedgerStore};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::ActorContext;

pub fn router<S>() -> Router
where
    S: LedgerStore + LedgerQuery + 'static,
{
    Router::new()
        .route("/", post(reserve::<S>))
        .route("/:document", get(reservation_status::<S>))
        .route("/:document/release", post(release::<S>))
        .route("/:document/consume", post(consume::<S>))
}

pub async fn reserve<S>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(actor): Extension<ActorContext>,
    Json(body): Json<dto::ReserveRequest>,
) -> axum::response::Response
where
    S: LedgerStore + LedgerQuery + 'static,
{
    let key = dto::stock_key(body.product_id, body.warehouse_id, body.lot);
    match services
        .reservations()
        .reserve(&key, body.quantity, &body.document_number, actor.user_id())
        .await
    {
        Ok(movement) => (StatusCode::CREATED, Json(movement)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn release<S>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(actor): Extension<ActorContext>,
    Path(document): Path<String>,
) -> axum::response::Response
where
    S: LedgerStore + LedgerQuery + 'static,
{
    match services.reservations().release(&document, actor.user_id()).await {
        Ok(movements) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "document_number": document.trim(),
                "released": movements.len(),
                "movements": movements,
            })),
        )
            .into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn consume<S>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Extension(actor): Extension<ActorContext>,
    Path(document): Path<String>,
) -> axum::response::Response
where
    S: LedgerStore + LedgerQuery + 'static,
{
    match services.reservations().consume(&document, actor.user_id()).await {
        Ok(movements) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "document_number": document.trim(),
                "consumed": movements.len(),
                "movements": movements,
            })),
        )
            .into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn reservation_status<S>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Path(document): Path<String>,
) -> axum::response::Response
where
    S: LedgerStore + LedgerQuery + 'static,
{
    match services.reservations().status(&document).await {
        Ok(reservations) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "document_number": document.trim(),
                "reservations": reservations,
            })),
        )
            .into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
