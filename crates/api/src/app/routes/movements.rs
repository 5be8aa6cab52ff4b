use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
};

use stockledger_infra::store::{LedgerQuery, LedgerStore};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

/// Movement history, newest first.
pub async fn list_movements<S>(
    Extension(services): Extension<Arc<AppServices<S>>>,
    Query(query): Query<dto::MovementsQuery>,
) -> axum::response::Response
where
    S: LedgerStore + LedgerQuery + 'static,
{
    let filter = match query.filter() {
        Ok(f) => f,
        Err(resp) => return resp,
    };
    match services.query().movements(&filter, query.pagination()).await {
        Ok(page) => (StatusCode::OK, Json(page)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}
