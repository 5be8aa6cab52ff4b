use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};

use stockledger_infra::store::{LedgerQuery, LedgerStore};

use crate::app::services::AppServices;
use crate::context::ActorContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(Extension(actor): Extension<ActorContext>) -> impl IntoResponse {
    Json(serde_json::json!({ "user_id": actor.user_id() }))
}

/// Operation types and motive reasons accepted by uploads.
pub async fn taxonomy<S>(Extension(services): Extension<Arc<AppServices<S>>>) -> impl IntoResponse
where
    S: LedgerStore + LedgerQuery + 'static,
{
    Json(services.batches().taxonomy().clone())
}
