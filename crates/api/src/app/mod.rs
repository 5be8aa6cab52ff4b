//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: ledger services over the configured store
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request/response DTOs and query parsing
//! - `errors.rs`: ledger error to status/body mapping

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use stockledger_infra::LedgerSettings;
use stockledger_infra::store::{LedgerQuery, LedgerStore, StoreError};

use crate::config::Settings;
use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

use services::AppServices;

/// Build the full HTTP router over already-wired services.
pub fn build_app<S>(services: Arc<AppServices<S>>) -> Router
where
    S: LedgerStore + LedgerQuery + 'static,
{
    // Everything except liveness needs an acting user.
    let protected = routes::router::<S>()
        .layer(Extension(services))
        .layer(axum::middleware::from_fn(middleware::actor_middleware));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

/// Router over a fresh in-memory store.
pub fn build_in_memory_app(settings: LedgerSettings) -> Router {
    build_app(Arc::new(services::in_memory_services(settings)))
}

/// Router over Postgres when `database.url` is set, in-memory otherwise.
pub async fn build_app_from_settings(settings: &Settings) -> Result<Router, StoreError> {
    let ledger_settings = settings.ledger.to_ledger_settings();
    match &settings.database.url {
        Some(url) => {
            let services =
                services::postgres_services(url, settings.database.max_connections, ledger_settings).await?;
            tracing::info!("using postgres ledger store");
            Ok(build_app(Arc::new(services)))
        }
        None => {
            tracing::warn!("database.url not set; using in-memory ledger store");
            Ok(build_in_memory_app(ledger_settings))
        }
    }
}
