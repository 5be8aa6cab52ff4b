use axum::{Router, routing::get};

use stockledger_infra::store::{LedgerQuery, LedgerStore};

pub mod adjustments;
pub mod batches;
pub mod movements;
pub mod reservations;
pub mod stock;
pub mod system;

/// Router for every endpoint that acts on behalf of a user.
pub fn router<S>() -> Router
where
    S: LedgerStore + LedgerQuery + 'static,
{
    Router::new()
        .nest("/adjustments", adjustments::router::<S>())
        .nest("/batches", batches::router::<S>())
        .nest("/reservations", reservations::router::<S>())
        .nest("/stock", stock::router::<S>())
        .route("/movements", get(movements::list_movements::<S>))
        .route("/whoami", get(system::whoami))
        .route("/taxonomy", get(system::taxonomy::<S>))
}
