use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use stockledger_core::UserId;

use crate::app::errors::json_error;
use crate::context::ActorContext;

pub const ACTOR_HEADER: &str = "x-user-id";

/// Require an `x-user-id` header and expose it as [`ActorContext`].
pub async fn actor_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let user_id = extract_actor(req.headers())?;
    req.extensions_mut().insert(ActorContext::new(user_id));
    Ok(next.run(req).await)
}

fn extract_actor(headers: &HeaderMap) -> Result<UserId, Response> {
    let value = headers
        .get(ACTOR_HEADER)
        .ok_or_else(|| json_error(StatusCode::UNAUTHORIZED, "missing_actor", "x-user-id header is required"))?;

    value
        .to_str()
        .ok()
        .map(str::trim)
        .and_then(|v| v.parse::<UserId>().ok())
        .ok_or_else(|| json_error(StatusCode::BAD_REQUEST, "invalid_actor", "x-user-id must be a UUID"))
}
