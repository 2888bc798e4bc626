//! services/api/src/web/middleware.rs
//!
//! Authentication middleware for protecting routes.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::{error, warn};

use crate::web::state::AppState;

/// Pulls the `session` value out of the cookie header, if any.
pub fn session_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())?
        .split(';')
        .find_map(|c| c.trim().strip_prefix("session="))
        .filter(|id| !id.is_empty())
}

/// Middleware that validates the auth session cookie and resolves the user.
///
/// If valid, inserts the `User` into request extensions for handlers to use and
/// makes sure the user's profile row exists. If invalid or missing, returns
/// 401 Unauthorized.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_session_id = session_id(req.headers()).ok_or(StatusCode::UNAUTHORIZED)?;

    let user = state
        .accounts
        .validate_auth_session(auth_session_id, state.clock().now())
        .await
        .map_err(|e| {
            warn!("Rejected auth session: {}", e);
            StatusCode::UNAUTHORIZED
        })?;

    state.engine.profile(user.user_id).await.map_err(|e| {
        error!("Failed to ensure profile for user {}: {:?}", user.user_id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}
