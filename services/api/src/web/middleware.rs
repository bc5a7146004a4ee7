//! services/api/src/web/middleware.rs
//!
//! Authentication middleware for protecting routes.

use axum::{
    extract::{Query, Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use serde::Deserialize;
use std::sync::Arc;
use study_session_core::ports::AuthProvider;
use tracing::warn;

use crate::web::state::AppState;

/// Middleware that requires a signed-in identity and its access token.
///
/// The token comes from an `Authorization: Bearer` header or, for clients that
/// cannot set headers on a WebSocket upgrade, a `token` query parameter. On
/// success the `AuthUser` is inserted into the request extensions; otherwise the
/// request is answered with 401 Unauthorized.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    // 1. There must be a signed-in identity at all.
    let user = state.auth.current_user().ok_or(StatusCode::UNAUTHORIZED)?;

    // 2. The request has to present that identity's token.
    let token = bearer_token(&req).or_else(|| query_token(&req));
    match token {
        Some(token) if token == user.access_token => {}
        Some(_) => {
            warn!("Rejected a request with a stale access token.");
            return Err(StatusCode::UNAUTHORIZED);
        }
        None => return Err(StatusCode::UNAUTHORIZED),
    }

    // 3. Hand the identity to the handler.
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

fn bearer_token(req: &Request) -> Option<String> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
}

#[derive(Deserialize)]
struct TokenQuery {
    token: String,
}

fn query_token(req: &Request) -> Option<String> {
    Query::<TokenQuery>::try_from_uri(req.uri())
        .ok()
        .map(|Query(q)| q.token)
}
