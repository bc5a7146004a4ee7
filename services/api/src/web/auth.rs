//! services/api/src/web/auth.rs
//!
//! Endpoints through which the external auth provider hands over, and revokes,
//! the identity used for every store and backend call.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use study_session_core::ports::AuthUser;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::web::rest::sync_error_response;
use crate::web::state::AppState;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct SignInRequest {
    pub user_id: Uuid,
    pub access_token: String,
}

#[derive(Serialize, ToSchema)]
pub struct SignInResponse {
    pub user_id: Uuid,
}

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /auth/session - Hand over the provider's identity
#[utoipa::path(
    post,
    path = "/auth/session",
    request_body = SignInRequest,
    responses(
        (status = 200, description = "Signed in", body = SignInResponse),
        (status = 400, description = "Empty access token")
    )
)]
pub async fn sign_in_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignInRequest>,
) -> Result<Json<SignInResponse>, (StatusCode, String)> {
    let access_token = req.access_token.trim().to_string();
    if access_token.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Access token is required.".to_string()));
    }
    let user_id = req.user_id;
    state
        .sign_in(AuthUser {
            user_id,
            access_token,
        })
        .await
        .map_err(sync_error_response)?;
    Ok(Json(SignInResponse { user_id }))
}

/// DELETE /auth/session - Sign out and close every open session
#[utoipa::path(
    delete,
    path = "/auth/session",
    responses((status = 204, description = "Signed out"))
)]
pub async fn sign_out_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    state.sign_out().await;
    StatusCode::NO_CONTENT
}
