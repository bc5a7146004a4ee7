pub mod auth;
pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod state;
pub mod ws_handler;

use axum::{
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

pub use middleware::require_auth;
pub use rest::ApiDoc;
pub use state::{AppState, SessionRegistry};
pub use ws_handler::ws_handler;

const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Builds the API router: public auth and health routes plus the protected
/// session routes. CORS and Swagger UI are layered on by the binary.
pub fn build_router(app_state: Arc<AppState>) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/health", get(rest::health_handler))
        .route(
            "/auth/session",
            post(auth::sign_in_handler).delete(auth::sign_out_handler),
        );

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route(
            "/sessions",
            get(rest::list_sessions_handler).post(rest::create_session_handler),
        )
        .route(
            "/sessions/{id}",
            get(rest::get_session_handler)
                .patch(rest::rename_session_handler)
                .delete(rest::delete_session_handler),
        )
        .route("/sessions/{id}/messages", get(rest::list_messages_handler))
        .route("/sessions/{id}/generate", post(rest::generate_handler))
        .route("/sessions/{id}/chat", post(rest::chat_handler))
        .route("/sessions/{id}/actions", post(rest::quick_action_handler))
        .route("/ws", get(ws_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(app_state)
}

#[cfg(test)]
pub(crate) mod test_support;
