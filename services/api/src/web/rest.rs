//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::web::auth::{SignInRequest, SignInResponse};
use crate::web::state::AppState;
use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use study_session_core::domain::{
    filter_listing, Artifact, ChatMessage, Preferences, Session, SessionListItem,
};
use study_session_core::ports::UploadedFile;
use study_session_core::{QuickAction, SyncError};
use tracing::{error, info, warn};
use utoipa::{IntoParams, OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        health_handler,
        crate::web::auth::sign_in_handler,
        crate::web::auth::sign_out_handler,
        list_sessions_handler,
        create_session_handler,
        get_session_handler,
        rename_session_handler,
        delete_session_handler,
        list_messages_handler,
        generate_handler,
        chat_handler,
        quick_action_handler,
    ),
    components(
        schemas(
            SignInRequest,
            SignInResponse,
            CreateSessionResponse,
            SessionResponse,
            SessionListResponse,
            MessagesResponse,
            MessageResponse,
            RenameRequest,
            GenerateRequest,
            ChatRequest,
            QuickActionRequest,
        )
    ),
    tags(
        (
            name = "Study Session API",
            description = "Sessions, generated study material and document chat."
        )
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// The response payload sent after successfully creating a session.
#[derive(Serialize, ToSchema)]
pub struct CreateSessionResponse {
    pub session_id: Uuid,
}

#[derive(Serialize, ToSchema)]
pub struct SessionResponse {
    #[schema(value_type = Object)]
    pub session: Session,
}

#[derive(Serialize, ToSchema)]
pub struct SessionListResponse {
    #[schema(value_type = Vec<Object>)]
    pub sessions: Vec<SessionListItem>,
}

#[derive(Serialize, ToSchema)]
pub struct MessagesResponse {
    #[schema(value_type = Vec<Object>)]
    pub messages: Vec<ChatMessage>,
    pub in_flight: bool,
}

#[derive(Serialize, ToSchema)]
pub struct MessageResponse {
    #[schema(value_type = Object)]
    pub message: ChatMessage,
}

#[derive(Deserialize, ToSchema)]
pub struct RenameRequest {
    pub title: String,
}

#[derive(Deserialize, ToSchema)]
pub struct GenerateRequest {
    /// `summary`, `flashcards` or `studyGuide`.
    #[schema(value_type = String, example = "summary")]
    pub artifact: Artifact,
}

#[derive(Deserialize, ToSchema)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Deserialize, ToSchema)]
pub struct QuickActionRequest {
    /// `research` or `explain`.
    #[schema(value_type = String, example = "explain")]
    pub action: QuickAction,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListQuery {
    /// Case-insensitive name filter.
    pub q: Option<String>,
}

//=========================================================================================
// Error Mapping
//=========================================================================================

/// Maps a failed operation to the status code and the text shown to the user.
pub fn sync_error_response(err: SyncError) -> (StatusCode, String) {
    let status = match &err {
        SyncError::NotAuthenticated => StatusCode::UNAUTHORIZED,
        SyncError::NotReady { .. } | SyncError::AlreadyInFlight => StatusCode::CONFLICT,
        SyncError::RemoteFailure(_) => StatusCode::BAD_GATEWAY,
        SyncError::NotFound(_) => StatusCode::NOT_FOUND,
        SyncError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        SyncError::CacheCorrupt(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!("Request failed: {}", err);
    }
    (status, err.user_notice())
}

fn bad_request(message: impl Into<String>) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, message.into())
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

#[utoipa::path(get, path = "/health", responses((status = 200, description = "Service is up")))]
pub async fn health_handler() -> &'static str {
    "ok"
}

/// List the signed-in user's sessions, newest first.
#[utoipa::path(
    get,
    path = "/sessions",
    params(ListQuery),
    responses(
        (status = 200, description = "Dashboard listing", body = SessionListResponse),
        (status = 401, description = "Not signed in")
    )
)]
pub async fn list_sessions_handler(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<SessionListResponse>, (StatusCode, String)> {
    let sessions = app_state
        .repository
        .list_sessions()
        .await
        .map_err(sync_error_response)?;
    let items = sessions.iter().map(SessionListItem::from).collect();
    let sessions = filter_listing(items, query.q.as_deref().unwrap_or(""));
    Ok(Json(SessionListResponse { sessions }))
}

/// Create a new session by uploading documents.
///
/// Accepts a multipart/form-data request with one or more file parts and a
/// `preferences` part holding the JSON generation preferences.
#[utoipa::path(
    post,
    path = "/sessions",
    request_body(
        content_type = "multipart/form-data",
        description = "The documents and a `preferences` JSON part."
    ),
    responses(
        (
            status = 201,
            description = "Session created and processing started",
            body = CreateSessionResponse
        ),
        (status = 400, description = "Bad request (e.g., no file or no artifact selected)"),
        (status = 502, description = "Storage or processing trigger failed")
    )
)]
pub async fn create_session_handler(
    State(app_state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let mut files = Vec::new();
    let mut preferences: Option<Preferences> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("Failed to read multipart data: {}", e)))?
    {
        if field.name() == Some("preferences") {
            let raw = field
                .text()
                .await
                .map_err(|e| bad_request(format!("Failed to read preferences: {}", e)))?;
            let parsed = serde_json::from_str(&raw)
                .map_err(|e| bad_request(format!("Invalid preferences: {}", e)))?;
            preferences = Some(parsed);
            continue;
        }

        let Some(file_name) = field.file_name().map(str::to_string) else {
            warn!("Ignoring multipart field {:?} without a file name.", field.name());
            continue;
        };
        let mime_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| bad_request(format!("Failed to read file bytes: {}", e)))?;
        files.push(UploadedFile {
            file_name,
            mime_type,
            data,
        });
    }

    if files.is_empty() {
        return Err(bad_request("Please upload at least one document."));
    }
    let preferences = preferences.ok_or_else(|| bad_request("The preferences part is required."))?;
    preferences.validate().map_err(bad_request)?;

    let session_id = app_state
        .repository
        .create(files, preferences)
        .await
        .map_err(sync_error_response)?;
    info!("Session {} created through the REST API.", session_id);
    Ok((StatusCode::CREATED, Json(CreateSessionResponse { session_id })))
}

#[utoipa::path(
    get,
    path = "/sessions/{id}",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "The session record", body = SessionResponse),
        (status = 404, description = "No such session for this user")
    )
)]
pub async fn get_session_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionResponse>, (StatusCode, String)> {
    let session = app_state.sessions.open(id).await.map_err(sync_error_response)?;
    let session = session
        .snapshot()
        .ok_or_else(|| sync_error_response(SyncError::NotFound(id.to_string())))?;
    Ok(Json(SessionResponse { session }))
}

#[utoipa::path(
    patch,
    path = "/sessions/{id}",
    params(("id" = Uuid, Path, description = "Session id")),
    request_body = RenameRequest,
    responses(
        (status = 204, description = "Renamed"),
        (status = 400, description = "Empty title"),
        (status = 404, description = "No such session for this user")
    )
)]
pub async fn rename_session_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<RenameRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    if body.title.trim().is_empty() {
        return Err(bad_request("Title cannot be empty."));
    }
    app_state
        .repository
        .update_title(id, &body.title)
        .await
        .map_err(sync_error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    delete,
    path = "/sessions/{id}",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "No such session for this user")
    )
)]
pub async fn delete_session_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    app_state
        .repository
        .delete(id)
        .await
        .map_err(sync_error_response)?;
    app_state.sessions.forget(id).await;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/sessions/{id}/messages",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "The chat transcript", body = MessagesResponse),
        (status = 404, description = "No such session for this user")
    )
)]
pub async fn list_messages_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<MessagesResponse>, (StatusCode, String)> {
    let session = app_state.sessions.open(id).await.map_err(sync_error_response)?;
    Ok(Json(MessagesResponse {
        messages: session.messages(),
        in_flight: session.is_busy(),
    }))
}

/// Generate one artifact on demand.
#[utoipa::path(
    post,
    path = "/sessions/{id}/generate",
    params(("id" = Uuid, Path, description = "Session id")),
    request_body = GenerateRequest,
    responses(
        (status = 200, description = "The updated session view", body = SessionResponse),
        (status = 409, description = "Not ready, or another request is running"),
        (status = 502, description = "The backend failed")
    )
)]
pub async fn generate_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<GenerateRequest>,
) -> Result<Json<SessionResponse>, (StatusCode, String)> {
    let session = app_state.sessions.open(id).await.map_err(sync_error_response)?;
    let session = session
        .generate(body.artifact)
        .await
        .map_err(sync_error_response)?;
    Ok(Json(SessionResponse { session }))
}

/// Send a free-form message to the document chatbot.
#[utoipa::path(
    post,
    path = "/sessions/{id}/chat",
    params(("id" = Uuid, Path, description = "Session id")),
    request_body = ChatRequest,
    responses(
        (status = 200, description = "The assistant's reply", body = MessageResponse),
        (status = 400, description = "Empty message"),
        (status = 409, description = "Not ready, or another request is running"),
        (status = 502, description = "The backend failed")
    )
)]
pub async fn chat_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<ChatRequest>,
) -> Result<Json<MessageResponse>, (StatusCode, String)> {
    let session = app_state.sessions.open(id).await.map_err(sync_error_response)?;
    let message = session
        .send_message(&body.message)
        .await
        .map_err(sync_error_response)?;
    Ok(Json(MessageResponse { message }))
}

#[utoipa::path(
    post,
    path = "/sessions/{id}/actions",
    params(("id" = Uuid, Path, description = "Session id")),
    request_body = QuickActionRequest,
    responses(
        (status = 200, description = "The assistant's reply", body = MessageResponse),
        (status = 409, description = "Not ready, or another request is running"),
        (status = 502, description = "The backend failed")
    )
)]
pub async fn quick_action_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<QuickActionRequest>,
) -> Result<Json<MessageResponse>, (StatusCode, String)> {
    let session = app_state.sessions.open(id).await.map_err(sync_error_response)?;
    let message = session
        .quick_action(body.action)
        .await
        .map_err(sync_error_response)?;
    Ok(Json(MessageResponse { message }))
}
