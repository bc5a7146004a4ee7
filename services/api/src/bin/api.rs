//! services/api/src/bin/api.rs

use axum::http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    HeaderValue, Method,
};
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use study_api_lib::{
    adapters::{
        DbAdapter, FileKeyValueStore, HttpStudyBackend, LocalFileStorage, PgChangeFeed,
        SessionAuth,
    },
    config::Config,
    error::ApiError,
    web::{build_router, ApiDoc, AppState},
};
use study_session_core::{LocalChatCache, SessionRepository};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Service Adapters ---
    let auth = Arc::new(SessionAuth::new(config.seeded_user.clone()));
    let backend = Arc::new(HttpStudyBackend::new(config.backend_url.clone()));
    let storage = Arc::new(LocalFileStorage::new(config.upload_dir.clone()));
    // The listener holds its own connection so it never starves the pool.
    let feed = Arc::new(PgChangeFeed::connect(&config.database_url).await?);
    let chat_store = FileKeyValueStore::open(config.chat_cache_dir.clone())?;
    info!("Chat cache stored in {}", chat_store.dir().display());
    let cache = LocalChatCache::new(Arc::new(chat_store));

    // --- 4. Build the Shared AppState ---
    let repository = Arc::new(SessionRepository::new(
        db_adapter,
        backend,
        storage,
        auth.clone(),
    ));
    let app_state = Arc::new(AppState::new(config.clone(), auth, repository, cache, feed));
    if let Some(user) = &config.seeded_user {
        info!("Using the seeded identity for user {}.", user.user_id);
        if let Err(e) = app_state.watch_listing(user.user_id).await {
            warn!("Could not watch the session listing: {}", e);
        }
    }

    // Sessions opened only through REST are evicted once idle.
    let shutdown = CancellationToken::new();
    let sweeper_state = app_state.clone();
    let sweeper_token = shutdown.clone();
    tokio::spawn(async move { sweeper_state.sessions.sweep_idle(sweeper_token).await });

    // --- 5. Create the Web Router ---
    let origin = config.cors_origin.parse::<HeaderValue>().map_err(|e| {
        ApiError::Internal(format!("Invalid CORS_ORIGIN '{}': {}", config.cors_origin, e))
    })?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(build_router(app_state).layer(cors))
        .merge(
            SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()),
        );

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;
    shutdown.cancel();

    Ok(())
}
