//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DatabaseService` port from the `core` crate. It handles all interactions
//! with the PostgreSQL `sessions` table using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use study_session_core::domain::{ChatMessage, FileDescriptor, Flashcard, Preferences, Session};
use study_session_core::ports::{DatabaseService, PortError, PortResult};
use uuid::Uuid;

const SESSION_COLUMNS: &str = "id, user_id, title, files, preferences, status, summary, \
     flashcards, study_guide, chat_history, error_message, created_at, processed_at";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

//=========================================================================================
// "Impure" Database Record Struct
//=========================================================================================

#[derive(FromRow)]
struct SessionRecord {
    id: Uuid,
    user_id: Uuid,
    title: Option<String>,
    files: Json<Vec<FileDescriptor>>,
    preferences: Json<Preferences>,
    status: String,
    summary: Option<String>,
    flashcards: Option<Json<Vec<Flashcard>>>,
    study_guide: Option<String>,
    chat_history: Option<Json<Vec<ChatMessage>>>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    fn to_domain(self) -> PortResult<Session> {
        let status = self.status.parse().map_err(PortError::Unexpected)?;
        Ok(Session {
            id: self.id,
            user_id: self.user_id,
            title: self.title,
            files: self.files.0,
            preferences: self.preferences.0,
            status,
            summary: self.summary,
            flashcards: self.flashcards.map(|j| j.0).unwrap_or_default(),
            study_guide: self.study_guide,
            chat_history: self.chat_history.map(|j| j.0).unwrap_or_default(),
            error_message: self.error_message,
            created_at: self.created_at,
            processed_at: self.processed_at,
        })
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn not_found(session_id: Uuid) -> PortError {
    PortError::NotFound(format!("Session {} not found", session_id))
}

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    async fn get_session_by_id(&self, session_id: Uuid) -> PortResult<Session> {
        let sql = format!("SELECT {} FROM sessions WHERE id = $1", SESSION_COLUMNS);
        let record = sqlx::query_as::<_, SessionRecord>(&sql)
            .bind(session_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::RowNotFound => not_found(session_id),
                _ => unexpected(e),
            })?;
        record.to_domain()
    }

    async fn get_sessions_by_user(&self, user_id: Uuid) -> PortResult<Vec<Session>> {
        let sql = format!(
            "SELECT {} FROM sessions WHERE user_id = $1 ORDER BY created_at DESC",
            SESSION_COLUMNS
        );
        let records = sqlx::query_as::<_, SessionRecord>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;

        records.into_iter().map(SessionRecord::to_domain).collect()
    }

    async fn insert_session(&self, session: &Session) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO sessions (id, user_id, title, files, preferences, status, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(session.id)
        .bind(session.user_id)
        .bind(session.title.as_deref())
        .bind(Json(&session.files))
        .bind(Json(&session.preferences))
        .bind(session.status.as_str())
        .bind(session.created_at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn update_session_title(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        title: &str,
    ) -> PortResult<()> {
        let result = sqlx::query("UPDATE sessions SET title = $1 WHERE id = $2 AND user_id = $3")
            .bind(title)
            .bind(session_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(not_found(session_id));
        }
        Ok(())
    }

    async fn mark_session_failed(&self, session_id: Uuid, error_message: &str) -> PortResult<()> {
        sqlx::query("UPDATE sessions SET status = 'failed', error_message = $1 WHERE id = $2")
            .bind(error_message)
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn delete_session(&self, user_id: Uuid, session_id: Uuid) -> PortResult<()> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = $1 AND user_id = $2")
            .bind(session_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(not_found(session_id));
        }
        Ok(())
    }
}
