//! services/api/src/web/test_support.rs
//!
//! In-memory adapters and an app builder shared by the web layer's tests.

use crate::adapters::{LocalFileStorage, SessionAuth};
use crate::config::Config;
use crate::web::{build_router, AppState};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderValue, Request, StatusCode};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use study_session_core::domain::{
    FileDescriptor, Flashcard, FlashcardOptions, Preferences, Session, SessionStatus,
};
use study_session_core::ports::{
    AuthUser, ChangeCallback, ChangeFeed, DatabaseService, FeedKey, PortError, PortResult,
    StudyBackendService, Subscription, SubscriptionStatus,
};
use study_session_core::{LocalChatCache, MemoryStore, SessionRepository};
use tokio::sync::Notify;
use tower::ServiceExt;
use uuid::Uuid;

pub const TOKEN: &str = "token";

#[derive(Default)]
pub struct InMemoryDb {
    pub rows: Mutex<HashMap<Uuid, Session>>,
}

#[async_trait]
impl DatabaseService for InMemoryDb {
    async fn get_session_by_id(&self, session_id: Uuid) -> PortResult<Session> {
        self.rows
            .lock()
            .unwrap()
            .get(&session_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(session_id.to_string()))
    }

    async fn get_sessions_by_user(&self, user_id: Uuid) -> PortResult<Vec<Session>> {
        let mut sessions: Vec<Session> = self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn insert_session(&self, session: &Session) -> PortResult<()> {
        self.rows.lock().unwrap().insert(session.id, session.clone());
        Ok(())
    }

    async fn update_session_title(
        &self,
        _user_id: Uuid,
        session_id: Uuid,
        title: &str,
    ) -> PortResult<()> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .get_mut(&session_id)
            .ok_or_else(|| PortError::NotFound(session_id.to_string()))?;
        row.title = Some(title.to_string());
        Ok(())
    }

    async fn mark_session_failed(&self, session_id: Uuid, error_message: &str) -> PortResult<()> {
        if let Some(row) = self.rows.lock().unwrap().get_mut(&session_id) {
            row.status = SessionStatus::Failed;
            row.error_message = Some(error_message.to_string());
        }
        Ok(())
    }

    async fn delete_session(&self, user_id: Uuid, session_id: Uuid) -> PortResult<()> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get(&session_id) {
            Some(row) if row.user_id == user_id => {
                rows.remove(&session_id);
                Ok(())
            }
            _ => Err(PortError::NotFound(session_id.to_string())),
        }
    }
}

/// Answers every request at once unless a delay or a gate is configured.
#[derive(Default)]
pub struct EchoBackend {
    pub delay: Option<Duration>,
    pub gate: Option<Arc<Notify>>,
    pub summary_calls: AtomicUsize,
    pub chat_calls: AtomicUsize,
}

impl EchoBackend {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn summaries(&self) -> usize {
        self.summary_calls.load(Ordering::SeqCst)
    }

    pub fn chats(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
    }
}

#[async_trait]
impl StudyBackendService for EchoBackend {
    async fn process_documents(
        &self,
        _: &AuthUser,
        _: Uuid,
        _: &[FileDescriptor],
    ) -> PortResult<()> {
        Ok(())
    }

    async fn generate_summary(
        &self,
        _: &AuthUser,
        _: Uuid,
        _: Option<&str>,
    ) -> PortResult<String> {
        self.summary_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        Ok("Summary.".to_string())
    }

    async fn generate_mcqs(
        &self,
        _: &AuthUser,
        _: Uuid,
        _: Option<&str>,
        _: &FlashcardOptions,
    ) -> PortResult<Vec<Flashcard>> {
        Ok(Vec::new())
    }

    async fn get_topics(&self, _: &AuthUser, _: Uuid) -> PortResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn chat(&self, _: &AuthUser, _: Uuid, _: Uuid, message: &str) -> PortResult<String> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        Ok(format!("Echo: {}", message))
    }
}

pub struct SilentFeed;

#[async_trait]
impl ChangeFeed for SilentFeed {
    async fn subscribe(&self, _: FeedKey, _: ChangeCallback) -> PortResult<Subscription> {
        Ok(Subscription::new(SubscriptionStatus::Subscribed, || {}))
    }
}

pub struct TestApp {
    pub state: Arc<AppState>,
    pub db: Arc<InMemoryDb>,
    pub backend: Arc<EchoBackend>,
    pub user: AuthUser,
    _uploads: tempfile::TempDir,
}

pub fn test_app(signed_in: bool) -> TestApp {
    test_app_with(signed_in, EchoBackend::default())
}

pub fn test_app_with(signed_in: bool, backend: EchoBackend) -> TestApp {
    let uploads = tempfile::tempdir().unwrap();
    let config = Config::from_lookup(|name| match name {
        "DATABASE_URL" => Some("postgres://localhost/unused".to_string()),
        _ => None,
    })
    .unwrap();
    let user = AuthUser {
        user_id: Uuid::new_v4(),
        access_token: TOKEN.to_string(),
    };
    let auth = Arc::new(SessionAuth::new(signed_in.then(|| user.clone())));
    let db = Arc::new(InMemoryDb::default());
    let backend = Arc::new(backend);
    let repository = Arc::new(SessionRepository::new(
        db.clone(),
        backend.clone(),
        Arc::new(LocalFileStorage::new(uploads.path())),
        auth.clone(),
    ));
    let state = Arc::new(AppState::new(
        Arc::new(config),
        auth,
        repository,
        memory_cache(),
        Arc::new(SilentFeed),
    ));
    TestApp {
        state,
        db,
        backend,
        user,
        _uploads: uploads,
    }
}

pub fn memory_cache() -> LocalChatCache {
    LocalChatCache::new(Arc::new(MemoryStore::new()))
}

impl TestApp {
    /// Stores a session whose summary is already generated.
    pub fn put(&self, title: &str, status: SessionStatus) -> Uuid {
        self.put_with_summary(title, status, Some("Already there."))
    }

    pub fn put_with_summary(
        &self,
        title: &str,
        status: SessionStatus,
        summary: Option<&str>,
    ) -> Uuid {
        let mut session = Session::new_pending(
            Uuid::new_v4(),
            self.user.user_id,
            Vec::new(),
            Preferences {
                generate_summary: true,
                ..Preferences::default()
            },
        );
        session.title = Some(title.to_string());
        session.status = status;
        session.summary = summary.map(str::to_string);
        let id = session.id;
        self.db.rows.lock().unwrap().insert(id, session);
        id
    }

    /// Sends `request` with the signed-in user's bearer token unless it
    /// already carries an `Authorization` header.
    pub async fn call(&self, mut request: Request<Body>) -> (StatusCode, serde_json::Value) {
        request
            .headers_mut()
            .entry(header::AUTHORIZATION)
            .or_insert(HeaderValue::from_static("Bearer token"));
        self.call_anonymous(request).await
    }

    pub async fn call_anonymous(&self, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = build_router(self.state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, body)
    }
}
