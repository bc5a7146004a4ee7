//! In-memory fakes of the ports, shared by the unit tests of this crate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::chat_cache::{LocalChatCache, MemoryStore};
use crate::domain::{
    FileDescriptor, Flashcard, FlashcardOptions, Preferences, Session, SessionStatus,
};
use crate::ports::{
    AuthProvider, AuthUser, ChangeCallback, ChangeFeed, DatabaseService, FeedKey,
    FileStorageService, PortError, PortResult, StudyBackendService, Subscription,
    SubscriptionStatus, UploadedFile,
};

pub fn user() -> AuthUser {
    AuthUser {
        user_id: Uuid::from_u128(7),
        access_token: "token-7".into(),
    }
}

pub fn memory_cache() -> LocalChatCache {
    LocalChatCache::new(Arc::new(MemoryStore::new()))
}

pub fn ready_session(preferences: Preferences) -> Session {
    let mut session = Session::new_pending(Uuid::new_v4(), user().user_id, Vec::new(), preferences);
    session.status = SessionStatus::Success;
    session
}

pub fn summary_only() -> Preferences {
    Preferences {
        generate_summary: true,
        ..Preferences::default()
    }
}

pub fn pdf(name: &str) -> UploadedFile {
    UploadedFile {
        file_name: name.into(),
        mime_type: "application/pdf".into(),
        data: Bytes::from_static(b"%PDF-1.4"),
    }
}

//=========================================================================================
// Auth
//=========================================================================================

pub struct FakeAuth(Mutex<Option<AuthUser>>);

impl FakeAuth {
    pub fn signed_in() -> Arc<Self> {
        Arc::new(Self(Mutex::new(Some(user()))))
    }

    pub fn signed_out() -> Arc<Self> {
        Arc::new(Self(Mutex::new(None)))
    }
}

impl AuthProvider for FakeAuth {
    fn current_user(&self) -> Option<AuthUser> {
        self.0.lock().unwrap().clone()
    }
}

//=========================================================================================
// Database
//=========================================================================================

#[derive(Default)]
pub struct FakeDatabase {
    pub rows: Mutex<HashMap<Uuid, Session>>,
    pub fetches: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub deletes: Mutex<Vec<(Uuid, Uuid)>>,
    /// When set, listings read their rows and then wait for a permit before answering.
    pub list_gate: Option<Arc<Notify>>,
}

impl FakeDatabase {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn gated_listing(gate: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            list_gate: Some(gate),
            ..Self::default()
        })
    }

    pub fn put(&self, session: Session) {
        self.rows.lock().unwrap().insert(session.id, session);
    }

    pub fn row(&self, id: Uuid) -> Option<Session> {
        self.rows.lock().unwrap().get(&id).cloned()
    }

    pub fn set_status(&self, id: Uuid, status: SessionStatus) {
        if let Some(row) = self.rows.lock().unwrap().get_mut(&id) {
            row.status = status;
        }
    }
}

#[async_trait]
impl DatabaseService for FakeDatabase {
    async fn get_session_by_id(&self, session_id: Uuid) -> PortResult<Session> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.row(session_id)
            .ok_or_else(|| PortError::NotFound(format!("Session {} not found", session_id)))
    }

    async fn get_sessions_by_user(&self, user_id: Uuid) -> PortResult<Vec<Session>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let mut rows: Vec<Session> = self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(gate) = &self.list_gate {
            gate.notified().await;
        }
        Ok(rows)
    }

    async fn insert_session(&self, session: &Session) -> PortResult<()> {
        self.put(session.clone());
        Ok(())
    }

    async fn update_session_title(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        title: &str,
    ) -> PortResult<()> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&session_id) {
            Some(row) if row.user_id == user_id => {
                row.title = Some(title.to_string());
                Ok(())
            }
            _ => Err(PortError::NotFound(format!("Session {} not found", session_id))),
        }
    }

    async fn mark_session_failed(&self, session_id: Uuid, error_message: &str) -> PortResult<()> {
        if let Some(row) = self.rows.lock().unwrap().get_mut(&session_id) {
            row.status = SessionStatus::Failed;
            row.error_message = Some(error_message.to_string());
        }
        Ok(())
    }

    async fn delete_session(&self, user_id: Uuid, session_id: Uuid) -> PortResult<()> {
        self.deletes.lock().unwrap().push((user_id, session_id));
        let mut rows = self.rows.lock().unwrap();
        match rows.get(&session_id) {
            Some(row) if row.user_id == user_id => {
                rows.remove(&session_id);
                Ok(())
            }
            _ => Err(PortError::NotFound(format!("Session {} not found", session_id))),
        }
    }
}

//=========================================================================================
// Backend
//=========================================================================================

#[derive(Default)]
pub struct FakeBackend {
    pub process_calls: AtomicUsize,
    pub summary_calls: AtomicUsize,
    pub mcq_calls: AtomicUsize,
    pub topic_calls: AtomicUsize,
    pub chat_calls: AtomicUsize,
    pub last_mcq_options: Mutex<Option<FlashcardOptions>>,
    pub fail_with: Mutex<Option<PortError>>,
    /// When set, every generation call waits for a permit before answering.
    pub gate: Option<Arc<Notify>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn gated(gate: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            gate: Some(gate),
            ..Self::default()
        })
    }

    pub fn failing(err: PortError) -> Arc<Self> {
        Arc::new(Self {
            fail_with: Mutex::new(Some(err)),
            ..Self::default()
        })
    }

    pub fn generation_calls(&self) -> usize {
        self.summary_calls.load(Ordering::SeqCst)
            + self.mcq_calls.load(Ordering::SeqCst)
            + self.topic_calls.load(Ordering::SeqCst)
            + self.chat_calls.load(Ordering::SeqCst)
    }

    async fn answer(&self) -> PortResult<()> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        match self.fail_with.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl StudyBackendService for FakeBackend {
    async fn process_documents(
        &self,
        _auth: &AuthUser,
        _session_id: Uuid,
        _files: &[FileDescriptor],
    ) -> PortResult<()> {
        self.process_calls.fetch_add(1, Ordering::SeqCst);
        self.answer().await
    }

    async fn generate_summary(
        &self,
        _auth: &AuthUser,
        _session_id: Uuid,
        _query: Option<&str>,
    ) -> PortResult<String> {
        self.summary_calls.fetch_add(1, Ordering::SeqCst);
        self.answer().await?;
        Ok("A concise summary.".into())
    }

    async fn generate_mcqs(
        &self,
        _auth: &AuthUser,
        _session_id: Uuid,
        _query: Option<&str>,
        options: &FlashcardOptions,
    ) -> PortResult<Vec<Flashcard>> {
        self.mcq_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_mcq_options.lock().unwrap() = Some(*options);
        self.answer().await?;
        Ok(vec![Flashcard {
            question: "What is ATP?".into(),
            options: vec!["Energy carrier".into(), "Protein".into()],
            answer: "Energy carrier".into(),
        }])
    }

    async fn get_topics(&self, _auth: &AuthUser, _session_id: Uuid) -> PortResult<Vec<String>> {
        self.topic_calls.fetch_add(1, Ordering::SeqCst);
        self.answer().await?;
        Ok(vec!["glycolysis".into(), "krebs cycle".into()])
    }

    async fn chat(
        &self,
        _auth: &AuthUser,
        _session_id: Uuid,
        _conversation_id: Uuid,
        message: &str,
    ) -> PortResult<String> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        self.answer().await?;
        Ok(format!("Answer to: {}", message))
    }
}

//=========================================================================================
// Storage & Change Feed
//=========================================================================================

#[derive(Default)]
pub struct FakeStorage {
    pub uploads: AtomicUsize,
}

#[async_trait]
impl FileStorageService for FakeStorage {
    async fn upload(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        file: &UploadedFile,
    ) -> PortResult<FileDescriptor> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(FileDescriptor {
            file_name: file.file_name.clone(),
            storage_url: format!("users/{}/sessions/{}/{}", user_id, session_id, file.file_name),
            mime_type: file.mime_type.clone(),
            size: file.data.len() as u64,
        })
    }
}

/// Records subscriptions and lets tests fire notifications by hand.
#[derive(Default)]
pub struct FakeFeed {
    pub status: Mutex<Option<SubscriptionStatus>>,
    pub subscribes: AtomicUsize,
    pub active: Arc<Mutex<HashMap<FeedKey, ChangeCallback>>>,
}

impl FakeFeed {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fire(&self, key: FeedKey) {
        let callback = self.active.lock().unwrap().get(&key).cloned();
        if let Some(callback) = callback {
            callback();
        }
    }

    pub fn active_keys(&self) -> Vec<FeedKey> {
        self.active.lock().unwrap().keys().copied().collect()
    }
}

#[async_trait]
impl ChangeFeed for FakeFeed {
    async fn subscribe(&self, key: FeedKey, on_change: ChangeCallback) -> PortResult<Subscription> {
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        let status = self.status.lock().unwrap().unwrap_or(SubscriptionStatus::Subscribed);
        if status != SubscriptionStatus::Subscribed {
            return Ok(Subscription::inactive(status));
        }
        self.active.lock().unwrap().insert(key, on_change);
        let active = self.active.clone();
        Ok(Subscription::new(status, move || {
            active.lock().unwrap().remove(&key);
        }))
    }
}
