//! crates/study_session_core/src/ports.rs
//!
//! Defines the service contracts (traits) the synchronization logic depends on.
//! These traits form the boundary of the hexagonal architecture: the relational
//! store, the backend generation API, the auth provider, the change feed and the
//! local durable storage are all consumed through them and never reimplemented here.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{FileDescriptor, Flashcard, FlashcardOptions, Session};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, Clone, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
    /// The backend answered with a failure status. `message` is the backend's own
    /// explanation when its error body carried one.
    #[error("Backend returned {status}: {}", .message.as_deref().unwrap_or("no message"))]
    Backend { status: u16, message: Option<String> },
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Shared Port Types
//=========================================================================================

/// The signed-in identity supplied by the auth provider.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub access_token: String,
}

impl fmt::Debug for AuthUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthUser")
            .field("user_id", &self.user_id)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// A document handed over by the user, before it is stored.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub mime_type: String,
    pub data: Bytes,
}

/// The record scope a change-feed subscription is filtered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedKey {
    Session(Uuid),
    User(Uuid),
}

impl FeedKey {
    /// Whether a mutation on the row (`session_id`, `user_id`) falls in this scope.
    pub fn matches(&self, session_id: Uuid, user_id: Uuid) -> bool {
        match self {
            FeedKey::Session(id) => *id == session_id,
            FeedKey::User(id) => *id == user_id,
        }
    }
}

impl fmt::Display for FeedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedKey::Session(id) => write!(f, "id=eq.{}", id),
            FeedKey::User(id) => write!(f, "user_id=eq.{}", id),
        }
    }
}

/// Acknowledgment status reported when a subscription is set up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Subscribed,
    TimedOut,
    ChannelError,
    Closed,
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubscriptionStatus::Subscribed => "SUBSCRIBED",
            SubscriptionStatus::TimedOut => "TIMED_OUT",
            SubscriptionStatus::ChannelError => "CHANNEL_ERROR",
            SubscriptionStatus::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}

/// Trigger invoked on every change notification. It carries no data.
pub type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

/// Handle to an active change-feed subscription.
/// Dropping the handle tears the subscription down.
pub struct Subscription {
    status: SubscriptionStatus,
    teardown: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(
        status: SubscriptionStatus,
        teardown: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            status,
            teardown: Some(Box::new(teardown)),
        }
    }

    /// A handle for a subscription that never became active.
    pub fn inactive(status: SubscriptionStatus) -> Self {
        Self {
            status,
            teardown: None,
        }
    }

    pub fn status(&self) -> SubscriptionStatus {
        self.status
    }

    pub fn unsubscribe(mut self) {
        self.teardown_now();
    }

    fn teardown_now(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.teardown_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("status", &self.status)
            .field("active", &self.teardown.is_some())
            .finish()
    }
}

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// The hosted relational store holding one row per session.
#[async_trait]
pub trait DatabaseService: Send + Sync {
    async fn get_session_by_id(&self, session_id: Uuid) -> PortResult<Session>;

    /// All sessions owned by `user_id`, newest first.
    async fn get_sessions_by_user(&self, user_id: Uuid) -> PortResult<Vec<Session>>;

    async fn insert_session(&self, session: &Session) -> PortResult<()>;

    async fn update_session_title(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        title: &str,
    ) -> PortResult<()>;

    async fn mark_session_failed(&self, session_id: Uuid, error_message: &str) -> PortResult<()>;

    async fn delete_session(&self, user_id: Uuid, session_id: Uuid) -> PortResult<()>;
}

/// The backend that processes documents and generates study material.
#[async_trait]
pub trait StudyBackendService: Send + Sync {
    async fn process_documents(
        &self,
        auth: &AuthUser,
        session_id: Uuid,
        files: &[FileDescriptor],
    ) -> PortResult<()>;

    async fn generate_summary(
        &self,
        auth: &AuthUser,
        session_id: Uuid,
        query: Option<&str>,
    ) -> PortResult<String>;

    async fn generate_mcqs(
        &self,
        auth: &AuthUser,
        session_id: Uuid,
        query: Option<&str>,
        options: &FlashcardOptions,
    ) -> PortResult<Vec<Flashcard>>;

    async fn get_topics(&self, auth: &AuthUser, session_id: Uuid) -> PortResult<Vec<String>>;

    async fn chat(
        &self,
        auth: &AuthUser,
        session_id: Uuid,
        conversation_id: Uuid,
        message: &str,
    ) -> PortResult<String>;
}

/// Stores uploaded documents and returns where they ended up.
#[async_trait]
pub trait FileStorageService: Send + Sync {
    async fn upload(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        file: &UploadedFile,
    ) -> PortResult<FileDescriptor>;
}

/// Supplies the currently authenticated identity, if any.
pub trait AuthProvider: Send + Sync {
    fn current_user(&self) -> Option<AuthUser>;
}

/// Push notifications for mutations on session rows.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Registers `on_change` for mutations scoped to `key`. A subscription that could
    /// not be acknowledged is still returned, carrying its non-`Subscribed` status.
    async fn subscribe(&self, key: FeedKey, on_change: ChangeCallback) -> PortResult<Subscription>;
}

/// Durable string storage scoped to this client.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> PortResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> PortResult<()>;
    fn remove(&self, key: &str) -> PortResult<()>;
}
