//! crates/study_session_core/src/repository.rs
//!
//! Fetches and mutates session records in the relational store on behalf of the
//! signed-in user, and keeps the dashboard listing cached between mutations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::{Preferences, Session};
use crate::error::SyncError;
use crate::ports::{
    AuthProvider, AuthUser, DatabaseService, FileStorageService, StudyBackendService, UploadedFile,
};

struct CachedListing {
    user_id: Uuid,
    sessions: Vec<Session>,
}

pub struct SessionRepository {
    db: Arc<dyn DatabaseService>,
    backend: Arc<dyn StudyBackendService>,
    storage: Arc<dyn FileStorageService>,
    auth: Arc<dyn AuthProvider>,
    listing: Mutex<Option<CachedListing>>,
    // Bumped by every invalidation; a fetch that raced one is not cached.
    listing_generation: AtomicU64,
}

impl SessionRepository {
    pub fn new(
        db: Arc<dyn DatabaseService>,
        backend: Arc<dyn StudyBackendService>,
        storage: Arc<dyn FileStorageService>,
        auth: Arc<dyn AuthProvider>,
    ) -> Self {
        Self {
            db,
            backend,
            storage,
            auth,
            listing: Mutex::new(None),
            listing_generation: AtomicU64::new(0),
        }
    }

    pub fn auth(&self) -> Arc<dyn AuthProvider> {
        self.auth.clone()
    }

    pub fn backend(&self) -> Arc<dyn StudyBackendService> {
        self.backend.clone()
    }

    fn require_user(&self) -> Result<AuthUser, SyncError> {
        self.auth.current_user().ok_or(SyncError::NotAuthenticated)
    }

    fn listing(&self) -> MutexGuard<'_, Option<CachedListing>> {
        self.listing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Loads one session. A record owned by someone else is reported as not found.
    pub async fn fetch_one(&self, session_id: Uuid) -> Result<Session, SyncError> {
        let user = self.require_user()?;
        let session = self.db.get_session_by_id(session_id).await?;
        if session.user_id != user.user_id {
            warn!("Session {} requested by user {} who does not own it.", session_id, user.user_id);
            return Err(SyncError::NotFound(format!("Session {} not found", session_id)));
        }
        Ok(session)
    }

    /// The signed-in user's sessions, newest first, served from cache when possible.
    pub async fn list_sessions(&self) -> Result<Vec<Session>, SyncError> {
        let user = self.require_user()?;
        if let Some(cached) = self.listing().as_ref() {
            if cached.user_id == user.user_id {
                return Ok(cached.sessions.clone());
            }
        }

        let generation = self.listing_generation.load(Ordering::SeqCst);
        let sessions = self.db.get_sessions_by_user(user.user_id).await?;
        let mut listing = self.listing();
        if self.listing_generation.load(Ordering::SeqCst) == generation {
            *listing = Some(CachedListing {
                user_id: user.user_id,
                sessions: sessions.clone(),
            });
        } else {
            debug!("Listing for user {} changed while loading; not cached.", user.user_id);
        }
        Ok(sessions)
    }

    /// Drops the cached listing so the next `list_sessions` re-fetches.
    pub fn invalidate_listing(&self) {
        let mut listing = self.listing();
        self.listing_generation.fetch_add(1, Ordering::SeqCst);
        listing.take();
    }

    pub async fn update_title(&self, session_id: Uuid, new_title: &str) -> Result<(), SyncError> {
        let user = self.require_user()?;
        self.db
            .update_session_title(user.user_id, session_id, new_title.trim())
            .await?;
        self.invalidate_listing();
        info!("Renamed session {}.", session_id);
        Ok(())
    }

    pub async fn delete(&self, session_id: Uuid) -> Result<(), SyncError> {
        let user = self.require_user()?;
        self.db.delete_session(user.user_id, session_id).await?;
        self.invalidate_listing();
        info!("Deleted session {}.", session_id);
        Ok(())
    }

    /// Creates a session and starts backend processing.
    ///
    /// The identifier is generated here. Files are stored first, then the pending
    /// record is written, then processing is triggered with the same identifier.
    /// If the trigger fails the record is moved to `failed` before the error is returned.
    pub async fn create(
        &self,
        files: Vec<UploadedFile>,
        preferences: Preferences,
    ) -> Result<Uuid, SyncError> {
        let user = self.require_user()?;
        let session_id = Uuid::new_v4();

        let mut descriptors = Vec::with_capacity(files.len());
        for file in &files {
            let descriptor = self
                .storage
                .upload(user.user_id, session_id, file)
                .await
                .map_err(|e| {
                    SyncError::remote(e, &format!("Failed to upload {}.", file.file_name))
                })?;
            descriptors.push(descriptor);
        }

        let session = Session::new_pending(session_id, user.user_id, descriptors, preferences);
        self.db.insert_session(&session).await?;
        self.invalidate_listing();
        info!("Created session {} with {} file(s).", session_id, session.files.len());

        if let Err(e) = self
            .backend
            .process_documents(&user, session_id, &session.files)
            .await
        {
            let err = SyncError::remote(e, "Failed to start document processing.");
            error!("Processing trigger failed for session {}: {}", session_id, err);
            if let Err(mark_err) = self.db.mark_session_failed(session_id, &err.to_string()).await {
                error!("Could not mark session {} as failed: {}", session_id, mark_err);
            }
            return Err(err);
        }

        Ok(session_id)
    }
}
