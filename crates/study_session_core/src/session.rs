//! crates/study_session_core/src/session.rs
//!
//! The controller for one open study session. It owns the local view of the
//! remote record, the chat store and the orchestrator, and folds generation
//! results and change-feed re-fetches into that view.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chat_cache::LocalChatCache;
use crate::chat_store::ChatSessionStore;
use crate::domain::{Artifact, ChatMessage, FlashcardOptions, Session, SessionStatus};
use crate::error::SyncError;
use crate::orchestrator::{GenerationOrchestrator, PromptMode, QuickAction, SweepReport};
use crate::repository::SessionRepository;

const EVENT_CAPACITY: usize = 64;

/// Data-less notifications for consumers of a [`StudySession`]. Receivers read
/// the current state through the session's snapshot methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    SessionChanged,
    TranscriptChanged,
    Removed,
}

pub struct StudySession {
    session_id: Uuid,
    repository: Arc<SessionRepository>,
    orchestrator: GenerationOrchestrator,
    view: Mutex<Option<Session>>,
    events: broadcast::Sender<SessionEvent>,
}

impl StudySession {
    pub fn new(
        session_id: Uuid,
        repository: Arc<SessionRepository>,
        cache: LocalChatCache,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let chat = Arc::new(ChatSessionStore::new(cache));
        let transcript_events = events.clone();
        chat.set_listener(Arc::new(move || {
            let _ = transcript_events.send(SessionEvent::TranscriptChanged);
        }));
        let orchestrator =
            GenerationOrchestrator::new(repository.auth(), repository.backend(), chat);
        Self {
            session_id,
            repository,
            orchestrator,
            view: Mutex::new(None),
            events,
        }
    }

    pub fn id(&self) -> Uuid {
        self.session_id
    }

    fn view(&self) -> MutexGuard<'_, Option<Session>> {
        self.view.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: SessionEvent) {
        // No receivers is fine; nobody is watching yet.
        let _ = self.events.send(event);
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> Option<Session> {
        self.view().clone()
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.orchestrator.chat().messages()
    }

    pub fn is_busy(&self) -> bool {
        self.orchestrator.chat().in_flight()
    }

    fn loaded_view(&self) -> Result<Session, SyncError> {
        self.snapshot()
            .ok_or_else(|| {
                SyncError::NotFound(format!("Session {} is not loaded", self.session_id))
            })
    }

    /// Loads the record, hydrates the chat transcript and runs the first sweep.
    pub async fn open(&self) -> Result<Session, SyncError> {
        let session = self.repository.fetch_one(self.session_id).await?;
        self.orchestrator
            .chat()
            .initialize(self.session_id, &session.chat_history);
        if let Some(options) = session.preferences.flashcard_options {
            self.orchestrator.set_flashcard_options(options);
        }
        *self.view() = Some(session.clone());
        info!("Opened session {} ({}).", self.session_id, session.status);
        self.emit(SessionEvent::SessionChanged);

        self.sweep(&session).await;
        Ok(self.snapshot().unwrap_or(session))
    }

    /// Re-fetches the full record after a change notification and replaces the view.
    pub async fn refresh(&self) -> Result<Session, SyncError> {
        let session = match self.repository.fetch_one(self.session_id).await {
            Ok(session) => session,
            Err(SyncError::NotFound(what)) => {
                info!("Session {} disappeared remotely.", self.session_id);
                self.view().take();
                self.emit(SessionEvent::Removed);
                return Err(SyncError::NotFound(what));
            }
            Err(e) => return Err(e),
        };

        if let Some(previous) = self.view().as_ref().map(|s| s.status) {
            if !previous.can_advance_to(session.status) {
                warn!(
                    "Session {} status went from {} to {}; taking the remote value.",
                    self.session_id, previous, session.status
                );
            }
        }
        self.orchestrator.chat().merge_remote(&session.chat_history);
        *self.view() = Some(session.clone());
        debug!("Refreshed session {} ({}).", self.session_id, session.status);
        self.emit(SessionEvent::SessionChanged);

        self.sweep(&session).await;
        Ok(self.snapshot().unwrap_or(session))
    }

    async fn sweep(&self, session: &Session) -> Option<SweepReport> {
        if session.status != SessionStatus::Success {
            return None;
        }
        let report = self.orchestrator.auto_generate(session).await?;
        if !report.generated.is_empty() {
            if let Some(view) = self.view().as_mut() {
                for update in &report.generated {
                    update.apply_to(view);
                }
            }
            self.emit(SessionEvent::SessionChanged);
        }
        Some(report)
    }

    /// Generates `artifact` on request and writes it into the session view.
    pub async fn generate(&self, artifact: Artifact) -> Result<Session, SyncError> {
        let session = self.loaded_view()?;
        let update = self
            .orchestrator
            .generate(&session, artifact, PromptMode::WithUserTurn)
            .await?;
        let updated = {
            let mut view = self.view();
            let view = view.get_or_insert(session);
            update.apply_to(view);
            view.clone()
        };
        self.emit(SessionEvent::SessionChanged);
        Ok(updated)
    }

    /// Sends `text` as a free-form chat message.
    pub async fn send_message(&self, text: &str) -> Result<ChatMessage, SyncError> {
        let session = self.loaded_view()?;
        self.orchestrator.chat().set_composing_input(text);
        self.orchestrator.send_message(&session).await
    }

    pub async fn quick_action(&self, action: QuickAction) -> Result<ChatMessage, SyncError> {
        let session = self.loaded_view()?;
        self.orchestrator.quick_action(&session, action).await
    }

    pub fn flashcard_options(&self) -> FlashcardOptions {
        self.orchestrator.flashcard_options()
    }

    pub fn set_flashcard_options(&self, options: FlashcardOptions) {
        self.orchestrator.set_flashcard_options(options);
    }

    /// Clears the transcript and its local cache entry.
    pub fn reset_chat(&self) {
        self.orchestrator.chat().reset();
    }
}
