//! crates/study_session_core/src/orchestrator.rs
//!
//! Issues generation and chat requests for one session against the backend.
//!
//! There is no queue. A request made while another one is in flight is rejected
//! with `AlreadyInFlight`, and every request requires a signed-in user and a
//! session in the ready state. Failed generations never touch the session status.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{info, warn};
use uuid::Uuid;

use crate::chat_store::ChatSessionStore;
use crate::domain::{
    render_study_guide, Artifact, ArtifactUpdate, ChatMessage, FlashcardOptions, Session,
};
use crate::error::SyncError;
use crate::ports::{AuthProvider, AuthUser, PortResult, StudyBackendService};

/// Canned chat requests that go through the chatbot with a typing placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuickAction {
    Research,
    Explain,
}

impl QuickAction {
    pub fn prompt(self) -> &'static str {
        match self {
            QuickAction::Research => {
                "Research and provide detailed information based on the documents."
            }
            QuickAction::Explain => "Explain the key concepts from the documents in more detail.",
        }
    }
}

/// Whether a generation shows the user's intent as a synthesized chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptMode {
    WithUserTurn,
    Silent,
}

fn user_prompt(artifact: Artifact) -> &'static str {
    match artifact {
        Artifact::Summary => "Can you summarize this?",
        Artifact::Flashcards => "Can you generate flashcards?",
        Artifact::StudyGuide => "Can you give me a study guide?",
    }
}

fn acknowledgment(artifact: Artifact) -> &'static str {
    match artifact {
        Artifact::Summary => "I've generated your summary! You can find it in the **Summary** tab.",
        Artifact::Flashcards => {
            "Your flashcards are ready! Head to the **Flashcards** tab to start practicing."
        }
        Artifact::StudyGuide => {
            "Your study guide has been prepared. Check it out in the **Study Guide** tab."
        }
    }
}

/// What one auto-generation sweep did.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub generated: Vec<ArtifactUpdate>,
    pub failed: Vec<(Artifact, SyncError)>,
}

impl SweepReport {
    pub fn notice(&self) -> String {
        if !self.failed.is_empty() {
            return "Some content failed to generate.".to_string();
        }
        if self.generated.is_empty() {
            return "All content already available.".to_string();
        }
        let labels: Vec<&str> = self.generated.iter().map(|u| u.artifact().label()).collect();
        format!("{} generated successfully.", labels.join(", "))
    }
}

pub struct GenerationOrchestrator {
    auth: Arc<dyn AuthProvider>,
    backend: Arc<dyn StudyBackendService>,
    chat: Arc<ChatSessionStore>,
    flashcard_options: Mutex<FlashcardOptions>,
    /// One-shot latch of the auto-generation sweep, scoped to this orchestrator.
    auto_generated: AtomicBool,
}

impl GenerationOrchestrator {
    pub fn new(
        auth: Arc<dyn AuthProvider>,
        backend: Arc<dyn StudyBackendService>,
        chat: Arc<ChatSessionStore>,
    ) -> Self {
        Self {
            auth,
            backend,
            chat,
            flashcard_options: Mutex::new(FlashcardOptions::default()),
            auto_generated: AtomicBool::new(false),
        }
    }

    pub fn chat(&self) -> &Arc<ChatSessionStore> {
        &self.chat
    }

    pub fn flashcard_options(&self) -> FlashcardOptions {
        *self.flashcard_options.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_flashcard_options(&self, options: FlashcardOptions) {
        *self.flashcard_options.lock().unwrap_or_else(PoisonError::into_inner) = options;
    }

    pub fn has_auto_generated(&self) -> bool {
        self.auto_generated.load(Ordering::SeqCst)
    }

    fn require_user(&self) -> Result<AuthUser, SyncError> {
        self.auth.current_user().ok_or(SyncError::NotAuthenticated)
    }

    fn ensure_ready(session: &Session) -> Result<(), SyncError> {
        if session.status.is_ready() {
            Ok(())
        } else {
            Err(SyncError::NotReady {
                status: session.status,
            })
        }
    }

    async fn request_artifact(
        &self,
        user: &AuthUser,
        session_id: Uuid,
        artifact: Artifact,
    ) -> PortResult<ArtifactUpdate> {
        match artifact {
            Artifact::Summary => self
                .backend
                .generate_summary(user, session_id, None)
                .await
                .map(ArtifactUpdate::Summary),
            Artifact::Flashcards => {
                let options = self.flashcard_options();
                self.backend
                    .generate_mcqs(user, session_id, None, &options)
                    .await
                    .map(ArtifactUpdate::Flashcards)
            }
            Artifact::StudyGuide => self
                .backend
                .get_topics(user, session_id)
                .await
                .map(|topics| ArtifactUpdate::StudyGuide(render_study_guide(&topics))),
        }
    }

    /// Generates one artifact on request and acknowledges it in the transcript.
    pub async fn generate(
        &self,
        session: &Session,
        artifact: Artifact,
        mode: PromptMode,
    ) -> Result<ArtifactUpdate, SyncError> {
        let user = self.require_user()?;
        Self::ensure_ready(session)?;
        let _guard = self.chat.try_begin_request()?;

        if mode == PromptMode::WithUserTurn {
            self.chat.append(ChatMessage::user(user_prompt(artifact)));
        }

        let update = self
            .request_artifact(&user, session.id, artifact)
            .await
            .map_err(|e| {
                let fallback = format!("Failed to generate {}.", artifact.label().to_lowercase());
                let err = SyncError::remote(e, &fallback);
                warn!("Generating {} for session {} failed: {}", artifact, session.id, err);
                err
            })?;

        self.chat.append(ChatMessage::assistant(acknowledgment(artifact)));
        info!("Generated {} for session {}.", artifact, session.id);
        Ok(update)
    }

    /// Sends the composed input to the chatbot.
    ///
    /// The user's message is appended optimistically and is kept even when the
    /// backend call fails.
    pub async fn send_message(&self, session: &Session) -> Result<ChatMessage, SyncError> {
        let user = self.require_user()?;
        Self::ensure_ready(session)?;
        let text = self.chat.composing_input().trim().to_string();
        if text.is_empty() {
            return Err(SyncError::InvalidInput("Message is empty.".to_string()));
        }
        let _guard = self.chat.try_begin_request()?;

        self.chat.append(ChatMessage::user(text.clone()));
        self.chat.clear_composing_input();

        let reply = self
            .backend
            .chat(&user, session.id, session.id, &text)
            .await
            .map_err(|e| {
                let err = SyncError::remote(e, "Failed to get response from AI.");
                warn!("Chat request for session {} failed: {}", session.id, err);
                err
            })?;

        let message = ChatMessage::assistant(reply);
        self.chat.append(message.clone());
        Ok(message)
    }

    /// Runs a canned chat request, showing a typing placeholder while it is pending.
    pub async fn quick_action(
        &self,
        session: &Session,
        action: QuickAction,
    ) -> Result<ChatMessage, SyncError> {
        let user = self.require_user()?;
        Self::ensure_ready(session)?;
        let _guard = self.chat.try_begin_request()?;

        self.chat.append(ChatMessage::user(action.prompt()));
        self.chat.append(ChatMessage::typing());

        let result = self
            .backend
            .chat(&user, session.id, session.id, action.prompt())
            .await;
        self.chat.remove_trailing_placeholder();

        let reply = result.map_err(|e| {
            let err = SyncError::remote(e, "Failed to get response from AI.");
            warn!("{:?} request for session {} failed: {}", action, session.id, err);
            err
        })?;
        let message = ChatMessage::assistant(reply);
        self.chat.append(message.clone());
        Ok(message)
    }

    /// Generates every requested artifact that is still empty, once per orchestrator.
    ///
    /// Returns `None` when the sweep does not run: the session is not ready, nobody
    /// is signed in, the latch is already set, or another request is in flight. In
    /// the last case the latch stays open so a later call can still sweep.
    pub async fn auto_generate(&self, session: &Session) -> Option<SweepReport> {
        if !session.status.is_ready() || self.has_auto_generated() {
            return None;
        }
        let user = self.auth.current_user()?;
        let _guard = self.chat.try_begin_request().ok()?;
        if self.auto_generated.swap(true, Ordering::SeqCst) {
            return None;
        }

        let mut report = SweepReport::default();
        for artifact in session.missing_artifacts() {
            match self.request_artifact(&user, session.id, artifact).await {
                Ok(update) => {
                    self.chat.append(ChatMessage::assistant(acknowledgment(artifact)));
                    report.generated.push(update);
                }
                Err(e) => {
                    let err = SyncError::remote(
                        e,
                        &format!("Failed to generate {}.", artifact.label().to_lowercase()),
                    );
                    warn!(
                        "Auto-generation of {} for session {} failed: {}",
                        artifact, session.id, err
                    );
                    report.failed.push((artifact, err));
                }
            }
        }
        info!("Auto-generation for session {}: {}", session.id, report.notice());
        Some(report)
    }
}
