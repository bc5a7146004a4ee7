//! crates/study_session_core/src/domain.rs
//!
//! Defines the core data structures for a study session: the session record itself,
//! its generation preferences, the generated artifacts and the chat transcript.
//! These types are shared by the relational store, the local chat cache and the
//! web surface, so they carry serde derives matching the stored wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Content of the transient "assistant is typing" placeholder message.
pub const TYPING_SENTINEL: &str = "__typing__";

//=========================================================================================
// Session Status
//=========================================================================================

/// Processing status of a session, advanced by the backend over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Processing,
    /// The ready state. Older records store it as `completed`.
    #[serde(alias = "completed")]
    Success,
    Failed,
    CompletedWithErrors,
}

impl SessionStatus {
    /// Generation and chat are only permitted once processing succeeded.
    pub fn is_ready(self) -> bool {
        self == SessionStatus::Success
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Success | SessionStatus::Failed | SessionStatus::CompletedWithErrors
        )
    }

    /// Position in the forward lifecycle. All terminal states share the last rank.
    pub fn rank(self) -> u8 {
        match self {
            SessionStatus::Pending => 0,
            SessionStatus::Processing => 1,
            SessionStatus::Success
            | SessionStatus::Failed
            | SessionStatus::CompletedWithErrors => 2,
        }
    }

    /// Whether moving from `self` to `next` respects the monotonic lifecycle.
    /// A terminal session may be retried, which sends it back to `processing`.
    pub fn can_advance_to(self, next: SessionStatus) -> bool {
        if self == next {
            return true;
        }
        if self.is_terminal() {
            return next == SessionStatus::Processing;
        }
        next.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Processing => "processing",
            SessionStatus::Success => "success",
            SessionStatus::Failed => "failed",
            SessionStatus::CompletedWithErrors => "completed_with_errors",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SessionStatus::Pending),
            "processing" => Ok(SessionStatus::Processing),
            "success" | "completed" => Ok(SessionStatus::Success),
            "failed" => Ok(SessionStatus::Failed),
            "completed_with_errors" => Ok(SessionStatus::CompletedWithErrors),
            other => Err(format!("unknown session status '{}'", other)),
        }
    }
}

//=========================================================================================
// Preferences & Flashcard Options
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

/// Sub-options for flashcard generation. A count of zero means the option is disabled,
/// not that zero items are requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlashcardOptions {
    pub difficulty: Difficulty,
    pub num_questions: u32,
    pub num_options: u32,
}

impl FlashcardOptions {
    pub const DEFAULT_NUM_QUESTIONS: u32 = 5;
    pub const DEFAULT_NUM_OPTIONS: u32 = 4;

    pub fn set_difficulty(&mut self, difficulty: Difficulty) {
        self.difficulty = difficulty;
    }

    pub fn toggle_num_questions(&mut self, enabled: bool) {
        self.num_questions = if enabled { Self::DEFAULT_NUM_QUESTIONS } else { 0 };
    }

    pub fn toggle_num_options(&mut self, enabled: bool) {
        self.num_options = if enabled { Self::DEFAULT_NUM_OPTIONS } else { 0 };
    }

    pub fn questions_enabled(&self) -> bool {
        self.num_questions > 0
    }

    pub fn options_enabled(&self) -> bool {
        self.num_options > 0
    }
}

impl Default for FlashcardOptions {
    fn default() -> Self {
        Self {
            difficulty: Difficulty::Medium,
            num_questions: Self::DEFAULT_NUM_QUESTIONS,
            num_options: Self::DEFAULT_NUM_OPTIONS,
        }
    }
}

/// Which artifacts the user asked for when creating the session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    #[serde(default)]
    pub generate_summary: bool,
    #[serde(default)]
    pub generate_flashcards: bool,
    #[serde(default)]
    pub generate_study_guide: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flashcard_options: Option<FlashcardOptions>,
}

impl Preferences {
    /// At least one generation flag must stay enabled.
    pub fn validate(&self) -> Result<(), String> {
        if self.generate_summary || self.generate_flashcards || self.generate_study_guide {
            Ok(())
        } else {
            Err("At least one study tool must be selected.".to_string())
        }
    }

    pub fn wants(&self, artifact: Artifact) -> bool {
        match artifact {
            Artifact::Summary => self.generate_summary,
            Artifact::Flashcards => self.generate_flashcards,
            Artifact::StudyGuide => self.generate_study_guide,
        }
    }

    pub fn requested_artifacts(&self) -> Vec<Artifact> {
        Artifact::ALL
            .into_iter()
            .filter(|artifact| self.wants(*artifact))
            .collect()
    }
}

//=========================================================================================
// Artifacts
//=========================================================================================

/// One question/answer card. `options` is only populated for quiz-style cards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flashcard {
    pub question: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    pub answer: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Artifact {
    Summary,
    Flashcards,
    StudyGuide,
}

impl Artifact {
    pub const ALL: [Artifact; 3] = [Artifact::Summary, Artifact::Flashcards, Artifact::StudyGuide];

    pub fn label(self) -> &'static str {
        match self {
            Artifact::Summary => "Summary",
            Artifact::Flashcards => "Flashcards",
            Artifact::StudyGuide => "Study Guide",
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The value produced by one successful generation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "artifact", content = "value", rename_all = "camelCase")]
pub enum ArtifactUpdate {
    Summary(String),
    Flashcards(Vec<Flashcard>),
    StudyGuide(String),
}

impl ArtifactUpdate {
    pub fn artifact(&self) -> Artifact {
        match self {
            ArtifactUpdate::Summary(_) => Artifact::Summary,
            ArtifactUpdate::Flashcards(_) => Artifact::Flashcards,
            ArtifactUpdate::StudyGuide(_) => Artifact::StudyGuide,
        }
    }

    /// Writes the generated value into the matching field of the session view.
    pub fn apply_to(&self, session: &mut Session) {
        match self {
            ArtifactUpdate::Summary(text) => session.summary = Some(text.clone()),
            ArtifactUpdate::Flashcards(cards) => session.flashcards = cards.clone(),
            ArtifactUpdate::StudyGuide(text) => session.study_guide = Some(text.clone()),
        }
    }
}

/// Renders the topic list returned by the backend into the study-guide fragment
/// displayed by the client.
pub fn render_study_guide(topics: &[String]) -> String {
    if topics.is_empty() {
        return "<p>No topics found for study guide.</p>".to_string();
    }
    let items: String = topics
        .iter()
        .map(|topic| format!("<li>{}</li>", capitalize(topic.trim())))
        .collect();
    format!(
        concat!(
            "<div><h2>Study Guide Topics</h2>",
            "<p>Studying the following topics should get you going:</p>",
            "<ul>{}</ul></div>",
        ),
        items
    )
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

//=========================================================================================
// Chat Messages
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

/// One entry of a session's chat transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Some(Utc::now()),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }

    /// The transient placeholder shown while an assistant reply is pending.
    pub fn typing() -> Self {
        Self::new(ChatRole::Assistant, TYPING_SENTINEL)
    }

    pub fn is_typing_placeholder(&self) -> bool {
        self.role == ChatRole::Assistant && self.content == TYPING_SENTINEL
    }
}

//=========================================================================================
// Files & Sessions
//=========================================================================================

/// Describes one uploaded document. Immutable once the session is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    pub file_name: String,
    pub storage_url: String,
    pub mime_type: String,
    pub size: u64,
}

/// One document-study unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub files: Vec<FileDescriptor>,
    pub preferences: Preferences,
    pub status: SessionStatus,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub flashcards: Vec<Flashcard>,
    #[serde(default)]
    pub study_guide: Option<String>,
    #[serde(default)]
    pub chat_history: Vec<ChatMessage>,
    #[serde(default)]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
}

impl Session {
    /// The initial record written at creation time, before any processing.
    pub fn new_pending(
        id: Uuid,
        user_id: Uuid,
        files: Vec<FileDescriptor>,
        preferences: Preferences,
    ) -> Self {
        Self {
            id,
            user_id,
            title: None,
            files,
            preferences,
            status: SessionStatus::Pending,
            summary: None,
            flashcards: Vec::new(),
            study_guide: None,
            chat_history: Vec::new(),
            error_message: None,
            created_at: Utc::now(),
            processed_at: None,
        }
    }

    pub fn has_artifact(&self, artifact: Artifact) -> bool {
        match artifact {
            Artifact::Summary => self.summary.as_deref().is_some_and(|s| !s.trim().is_empty()),
            Artifact::Flashcards => !self.flashcards.is_empty(),
            Artifact::StudyGuide => self
                .study_guide
                .as_deref()
                .is_some_and(|s| !s.trim().is_empty()),
        }
    }

    /// Artifacts the user asked for that have not been generated yet.
    pub fn missing_artifacts(&self) -> Vec<Artifact> {
        self.preferences
            .requested_artifacts()
            .into_iter()
            .filter(|artifact| !self.has_artifact(*artifact))
            .collect()
    }

    pub fn display_name(&self) -> String {
        match self.title.as_deref().map(str::trim) {
            Some(title) if !title.is_empty() => title.to_string(),
            _ => self.id.to_string(),
        }
    }

    pub fn categories(&self) -> Vec<Category> {
        let mut categories: Vec<Category> = self
            .preferences
            .requested_artifacts()
            .into_iter()
            .map(Category::from)
            .collect();
        match self.status {
            SessionStatus::Success => categories.push(Category::Processed),
            SessionStatus::Pending | SessionStatus::Processing => {
                categories.push(Category::Pending)
            }
            SessionStatus::Failed | SessionStatus::CompletedWithErrors => {
                categories.push(Category::Error)
            }
        }
        categories
    }
}

//=========================================================================================
// Dashboard Listing
//=========================================================================================

/// Tags shown next to a session in the dashboard listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    Summary,
    Flashcards,
    #[serde(rename = "Study Guide")]
    StudyGuide,
    Processed,
    Pending,
    Error,
}

impl From<Artifact> for Category {
    fn from(artifact: Artifact) -> Self {
        match artifact {
            Artifact::Summary => Category::Summary,
            Artifact::Flashcards => Category::Flashcards,
            Artifact::StudyGuide => Category::StudyGuide,
        }
    }
}

/// A compact row of the dashboard listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionListItem {
    pub id: Uuid,
    pub name: String,
    pub date: String,
    pub categories: Vec<Category>,
    pub status: SessionStatus,
}

impl From<&Session> for SessionListItem {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id,
            name: session.display_name(),
            date: session.created_at.format("%Y-%m-%d").to_string(),
            categories: session.categories(),
            status: session.status,
        }
    }
}

/// Keeps the listing rows whose name contains `query`, ignoring case.
/// An empty query keeps everything.
pub fn filter_listing(items: Vec<SessionListItem>, query: &str) -> Vec<SessionListItem> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return items;
    }
    items
        .into_iter()
        .filter(|item| item.name.to_lowercase().contains(&needle))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary_only() -> Preferences {
        Preferences {
            generate_summary: true,
            ..Preferences::default()
        }
    }

    #[test]
    fn legacy_completed_status_reads_as_ready() {
        let status: SessionStatus = serde_json::from_str("\"completed\"").unwrap();
        assert_eq!(status, SessionStatus::Success);
        assert!(status.is_ready());
        assert_eq!("completed".parse::<SessionStatus>().unwrap(), SessionStatus::Success);
        assert_eq!(SessionStatus::CompletedWithErrors.to_string(), "completed_with_errors");
    }

    #[test]
    fn status_only_moves_forward_except_retries() {
        assert!(SessionStatus::Pending.can_advance_to(SessionStatus::Processing));
        assert!(SessionStatus::Processing.can_advance_to(SessionStatus::Failed));
        assert!(!SessionStatus::Processing.can_advance_to(SessionStatus::Pending));
        assert!(SessionStatus::Failed.can_advance_to(SessionStatus::Processing));
        assert!(!SessionStatus::Success.can_advance_to(SessionStatus::Failed));
    }

    #[test]
    fn preferences_require_one_tool() {
        assert!(Preferences::default().validate().is_err());
        assert!(summary_only().validate().is_ok());
    }

    #[test]
    fn flashcard_toggles_use_canonical_counts() {
        let mut options = FlashcardOptions::default();
        options.toggle_num_questions(false);
        options.toggle_num_options(false);
        assert!(!options.questions_enabled());
        assert!(!options.options_enabled());
        options.toggle_num_questions(true);
        assert_eq!(options.num_questions, 5);
        options.toggle_num_options(true);
        assert_eq!(options.num_options, 4);
    }

    #[test]
    fn missing_artifacts_ignores_unrequested_and_filled_fields() {
        let mut session = Session::new_pending(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Vec::new(),
            Preferences {
                generate_summary: true,
                generate_study_guide: true,
                ..Preferences::default()
            },
        );
        assert_eq!(
            session.missing_artifacts(),
            vec![Artifact::Summary, Artifact::StudyGuide]
        );
        ArtifactUpdate::Summary("short".into()).apply_to(&mut session);
        session.study_guide = Some("   ".into());
        assert_eq!(session.missing_artifacts(), vec![Artifact::StudyGuide]);
    }

    #[test]
    fn session_reads_stored_row_shape() {
        let raw = serde_json::json!({
            "id": "6f1c7a52-8f3e-4a53-9d65-3f0d3d4f2b11",
            "user_id": "0b8f5a0e-4d7c-4a4b-9a51-8e1d2a7c6b33",
            "files": [{
                "fileName": "a.pdf",
                "storageUrl": "uploads/a.pdf",
                "mimeType": "application/pdf",
                "size": 10
            }],
            "preferences": {
                "generateSummary": true,
                "generateFlashcards": false,
                "generateStudyGuide": false
            },
            "status": "processing",
            "summary": null,
            "chat_history": [
                {"role": "user", "content": "hi", "timestamp": "2024-05-01T10:00:00.000Z"}
            ],
            "created_at": "2024-05-01T09:59:00Z"
        });
        let session: Session = serde_json::from_value(raw).unwrap();
        assert_eq!(session.status, SessionStatus::Processing);
        assert_eq!(session.files[0].file_name, "a.pdf");
        assert!(session.flashcards.is_empty());
        assert_eq!(session.chat_history.len(), 1);
    }

    #[test]
    fn listing_categories_and_search() {
        let mut session =
            Session::new_pending(Uuid::new_v4(), Uuid::new_v4(), Vec::new(), summary_only());
        session.title = Some("Organic Chemistry".into());
        session.status = SessionStatus::CompletedWithErrors;
        let item = SessionListItem::from(&session);
        assert_eq!(item.categories, vec![Category::Summary, Category::Error]);

        let untitled =
            Session::new_pending(Uuid::new_v4(), Uuid::new_v4(), Vec::new(), summary_only());
        let rows = vec![item, SessionListItem::from(&untitled)];
        let found = filter_listing(rows.clone(), "chem");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Organic Chemistry");
        assert_eq!(filter_listing(rows, "  ").len(), 2);
    }

    #[test]
    fn study_guide_lists_capitalized_topics() {
        let html = render_study_guide(&["cell biology".into(), "mitosis".into()]);
        assert!(html.contains("<li>Cell biology</li>"));
        assert!(html.contains("<li>Mitosis</li>"));
        assert_eq!(render_study_guide(&[]), "<p>No topics found for study guide.</p>");
    }

    #[test]
    fn typing_placeholder_is_recognised() {
        assert!(ChatMessage::typing().is_typing_placeholder());
        assert!(!ChatMessage::user(TYPING_SENTINEL).is_typing_placeholder());
    }
}
