pub mod chat_cache;
pub mod chat_store;
pub mod domain;
pub mod error;
pub mod feed;
pub mod orchestrator;
pub mod ports;
pub mod repository;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use chat_cache::{LocalChatCache, MemoryStore};
pub use chat_store::{ChatSessionStore, InFlightGuard};
pub use domain::{
    Artifact, ArtifactUpdate, Category, ChatMessage, ChatRole, Difficulty, FileDescriptor,
    Flashcard, FlashcardOptions, Preferences, Session, SessionListItem, SessionStatus,
};
pub use error::SyncError;
pub use feed::FeedWatcher;
pub use orchestrator::{GenerationOrchestrator, PromptMode, QuickAction, SweepReport};
pub use ports::{
    AuthProvider, AuthUser, ChangeCallback, ChangeFeed, DatabaseService, FeedKey,
    FileStorageService, KeyValueStore, PortError, PortResult, StudyBackendService, Subscription,
    SubscriptionStatus, UploadedFile,
};
pub use repository::SessionRepository;
pub use session::{SessionEvent, StudySession};
