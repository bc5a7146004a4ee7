//! crates/study_session_core/src/error.rs
//!
//! The typed outcomes every synchronization operation resolves to.

use crate::domain::SessionStatus;
use crate::ports::PortError;

/// Fallback text used when a remote failure carries no message of its own.
pub const GENERIC_FAILURE: &str = "Unknown error";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// No signed-in user or token. Raised before any network I/O.
    #[error("User not authenticated.")]
    NotAuthenticated,

    /// The session has not reached the ready state yet.
    #[error("Session is {status}, document processing has not finished.")]
    NotReady { status: SessionStatus },

    /// Another generation or chat request for this session is still running.
    #[error("A request is already running.")]
    AlreadyInFlight,

    /// The repository or the backend failed. The message is shown to the user.
    #[error("{0}")]
    RemoteFailure(String),

    /// Local chat storage was unreadable. Handled inside the cache, never surfaced.
    #[error("Chat cache unreadable: {0}")]
    CacheCorrupt(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidInput(String),
}

impl SyncError {
    /// Maps a port failure, keeping the backend's own message when it supplied one
    /// and falling back to `fallback` otherwise.
    pub fn remote(err: PortError, fallback: &str) -> Self {
        match err {
            PortError::NotFound(what) => SyncError::NotFound(what),
            PortError::Unauthorized => SyncError::NotAuthenticated,
            PortError::Backend {
                message: Some(message),
                ..
            } if !message.trim().is_empty() => SyncError::RemoteFailure(message),
            PortError::Backend { .. } => SyncError::RemoteFailure(fallback.to_string()),
            PortError::Unexpected(message) => SyncError::RemoteFailure(message),
        }
    }

    /// Text for the toast-equivalent notification shown by the client.
    pub fn user_notice(&self) -> String {
        match self {
            SyncError::NotAuthenticated => "User not authenticated.".to_string(),
            SyncError::NotReady { .. } => {
                "Please wait for document processing to finish.".to_string()
            }
            SyncError::AlreadyInFlight => "A request is already running.".to_string(),
            SyncError::RemoteFailure(message) | SyncError::InvalidInput(message) => message.clone(),
            SyncError::NotFound(_) => "Session not found.".to_string(),
            SyncError::CacheCorrupt(_) => String::new(),
        }
    }

    /// Whether waiting (or retrying right away) can make the same call succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::NotReady { .. } | SyncError::AlreadyInFlight | SyncError::RemoteFailure(_)
        )
    }
}

impl From<PortError> for SyncError {
    fn from(err: PortError) -> Self {
        SyncError::remote(err, GENERIC_FAILURE)
    }
}
