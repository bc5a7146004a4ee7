//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between the browser client and the API server
//! for an open study session.

use serde::{Deserialize, Serialize};
use study_session_core::domain::{Artifact, ChatMessage, FlashcardOptions, Session};
use study_session_core::QuickAction;
use uuid::Uuid;

//=========================================================================================
// Messages Sent FROM the Client (Browser) TO the Server
//=========================================================================================

/// Represents the structured text messages a client can send to the server.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Opens a session. This must be the first message sent on the connection.
    Init { session_id: Uuid },

    /// A free-form chat message for the document chatbot.
    SendMessage { text: String },

    /// Requests one artifact on demand.
    Generate { artifact: Artifact },

    /// A canned chat request (`research` or `explain`).
    QuickAction { action: QuickAction },

    /// Replaces the flashcard options used by later flashcard generations.
    UpdateFlashcardOptions { options: FlashcardOptions },

    /// Clears the chat transcript and its local copy.
    ClearChat,
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client (Browser)
//=========================================================================================

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms successful session initialization.
    SessionInitialized { session_id: Uuid },

    /// The current view of the session record.
    Session { session: Box<Session> },

    /// The full chat transcript, typing placeholder included.
    Transcript {
        messages: Vec<ChatMessage>,
        in_flight: bool,
    },

    /// A short notification the client shows as a toast.
    Notice { message: String },

    /// Reports an error to the client, which should display an error message.
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    pub fn notice(message: impl Into<String>) -> Self {
        ServerMessage::Notice {
            message: message.into(),
        }
    }
}
