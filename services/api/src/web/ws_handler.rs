//! services/api/src/web/ws_handler.rs
//!
//! This is the main entry point and control loop for a WebSocket connection.
//! One connection follows one study session: it forwards the session's change
//! events to the client and runs the client's generation and chat requests.

use crate::web::{
    protocol::{ClientMessage, ServerMessage},
    state::AppState,
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    Extension,
};
use futures::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use std::sync::Arc;
use study_session_core::ports::AuthUser;
use study_session_core::{SessionEvent, StudySession};
use tokio::sync::{broadcast, Mutex};
use tracing::{error, info, warn};

type WsSender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, user))
}

/// Serializes and sends one message. Returns `false` once the client is gone.
async fn send(ws_sender: &WsSender, msg: &ServerMessage) -> bool {
    let json = match serde_json::to_string(msg) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to encode server message: {}", e);
            return true;
        }
    };
    ws_sender.lock().await.send(Message::Text(json.into())).await.is_ok()
}

async fn send_session(ws_sender: &WsSender, session: &StudySession) -> bool {
    match session.snapshot() {
        Some(snapshot) => {
            send(ws_sender, &ServerMessage::Session { session: Box::new(snapshot) }).await
        }
        None => true,
    }
}

async fn send_transcript(ws_sender: &WsSender, session: &StudySession) -> bool {
    let msg = ServerMessage::Transcript {
        messages: session.messages(),
        in_flight: session.is_busy(),
    };
    send(ws_sender, &msg).await
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>, user: AuthUser) {
    info!("New WebSocket connection established for user: {}", user.user_id);

    // The sender is wrapped in an Arc<Mutex<>> to allow for shared mutable access across tasks.
    let (sender, mut receiver) = socket.split();
    let ws_sender: WsSender = Arc::new(Mutex::new(sender));

    // --- 1. Initialization Phase ---
    let session_id = match receiver.next().await {
        Some(Ok(Message::Text(init_json))) => {
            match serde_json::from_str::<ClientMessage>(&init_json) {
                Ok(ClientMessage::Init { session_id }) => session_id,
                _ => {
                    error!("First message was not a valid Init message.");
                    let reply = ServerMessage::error("The first message must be init.");
                    send(&ws_sender, &reply).await;
                    return;
                }
            }
        }
        _ => {
            error!("Client disconnected before sending Init message.");
            return;
        }
    };

    info!("Initializing session with ID: {}", session_id);
    let session = match app_state.sessions.attach(session_id).await {
        Ok(session) => session,
        Err(e) => {
            error!("Failed to open session {}: {}", session_id, e);
            send(&ws_sender, &ServerMessage::error(e.user_notice())).await;
            return;
        }
    };
    let events = session.subscribe_events();

    let ready = send(&ws_sender, &ServerMessage::SessionInitialized { session_id }).await
        && send_session(&ws_sender, &session).await
        && send_transcript(&ws_sender, &session).await;

    if ready {
        // --- 2. Event Forwarding and Main Message Loop ---
        let forwarder = tokio::spawn(forward_events(session.clone(), events, ws_sender.clone()));

        while let Some(received) = receiver.next().await {
            match received {
                Ok(Message::Text(text)) => {
                    // Each request runs on its own task so the loop keeps reading; a
                    // second request while one is running is refused, not queued.
                    let text = text.as_str().to_owned();
                    let session = session.clone();
                    let ws_sender = ws_sender.clone();
                    tokio::spawn(async move {
                        if let Some(reply) = run_request(text, session).await {
                            send(&ws_sender, &reply).await;
                        }
                    });
                }
                Ok(Message::Close(_)) => {
                    info!("Client sent close message.");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("WebSocket receive failed: {}", e);
                    break;
                }
            }
        }
        forwarder.abort();
    }

    // --- 3. Cleanup ---
    app_state.sessions.release(session_id).await;
    info!("WebSocket connection for session {} closed.", session_id);
}

/// Pushes the session view and transcript to the client whenever they change.
async fn forward_events(
    session: Arc<StudySession>,
    mut events: broadcast::Receiver<SessionEvent>,
    ws_sender: WsSender,
) {
    loop {
        let delivered = match events.recv().await {
            Ok(SessionEvent::SessionChanged) => send_session(&ws_sender, &session).await,
            Ok(SessionEvent::TranscriptChanged) => send_transcript(&ws_sender, &session).await,
            Ok(SessionEvent::Removed) => {
                send(&ws_sender, &ServerMessage::notice("This session was deleted.")).await
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(
                    "Event forwarder for session {} skipped {} events.",
                    session.id(),
                    skipped
                );
                send_session(&ws_sender, &session).await
                    && send_transcript(&ws_sender, &session).await
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        if !delivered {
            break;
        }
    }
}

/// Runs one client request and returns the reply to send, if any.
async fn run_request(text: String, session: Arc<StudySession>) -> Option<ServerMessage> {
    let client_msg = match serde_json::from_str::<ClientMessage>(&text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!("Failed to deserialize client message: {}", e);
            return Some(ServerMessage::error("Unrecognized message."));
        }
    };

    let outcome = match client_msg {
        ClientMessage::SendMessage { text } => session.send_message(&text).await.map(|_| None),
        ClientMessage::Generate { artifact } => session
            .generate(artifact)
            .await
            .map(|_| Some(format!("{} generated successfully.", artifact))),
        ClientMessage::QuickAction { action } => session.quick_action(action).await.map(|_| None),
        ClientMessage::UpdateFlashcardOptions { options } => {
            session.set_flashcard_options(options);
            Ok(None)
        }
        ClientMessage::ClearChat => {
            session.reset_chat();
            Ok(Some("Chat cleared.".to_string()))
        }
        ClientMessage::Init { .. } => {
            warn!("Received subsequent Init message, which is ignored.");
            Ok(None)
        }
    };

    match outcome {
        Ok(notice) => notice.map(ServerMessage::notice),
        Err(e) => {
            warn!("Request on session {} failed: {}", session.id(), e);
            Some(ServerMessage::error(e.user_notice()))
        }
    }
}
