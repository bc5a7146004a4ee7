//! crates/study_session_core/src/chat_store.rs
//!
//! The in-memory chat state of the open session: the transcript, the text being
//! composed and the in-flight guard. Every transcript mutation is mirrored into
//! the [`LocalChatCache`] right away, independent of any remote round-trip.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;
use uuid::Uuid;

use crate::chat_cache::LocalChatCache;
use crate::domain::ChatMessage;
use crate::error::SyncError;
use crate::ports::ChangeCallback;

#[derive(Default)]
struct ChatState {
    session_id: Option<Uuid>,
    messages: Vec<ChatMessage>,
    composing_input: String,
    in_flight: bool,
}

pub struct ChatSessionStore {
    cache: LocalChatCache,
    state: Mutex<ChatState>,
    listener: Mutex<Option<ChangeCallback>>,
}

impl ChatSessionStore {
    pub fn new(cache: LocalChatCache) -> Self {
        Self {
            cache,
            state: Mutex::new(ChatState::default()),
            listener: Mutex::new(None),
        }
    }

    /// Registers the callback run after every transcript mutation.
    pub fn set_listener(&self, listener: ChangeCallback) {
        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    fn state(&self) -> MutexGuard<'_, ChatState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(listener) = listener {
            listener();
        }
    }

    /// Binds the store to `session_id` and hydrates the transcript.
    ///
    /// A non-empty local cache wins and `remote_history` is ignored. Otherwise a
    /// non-empty remote transcript is adopted and written into the cache.
    /// Histories written from another device are not merged by timestamp.
    pub fn initialize(&self, session_id: Uuid, remote_history: &[ChatMessage]) {
        let cached = self.cache.load(session_id);
        {
            let mut state = self.state();
            state.session_id = Some(session_id);
            if !cached.is_empty() {
                debug!(
                    "Chat for session {} hydrated from local cache ({} messages).",
                    session_id,
                    cached.len()
                );
                state.messages = cached;
            } else if !remote_history.is_empty() {
                debug!("Chat for session {} bootstrapped from remote history.", session_id);
                state.messages = remote_history.to_vec();
                self.cache.save(session_id, &state.messages);
            } else {
                state.messages = Vec::new();
            }
        }
        self.notify();
    }

    /// Adopts a re-fetched remote transcript only when nothing is held locally,
    /// the same precedence `initialize` applies. Returns whether it was adopted.
    pub fn merge_remote(&self, remote_history: &[ChatMessage]) -> bool {
        let adopted = {
            let mut state = self.state();
            match state.session_id {
                Some(session_id) if state.messages.is_empty() && !remote_history.is_empty() => {
                    state.messages = remote_history.to_vec();
                    self.cache.save(session_id, &state.messages);
                    true
                }
                _ => false,
            }
        };
        if adopted {
            self.notify();
        }
        adopted
    }

    /// Appends to the transcript and persists the full result. No reordering, no dedup.
    pub fn append(&self, message: ChatMessage) {
        {
            let mut state = self.state();
            state.messages.push(message);
            if let Some(session_id) = state.session_id {
                self.cache.save(session_id, &state.messages);
            }
        }
        self.notify();
    }

    /// Drops the last message when it is the typing placeholder. Idempotent.
    pub fn remove_trailing_placeholder(&self) -> bool {
        let removed = {
            let mut state = self.state();
            if state.messages.last().is_some_and(ChatMessage::is_typing_placeholder) {
                state.messages.pop();
                true
            } else {
                false
            }
        };
        if removed {
            self.notify();
        }
        removed
    }

    pub fn set_in_flight(&self, in_flight: bool) {
        self.state().in_flight = in_flight;
    }

    pub fn in_flight(&self) -> bool {
        self.state().in_flight
    }

    /// Claims the in-flight flag, or reports that another request holds it.
    /// The flag is released when the returned guard is dropped.
    pub fn try_begin_request(self: &Arc<Self>) -> Result<InFlightGuard, SyncError> {
        let mut state = self.state();
        if state.in_flight {
            return Err(SyncError::AlreadyInFlight);
        }
        state.in_flight = true;
        Ok(InFlightGuard {
            store: Arc::clone(self),
        })
    }

    /// Clears the in-memory transcript and its cache entry.
    pub fn reset(&self) {
        {
            let mut state = self.state();
            state.messages.clear();
            state.composing_input.clear();
            if let Some(session_id) = state.session_id {
                self.cache.clear(session_id);
            }
        }
        self.notify();
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.state().session_id
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.state().messages.clone()
    }

    pub fn len(&self) -> usize {
        self.state().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().messages.is_empty()
    }

    pub fn composing_input(&self) -> String {
        self.state().composing_input.clone()
    }

    pub fn set_composing_input(&self, input: impl Into<String>) {
        self.state().composing_input = input.into();
    }

    pub fn clear_composing_input(&self) {
        self.state().composing_input.clear();
    }
}

/// Holds the in-flight flag of a [`ChatSessionStore`] until dropped.
pub struct InFlightGuard {
    store: Arc<ChatSessionStore>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.store.set_in_flight(false);
    }
}
