//! crates/study_session_core/src/chat_cache.rs
//!
//! The local, per-session mirror of the chat transcript. It is best effort: a
//! missing or unreadable entry is a cache miss, and write failures are only logged.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::warn;
use uuid::Uuid;

use crate::domain::ChatMessage;
use crate::error::SyncError;
use crate::ports::{KeyValueStore, PortResult};

/// Storage key holding the transcript of `session_id`.
pub fn cache_key(session_id: Uuid) -> String {
    format!("chat_history_{}", session_id)
}

/// JSON-encoded chat transcripts stored in a [`KeyValueStore`], one entry per session.
#[derive(Clone)]
pub struct LocalChatCache {
    store: Arc<dyn KeyValueStore>,
}

impl LocalChatCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Returns the cached transcript, or an empty one when the entry is absent or corrupt.
    pub fn load(&self, session_id: Uuid) -> Vec<ChatMessage> {
        match self.try_load(session_id) {
            Ok(messages) => messages,
            Err(e) => {
                warn!("Treating chat cache for session {} as a miss: {}", session_id, e);
                Vec::new()
            }
        }
    }

    fn try_load(&self, session_id: Uuid) -> Result<Vec<ChatMessage>, SyncError> {
        let raw = self
            .store
            .get(&cache_key(session_id))
            .map_err(|e| SyncError::CacheCorrupt(e.to_string()))?;
        match raw {
            Some(raw) => {
                serde_json::from_str(&raw).map_err(|e| SyncError::CacheCorrupt(e.to_string()))
            }
            None => Ok(Vec::new()),
        }
    }

    /// Overwrites the cached transcript. Typing placeholders are never persisted.
    pub fn save(&self, session_id: Uuid, messages: &[ChatMessage]) {
        let persisted: Vec<&ChatMessage> = messages
            .iter()
            .filter(|m| !m.is_typing_placeholder())
            .collect();
        let encoded = match serde_json::to_string(&persisted) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("Failed to encode chat history for session {}: {}", session_id, e);
                return;
            }
        };
        if let Err(e) = self.store.set(&cache_key(session_id), &encoded) {
            warn!("Failed to save chat history for session {}: {}", session_id, e);
        }
    }

    pub fn clear(&self, session_id: Uuid) {
        if let Err(e) = self.store.remove(&cache_key(session_id)) {
            warn!("Failed to clear chat history for session {}: {}", session_id, e);
        }
    }
}

/// An in-process [`KeyValueStore`]. Contents live as long as the store.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> PortResult<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> PortResult<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> PortResult<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::PortError;

    fn cache() -> (Arc<MemoryStore>, LocalChatCache) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), LocalChatCache::new(store))
    }

    #[test]
    fn save_then_load_returns_same_transcript() {
        let (_, cache) = cache();
        let id = Uuid::new_v4();
        let messages = vec![
            ChatMessage::user("What is osmosis?"),
            ChatMessage::assistant("Diffusion of water."),
        ];
        cache.save(id, &messages);
        assert_eq!(cache.load(id), messages);
        assert!(cache.load(Uuid::new_v4()).is_empty());
    }

    #[test]
    fn corrupt_entry_is_a_miss() {
        let (store, cache) = cache();
        let id = Uuid::new_v4();
        store.set(&cache_key(id), "{not json").unwrap();
        assert!(cache.load(id).is_empty());
    }

    #[test]
    fn typing_placeholder_is_not_persisted() {
        let (store, cache) = cache();
        let id = Uuid::new_v4();
        cache.save(id, &[ChatMessage::user("Explain"), ChatMessage::typing()]);
        let raw = store.get(&cache_key(id)).unwrap().unwrap();
        assert!(!raw.contains("__typing__"));
        assert_eq!(cache.load(id).len(), 1);
    }

    #[test]
    fn clear_removes_entry() {
        let (store, cache) = cache();
        let id = Uuid::new_v4();
        cache.save(id, &[ChatMessage::user("hi")]);
        cache.clear(id);
        assert_eq!(store.get(&cache_key(id)).unwrap(), None);
    }

    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> PortResult<Option<String>> {
            Err(PortError::Unexpected("storage unavailable".into()))
        }
        fn set(&self, _key: &str, _value: &str) -> PortResult<()> {
            Err(PortError::Unexpected("quota exceeded".into()))
        }
        fn remove(&self, _key: &str) -> PortResult<()> {
            Err(PortError::Unexpected("storage unavailable".into()))
        }
    }

    #[test]
    fn storage_failures_fail_soft() {
        let cache = LocalChatCache::new(Arc::new(BrokenStore));
        let id = Uuid::new_v4();
        cache.save(id, &[ChatMessage::user("hi")]);
        cache.clear(id);
        assert!(cache.load(id).is_empty());
    }
}
