//! services/api/src/web/state.rs
//!
//! Defines the application's shared state and the registry of open study sessions.

use crate::adapters::SessionAuth;
use crate::config::Config;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use study_session_core::ports::{AuthUser, ChangeCallback, ChangeFeed, FeedKey};
use study_session_core::{FeedWatcher, LocalChatCache, SessionRepository, StudySession, SyncError};
use tokio::sync::{Mutex, OnceCell};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
pub struct AppState {
    pub config: Arc<Config>,
    pub auth: Arc<SessionAuth>,
    pub repository: Arc<SessionRepository>,
    pub sessions: SessionRegistry,
    feed: Arc<dyn ChangeFeed>,
    listing_watch: Mutex<FeedWatcher>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        auth: Arc<SessionAuth>,
        repository: Arc<SessionRepository>,
        cache: LocalChatCache,
        feed: Arc<dyn ChangeFeed>,
    ) -> Self {
        Self {
            config,
            auth,
            sessions: SessionRegistry::new(repository.clone(), cache, feed.clone()),
            repository,
            listing_watch: Mutex::new(FeedWatcher::new(feed.clone())),
            feed,
        }
    }

    pub fn feed(&self) -> Arc<dyn ChangeFeed> {
        self.feed.clone()
    }

    /// Signs `user` in and keeps their dashboard listing fresh from the change feed.
    pub async fn sign_in(&self, user: AuthUser) -> Result<(), SyncError> {
        let previous = self.auth.sign_out();
        if previous.as_ref().is_some_and(|p| p.user_id != user.user_id) {
            self.sessions.clear().await;
        }
        let user_id = user.user_id;
        self.auth.sign_in(user);
        self.repository.invalidate_listing();
        self.watch_listing(user_id).await
    }

    pub async fn sign_out(&self) -> Option<AuthUser> {
        self.listing_watch.lock().await.unwatch();
        self.sessions.clear().await;
        self.repository.invalidate_listing();
        self.auth.sign_out()
    }

    /// Subscribes to every mutation on `user_id`'s sessions and drops the cached
    /// listing whenever one arrives.
    pub async fn watch_listing(&self, user_id: Uuid) -> Result<(), SyncError> {
        let repository = Arc::downgrade(&self.repository);
        let on_change: ChangeCallback = Arc::new(move || {
            if let Some(repository) = repository.upgrade() {
                repository.invalidate_listing();
            }
        });
        self.listing_watch
            .lock()
            .await
            .watch(FeedKey::User(user_id), on_change)
            .await
    }
}

//=========================================================================================
// SessionRegistry (One StudySession per Open Id)
//=========================================================================================

/// How long a session nobody is attached to stays registered after its last use.
pub const IDLE_TTL: Duration = Duration::from_secs(10 * 60);

/// How often the background sweep looks for idle entries.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct OpenedSession {
    session: Arc<StudySession>,
    // Held for its drop: releasing the entry tears the subscription down.
    _watcher: FeedWatcher,
}

struct RegistryEntry {
    opened: Arc<OnceCell<OpenedSession>>,
    consumers: usize,
    last_used: Instant,
}

impl RegistryEntry {
    fn new() -> Self {
        Self {
            opened: Arc::new(OnceCell::new()),
            consumers: 0,
            last_used: Instant::now(),
        }
    }
}

/// Keeps one live [`StudySession`] per opened id, each refreshed by its own
/// change-feed subscription.
///
/// The entry for an id is inserted before the session is opened, so concurrent
/// openers share one `StudySession` and its first sweep runs once. WebSocket
/// connections `attach` and `release`; the entry goes away when the last one
/// leaves. Entries without consumers are evicted once idle for `idle_ttl`.
pub struct SessionRegistry {
    repository: Arc<SessionRepository>,
    cache: LocalChatCache,
    feed: Arc<dyn ChangeFeed>,
    idle_ttl: Duration,
    entries: Mutex<HashMap<Uuid, RegistryEntry>>,
}

impl SessionRegistry {
    pub fn new(
        repository: Arc<SessionRepository>,
        cache: LocalChatCache,
        feed: Arc<dyn ChangeFeed>,
    ) -> Self {
        Self::with_idle_ttl(repository, cache, feed, IDLE_TTL)
    }

    pub fn with_idle_ttl(
        repository: Arc<SessionRepository>,
        cache: LocalChatCache,
        feed: Arc<dyn ChangeFeed>,
        idle_ttl: Duration,
    ) -> Self {
        Self {
            repository,
            cache,
            feed,
            idle_ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the live session for `session_id`, opening it on first use.
    pub async fn open(&self, session_id: Uuid) -> Result<Arc<StudySession>, SyncError> {
        let cell = {
            let mut entries = self.entries.lock().await;
            let entry = entries.entry(session_id).or_insert_with(RegistryEntry::new);
            entry.last_used = Instant::now();
            entry.opened.clone()
        };

        // Opening runs the first sweep, so it happens outside the registry lock.
        // Every other opener of the same id waits on this cell.
        match cell.get_or_try_init(|| self.open_fresh(session_id)).await {
            Ok(opened) => Ok(opened.session.clone()),
            Err(e) => {
                let mut entries = self.entries.lock().await;
                // Leave the slot to any opener still waiting on it.
                let abandoned = entries.get(&session_id).is_some_and(|entry| {
                    Arc::ptr_eq(&entry.opened, &cell) && Arc::strong_count(&cell) == 2
                });
                if abandoned {
                    entries.remove(&session_id);
                }
                Err(e)
            }
        }
    }

    async fn open_fresh(&self, session_id: Uuid) -> Result<OpenedSession, SyncError> {
        let session = Arc::new(StudySession::new(
            session_id,
            self.repository.clone(),
            self.cache.clone(),
        ));
        session.open().await?;
        let mut watcher = FeedWatcher::new(self.feed.clone());
        watcher
            .watch(FeedKey::Session(session_id), refresh_on_change(&session))
            .await?;
        info!("Registered session {}.", session_id);
        Ok(OpenedSession {
            session,
            _watcher: watcher,
        })
    }

    /// Opens the session and counts the caller as a consumer.
    pub async fn attach(&self, session_id: Uuid) -> Result<Arc<StudySession>, SyncError> {
        let session = self.open(session_id).await?;
        let mut entries = self.entries.lock().await;
        match entries.get_mut(&session_id) {
            Some(entry) => {
                entry.consumers += 1;
                entry.last_used = Instant::now();
            }
            None => {
                // Forgotten between open and attach; the caller keeps its handle alone.
                warn!("Session {} was removed while attaching.", session_id);
            }
        }
        Ok(session)
    }

    /// Drops one consumer; the last one out releases the entry.
    pub async fn release(&self, session_id: Uuid) {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(&session_id) else {
            return;
        };
        entry.consumers = entry.consumers.saturating_sub(1);
        if entry.consumers == 0 {
            entries.remove(&session_id);
            debug!("Released session {}.", session_id);
        }
    }

    /// Removes the entry regardless of consumers, e.g. after a delete.
    pub async fn forget(&self, session_id: Uuid) {
        if self.entries.lock().await.remove(&session_id).is_some() {
            debug!("Forgot session {}.", session_id);
        }
    }

    /// Drops opened entries that have no consumers and sat unused for longer
    /// than the idle TTL. Returns how many were evicted.
    pub async fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| {
            entry.consumers > 0
                || !entry.opened.initialized()
                || now.duration_since(entry.last_used) < self.idle_ttl
        });
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!("Evicted {} idle sessions.", evicted);
        }
        evicted
    }

    /// Runs `evict_idle` periodically until `token` is cancelled.
    pub async fn sweep_idle(&self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    self.evict_idle().await;
                }
            }
        }
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    pub async fn is_open(&self, session_id: Uuid) -> bool {
        self.entries.lock().await.contains_key(&session_id)
    }

    pub async fn consumers(&self, session_id: Uuid) -> usize {
        self.entries
            .lock()
            .await
            .get(&session_id)
            .map_or(0, |entry| entry.consumers)
    }
}

/// A change callback that re-fetches `session` on a background task.
fn refresh_on_change(session: &Arc<StudySession>) -> ChangeCallback {
    let session: Weak<StudySession> = Arc::downgrade(session);
    Arc::new(move || {
        let Some(session) = session.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = session.refresh().await {
                warn!("Refresh of session {} failed: {}", session.id(), e);
            }
        });
    })
}
