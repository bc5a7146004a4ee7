//! services/api/src/adapters/change_feed.rs
//!
//! The change-feed adapter. Row mutations on `sessions` are broadcast by a
//! Postgres trigger through `pg_notify`. One process-wide listener, on its own
//! connection outside the pool, receives every notification and fans it out to
//! the subscribers whose scope it falls in.

use async_trait::async_trait;
use serde::Deserialize;
use sqlx::postgres::PgListener;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use study_session_core::ports::{
    ChangeCallback, ChangeFeed, FeedKey, PortResult, Subscription, SubscriptionStatus,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Channel the `notify_session_change` trigger publishes on.
pub const SESSION_CHANNEL: &str = "session_changes";

const RETRY_DELAY: Duration = Duration::from_secs(2);

/// The payload written by the trigger for every insert, update and delete.
#[derive(Debug, Deserialize, PartialEq, Eq)]
pub struct ChangeNotice {
    pub op: String,
    pub id: Uuid,
    pub user_id: Uuid,
}

/// Parses one notification payload. Malformed payloads are dropped.
pub fn parse_notice(payload: &str) -> Option<ChangeNotice> {
    match serde_json::from_str(payload) {
        Ok(notice) => Some(notice),
        Err(e) => {
            warn!("Ignoring malformed change notification '{}': {}", payload, e);
            None
        }
    }
}

//=========================================================================================
// FeedRoutes (Subscriber Table of the Shared Listener)
//=========================================================================================

/// The subscribers of the shared listener, keyed by subscription id.
#[derive(Default)]
pub struct FeedRoutes {
    next_id: AtomicU64,
    routes: Mutex<HashMap<u64, (FeedKey, ChangeCallback)>>,
}

impl FeedRoutes {
    fn routes(&self) -> MutexGuard<'_, HashMap<u64, (FeedKey, ChangeCallback)>> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, key: FeedKey, on_change: ChangeCallback) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.routes().insert(id, (key, on_change));
        id
    }

    pub fn remove(&self, id: u64) {
        self.routes().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.routes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invokes every callback whose key covers `notice`. Returns how many ran.
    pub fn dispatch(&self, notice: &ChangeNotice) -> usize {
        let matched: Vec<ChangeCallback> = self
            .routes()
            .values()
            .filter(|(key, _)| key.matches(notice.id, notice.user_id))
            .map(|(_, on_change)| on_change.clone())
            .collect();
        // Callbacks run outside the lock so they may subscribe or unsubscribe.
        for on_change in &matched {
            on_change();
        }
        matched.len()
    }

    /// Invokes every callback, e.g. after notifications may have been missed.
    pub fn dispatch_all(&self) -> usize {
        let all: Vec<ChangeCallback> = self
            .routes()
            .values()
            .map(|(_, on_change)| on_change.clone())
            .collect();
        for on_change in &all {
            on_change();
        }
        all.len()
    }
}

//=========================================================================================
// PgChangeFeed
//=========================================================================================

pub struct PgChangeFeed {
    routes: Arc<FeedRoutes>,
    healthy: Arc<AtomicBool>,
    shutdown: CancellationToken,
}

impl PgChangeFeed {
    /// Opens the shared listener on a dedicated connection to `database_url`
    /// and starts dispatching notifications.
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let mut listener = PgListener::connect(database_url).await?;
        listener.listen(SESSION_CHANNEL).await?;
        info!("Listening for session changes on '{}'.", SESSION_CHANNEL);

        let feed = Self {
            routes: Arc::new(FeedRoutes::default()),
            healthy: Arc::new(AtomicBool::new(true)),
            shutdown: CancellationToken::new(),
        };
        tokio::spawn(run_listener(
            listener,
            feed.routes.clone(),
            feed.healthy.clone(),
            feed.shutdown.clone(),
        ));
        Ok(feed)
    }
}

impl Drop for PgChangeFeed {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn run_listener(
    mut listener: PgListener,
    routes: Arc<FeedRoutes>,
    healthy: Arc<AtomicBool>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("Change feed listener stopped.");
                break;
            }
            received = listener.recv() => match received {
                Ok(notification) => {
                    if !healthy.swap(true, Ordering::SeqCst) {
                        // Notifications sent while disconnected are lost.
                        info!("Change feed listener recovered.");
                        routes.dispatch_all();
                    }
                    let Some(notice) = parse_notice(notification.payload()) else {
                        continue;
                    };
                    let delivered = routes.dispatch(&notice);
                    debug!(
                        "{} on session {} reached {} subscribers.",
                        notice.op, notice.id, delivered
                    );
                }
                Err(e) => {
                    healthy.store(false, Ordering::SeqCst);
                    error!("Change feed listener failed: {}", e);
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
    }
}

#[async_trait]
impl ChangeFeed for PgChangeFeed {
    async fn subscribe(&self, key: FeedKey, on_change: ChangeCallback) -> PortResult<Subscription> {
        if self.shutdown.is_cancelled() {
            return Ok(Subscription::inactive(SubscriptionStatus::Closed));
        }
        // A route registered while the listener is down still fires once it recovers.
        let status = if self.healthy.load(Ordering::SeqCst) {
            SubscriptionStatus::Subscribed
        } else {
            SubscriptionStatus::ChannelError
        };
        let id = self.routes.add(key, on_change);
        debug!("Route {} added for {}.", id, key);

        let routes = Arc::downgrade(&self.routes);
        Ok(Subscription::new(status, move || {
            if let Some(routes) = routes.upgrade() {
                routes.remove(id);
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, ChangeCallback) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let callback: ChangeCallback = Arc::new(move || {
            counted.fetch_add(1, Ordering::SeqCst);
        });
        (calls, callback)
    }

    #[test]
    fn trigger_payload_parses() {
        let id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let payload = format!(r#"{{"op":"UPDATE","id":"{}","user_id":"{}"}}"#, id, user_id);
        let notice = parse_notice(&payload).unwrap();
        assert_eq!(notice.op, "UPDATE");
        assert!(FeedKey::Session(id).matches(notice.id, notice.user_id));
        assert!(FeedKey::User(user_id).matches(notice.id, notice.user_id));
    }

    #[test]
    fn garbage_payload_is_dropped() {
        assert!(parse_notice("not json").is_none());
        assert!(parse_notice(r#"{"op":"DELETE"}"#).is_none());
    }

    #[test]
    fn one_listener_fans_out_by_scope() {
        let routes = FeedRoutes::default();
        let session_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let (session_calls, on_session) = counter();
        let (user_calls, on_user) = counter();
        let (other_calls, on_other) = counter();
        routes.add(FeedKey::Session(session_id), on_session);
        routes.add(FeedKey::User(user_id), on_user);
        routes.add(FeedKey::Session(Uuid::new_v4()), on_other);

        let notice = ChangeNotice {
            op: "UPDATE".into(),
            id: session_id,
            user_id,
        };
        assert_eq!(routes.dispatch(&notice), 2);
        assert_eq!(session_calls.load(Ordering::SeqCst), 1);
        assert_eq!(user_calls.load(Ordering::SeqCst), 1);
        assert_eq!(other_calls.load(Ordering::SeqCst), 0);

        assert_eq!(routes.dispatch_all(), 3);
        assert_eq!(other_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn removed_routes_stop_firing() {
        let routes = FeedRoutes::default();
        let session_id = Uuid::new_v4();
        let (calls, on_change) = counter();
        let id = routes.add(FeedKey::Session(session_id), on_change);
        routes.remove(id);
        assert!(routes.is_empty());

        let notice = ChangeNotice {
            op: "DELETE".into(),
            id: session_id,
            user_id: Uuid::new_v4(),
        };
        assert_eq!(routes.dispatch(&notice), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
