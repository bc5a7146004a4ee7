//! crates/study_session_core/src/feed.rs
//!
//! Consumer-side ownership of a change-feed subscription.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::SyncError;
use crate::ports::{ChangeCallback, ChangeFeed, FeedKey, Subscription, SubscriptionStatus};

/// Holds at most one subscription for one consumer.
///
/// Watching a new key tears the previous subscription down first; watching the
/// same key again is a no-op. Dropping the watcher unsubscribes.
pub struct FeedWatcher {
    feed: Arc<dyn ChangeFeed>,
    active: Option<(FeedKey, Subscription)>,
}

impl FeedWatcher {
    pub fn new(feed: Arc<dyn ChangeFeed>) -> Self {
        Self { feed, active: None }
    }

    pub async fn watch(
        &mut self,
        key: FeedKey,
        on_change: ChangeCallback,
    ) -> Result<(), SyncError> {
        if self.key() == Some(key) {
            return Ok(());
        }
        self.unwatch();

        let subscription = self.feed.subscribe(key, on_change).await?;
        match subscription.status() {
            SubscriptionStatus::Subscribed => debug!("Subscribed to session changes ({}).", key),
            status => warn!("Change feed subscription status for {}: {}", key, status),
        }
        self.active = Some((key, subscription));
        Ok(())
    }

    pub fn unwatch(&mut self) {
        if let Some((key, subscription)) = self.active.take() {
            debug!("Unsubscribing from session changes ({}).", key);
            subscription.unsubscribe();
        }
    }

    pub fn key(&self) -> Option<FeedKey> {
        self.active.as_ref().map(|(key, _)| *key)
    }

    pub fn status(&self) -> Option<SubscriptionStatus> {
        self.active.as_ref().map(|(_, subscription)| subscription.status())
    }
}
