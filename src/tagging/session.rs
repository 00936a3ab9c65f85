//! Session store: in-memory pending tagging decisions with expiry.
//!
//! Entries are keyed by (session id, channel id). Nothing here is persisted;
//! a restart simply turns every pending decision stale.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, info};

/// How often the purge task sweeps expired entries.
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// A source channel waiting for the operator's decision.
#[derive(Debug, Clone)]
pub struct PendingChannel {
    pub title: String,
    pub handle: String,
    created_at: Instant,
}

impl PendingChannel {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() >= ttl
    }
}

/// Pending decisions plus the per-session "waiting for a tag name" marker.
pub struct SessionStore {
    ttl: Duration,
    pending: RwLock<HashMap<(i64, i64), PendingChannel>>,
    /// session id → channel id whose new tag name is expected next.
    awaiting_input: RwLock<HashMap<i64, i64>>,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            ttl,
            pending: RwLock::new(HashMap::new()),
            awaiting_input: RwLock::new(HashMap::new()),
        })
    }

    /// Record (or refresh) a pending channel.
    pub async fn insert(&self, session_id: i64, channel_id: i64, title: &str, handle: &str) {
        let entry = PendingChannel {
            title: title.to_string(),
            handle: handle.to_string(),
            created_at: Instant::now(),
        };
        self.pending
            .write()
            .await
            .insert((session_id, channel_id), entry);
        debug!(session_id, channel_id, "Pending channel recorded");
    }

    /// The live pending entry, if any.
    pub async fn get(&self, session_id: i64, channel_id: i64) -> Option<PendingChannel> {
        self.pending
            .read()
            .await
            .get(&(session_id, channel_id))
            .filter(|p| !p.is_expired(self.ttl))
            .cloned()
    }

    /// Drop a pending entry and any tag-input marker pointing at it.
    pub async fn remove(&self, session_id: i64, channel_id: i64) {
        self.pending.write().await.remove(&(session_id, channel_id));
        let mut awaiting = self.awaiting_input.write().await;
        if awaiting.get(&session_id) == Some(&channel_id) {
            awaiting.remove(&session_id);
        }
    }

    /// Expect the session's next free-text message to name a tag for `channel_id`.
    pub async fn await_tag_input(&self, session_id: i64, channel_id: i64) {
        self.awaiting_input
            .write()
            .await
            .insert(session_id, channel_id);
    }

    /// Channel whose tag name the session is expected to type, if any.
    pub async fn awaiting_channel(&self, session_id: i64) -> Option<i64> {
        self.awaiting_input.read().await.get(&session_id).copied()
    }

    pub async fn clear_tag_input(&self, session_id: i64) {
        self.awaiting_input.write().await.remove(&session_id);
    }

    /// Drop expired entries and orphaned input markers. Returns how many entries expired.
    pub async fn purge_expired(&self) -> usize {
        let mut pending = self.pending.write().await;
        let before = pending.len();
        pending.retain(|_, p| !p.is_expired(self.ttl));
        let purged = before - pending.len();

        self.awaiting_input
            .write()
            .await
            .retain(|session, channel| pending.contains_key(&(*session, *channel)));

        if purged > 0 {
            info!(count = purged, "Expired pending tagging decisions");
        }
        purged
    }

    pub async fn len(&self) -> usize {
        self.pending.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pending.read().await.is_empty()
    }
}

/// Spawn a background task that periodically purges expired sessions.
pub fn spawn_expiry_task(store: Arc<SessionStore>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            interval.tick().await;
            store.purge_expired().await;
        }
    })
}
