//! Presence tracking: heartbeat writer plus change-feed consumer.
//!
//! The owning client upserts its own status row on attach and then on a
//! fixed heartbeat cadence.  The only transition to offline is a best-effort
//! write on teardown, which is inherently unreliable: nothing guarantees it
//! runs on ungraceful termination.  Presence is therefore modelled as a
//! lease: a stored `is_online = true` with a `last_seen` older than twice
//! the heartbeat interval must be rendered as offline, regardless of the
//! boolean.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

use crate::config::ONLINE_LEASE_FACTOR;
use crate::hub::{ChangeHandler, ChangeHub, RowFilter, SubscriptionId, Table};
use crate::logging;
use crate::store::{now_secs, SharedStore, StoreError, UserStatusRow};
use crate::tlog;

/// Derived presence of a tracked user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceState {
    /// No status row has ever been written for this user.
    Unknown,
    Online,
    Offline,
}

impl UserStatusRow {
    /// Apply the staleness lease: the stored boolean is only trusted while
    /// the last heartbeat is younger than `ONLINE_LEASE_FACTOR` intervals.
    pub fn is_effectively_online(&self, now: u64, heartbeat_interval_secs: u64) -> bool {
        self.is_online
            && now.saturating_sub(self.last_seen) <= heartbeat_interval_secs * ONLINE_LEASE_FACTOR
    }
}

/// Writes and reads per-user presence rows.
#[derive(Clone)]
pub struct PresenceTracker {
    store: SharedStore,
    heartbeat_interval_secs: u64,
}

impl PresenceTracker {
    pub fn new(store: SharedStore, heartbeat_interval_secs: u64) -> Self {
        Self {
            store,
            heartbeat_interval_secs,
        }
    }

    /// Record the owning user as online now.  Called on attach, on every
    /// heartbeat tick, and on visibility-change events showing the page
    /// active.
    pub async fn mark_online(&self, user_id: &str) -> Result<(), StoreError> {
        let st = self.store.lock().await;
        st.upsert_status(user_id, true, now_secs())
    }

    /// Best-effort offline write on teardown.  May never run on ungraceful
    /// termination; readers must apply the lease rule rather than trust it.
    pub async fn mark_offline(&self, user_id: &str) -> Result<(), StoreError> {
        let st = self.store.lock().await;
        st.upsert_status(user_id, false, now_secs())
    }

    /// Point read of another user's stored status.
    pub async fn get_status(&self, user_id: &str) -> Result<Option<UserStatusRow>, StoreError> {
        let st = self.store.lock().await;
        st.get_status(user_id)
    }

    /// Stored status folded through the staleness lease.
    pub async fn state_of(&self, user_id: &str, now: u64) -> Result<PresenceState, StoreError> {
        let status = self.get_status(user_id).await?;
        Ok(match status {
            None => PresenceState::Unknown,
            Some(row) if row.is_effectively_online(now, self.heartbeat_interval_secs) => {
                PresenceState::Online
            }
            Some(_) => PresenceState::Offline,
        })
    }

    /// Run the heartbeat loop for `user_id` until `shutdown` is signalled,
    /// then attempt the best-effort offline write.
    ///
    /// Heartbeat failures are logged and swallowed: a missed beat merely
    /// lets the lease lapse early.  The caller owns the shutdown signal and
    /// must trigger it at the end of its lifecycle so the task does not leak.
    pub async fn heartbeat_loop(&self, user_id: String, shutdown: Arc<Notify>) {
        loop {
            if let Err(e) = self.mark_online(&user_id).await {
                tlog!(
                    "presence: heartbeat for {} failed: {}",
                    logging::user_id(&user_id),
                    e
                );
            }

            tokio::select! {
                _ = shutdown.notified() => break,
                _ = tokio::time::sleep(Duration::from_secs(self.heartbeat_interval_secs)) => {}
            }
        }

        if let Err(e) = self.mark_offline(&user_id).await {
            tlog!(
                "presence: offline write for {} failed: {}",
                logging::user_id(&user_id),
                e
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Live presence cache over the change feed
// ---------------------------------------------------------------------------

/// Local cache of `user_id -> is_online`, fed by user_status change events.
///
/// The cache stores the raw boolean without re-deriving staleness; callers
/// rendering another user's badge apply the lease rule themselves (via
/// [`UserStatusRow::is_effectively_online`]) or accept brief inaccuracy
/// between heartbeats.  The push feed is a supplement: attach the cache,
/// then do an authoritative point read for any user already displayed.
#[derive(Clone, Default)]
pub struct PresenceCache {
    map: Arc<Mutex<HashMap<String, bool>>>,
}

impl PresenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe this cache to the user_status feed.  The returned handle
    /// must be unsubscribed when the owning component shuts down.
    pub fn attach(&self, hub: &ChangeHub) -> SubscriptionId {
        hub.subscribe(Table::UserStatus, RowFilter::All, Box::new(self.clone()))
    }

    /// Cached online flag, if any status event has been seen for this user.
    pub fn is_online(&self, user_id: &str) -> Option<bool> {
        self.map.lock().unwrap().get(user_id).copied()
    }

    fn apply(&self, row: &serde_json::Value) {
        let user_id = row.get("user_id").and_then(|v| v.as_str());
        let is_online = row.get("is_online").and_then(|v| v.as_bool());
        if let (Some(user_id), Some(is_online)) = (user_id, is_online) {
            self.map
                .lock()
                .unwrap()
                .insert(user_id.to_string(), is_online);
        }
    }
}

impl ChangeHandler for PresenceCache {
    fn on_insert(&mut self, row: &serde_json::Value) {
        self.apply(row);
    }

    fn on_update(&mut self, row: &serde_json::Value) {
        self.apply(row);
    }

    fn on_delete(&mut self, row: &serde_json::Value) {
        if let Some(user_id) = row.get("user_id").and_then(|v| v.as_str()) {
            self.map.lock().unwrap().remove(user_id);
        }
    }
}
