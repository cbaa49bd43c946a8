//! Publish/subscribe façade over the real-time store's row-change feed.
//!
//! Consumers subscribe to "rows in table T where filter F change" and receive
//! insert/update/delete callbacks in store commit order.  Delivery is
//! at-most-once for the lifetime of the hub: there is no resume-from-offset,
//! so consumers must perform an authoritative re-fetch when they (re)attach
//! and treat the feed as a low-latency supplement, never as the sole source
//! of truth.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Tables exposed on the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Listings,
    CategorySubscriptions,
    Notifications,
    Conversations,
    Messages,
    UserStatus,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Listings => "listings",
            Table::CategorySubscriptions => "category_subscriptions",
            Table::Notifications => "notifications",
            Table::Conversations => "conversations",
            Table::Messages => "messages",
            Table::UserStatus => "user_status",
        }
    }
}

/// Kind of row change carried by a [`ChangeEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// A single committed row change, published by the store after the write.
///
/// `row` is the JSON-shaped record; delete events may carry only the key
/// fields of the removed row.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeEvent {
    pub table: Table,
    pub op: ChangeOp,
    pub row: serde_json::Value,
}

/// Row predicate for a subscription.
#[derive(Debug, Clone)]
pub enum RowFilter {
    /// Match every row in the table.
    All,
    /// Match rows whose `field` equals `value`.
    Eq {
        field: String,
        value: serde_json::Value,
    },
}

impl RowFilter {
    /// Equality filter on a single field, e.g. `RowFilter::eq("recipient_id", uid)`.
    pub fn eq(field: &str, value: impl Into<serde_json::Value>) -> Self {
        RowFilter::Eq {
            field: field.to_string(),
            value: value.into(),
        }
    }

    pub fn matches(&self, row: &serde_json::Value) -> bool {
        match self {
            RowFilter::All => true,
            RowFilter::Eq { field, value } => row.get(field) == Some(value),
        }
    }
}

/// Callbacks for a change subscription.  All methods default to no-ops so a
/// consumer only implements the operations it cares about.
pub trait ChangeHandler: Send {
    fn on_insert(&mut self, _row: &serde_json::Value) {}
    fn on_update(&mut self, _row: &serde_json::Value) {}
    fn on_delete(&mut self, _row: &serde_json::Value) {}
}

/// Opaque handle identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    table: Table,
    filter: RowFilter,
    handler: Box<dyn ChangeHandler>,
}

/// Dispatches committed row changes to matching subscriptions.
///
/// Handlers for one subscription are invoked in the order the store commits
/// matching rows; no ordering is guaranteed across two subscriptions or
/// tables.  Subscriptions are owned by whoever created them and must be torn
/// down with [`ChangeHub::unsubscribe`] at the end of that owner's lifecycle.
pub struct ChangeHub {
    subscriptions: Mutex<HashMap<u64, Subscription>>,
    next_id: AtomicU64,
}

impl ChangeHub {
    pub fn new() -> Self {
        Self {
            subscriptions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a handler for changes to `table` rows matching `filter`.
    pub fn subscribe(
        &self,
        table: Table,
        filter: RowFilter,
        handler: Box<dyn ChangeHandler>,
    ) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let subscription = Subscription {
            table,
            filter,
            handler,
        };
        self.subscriptions.lock().unwrap().insert(id, subscription);
        SubscriptionId(id)
    }

    /// Detach a subscription.  Safe to call any number of times; a handle
    /// already removed is a no-op.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscriptions.lock().unwrap().remove(&id.0);
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().unwrap().len()
    }

    /// Deliver a committed change to every matching subscription.
    ///
    /// Called by the store after each successful write, while still ordered
    /// by commit; the lock is held across dispatch so each subscription sees
    /// events in commit order.
    pub fn publish(&self, event: &ChangeEvent) {
        let mut subs = self.subscriptions.lock().unwrap();
        for sub in subs.values_mut() {
            if sub.table == event.table && sub.filter.matches(&event.row) {
                match event.op {
                    ChangeOp::Insert => sub.handler.on_insert(&event.row),
                    ChangeOp::Update => sub.handler.on_update(&event.row),
                    ChangeOp::Delete => sub.handler.on_delete(&event.row),
                }
            }
        }
    }
}

impl Default for ChangeHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_all_matches_anything() {
        let row = serde_json::json!({ "id": "x" });
        assert!(RowFilter::All.matches(&row));
    }

    #[test]
    fn filter_eq_matches_on_field_value() {
        let row = serde_json::json!({ "recipient_id": "alice", "read": false });
        assert!(RowFilter::eq("recipient_id", "alice").matches(&row));
        assert!(!RowFilter::eq("recipient_id", "bob").matches(&row));
        assert!(!RowFilter::eq("missing_field", "alice").matches(&row));
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        struct Nop;
        impl ChangeHandler for Nop {}

        let hub = ChangeHub::new();
        let id = hub.subscribe(Table::Notifications, RowFilter::All, Box::new(Nop));
        assert_eq!(hub.subscription_count(), 1);

        hub.unsubscribe(id);
        hub.unsubscribe(id); // second call is a no-op
        assert_eq!(hub.subscription_count(), 0);
    }
}
