//! Notification fan-out: turns domain events into per-recipient notification
//! rows.
//!
//! Three independent, best-effort entry points: a published listing notifies
//! every category subscriber, a sent message notifies its recipient, and a
//! system event notifies one user with arbitrary metadata.  Store failures
//! during fan-out are caught and logged by the fire-and-forget call sites;
//! publishing a listing must succeed even if fan-out fails entirely.

use crate::config::{PREVIEW_ELLIPSIS, PREVIEW_MAX_CHARS};
use crate::logging;
use crate::store::{
    now_secs, ListingRecord, NotificationKind, NotificationRow, SharedStore, StoreError,
};
use crate::tlog;

/// Truncate a message preview to [`PREVIEW_MAX_CHARS`] characters, appending
/// an ellipsis marker when the source exceeds that length.
pub fn truncate_preview(content: &str) -> String {
    let mut chars = content.char_indices();
    match chars.nth(PREVIEW_MAX_CHARS) {
        None => content.to_string(),
        Some((byte_idx, _)) => format!("{}{}", &content[..byte_idx], PREVIEW_ELLIPSIS),
    }
}

/// Writes notification rows for domain events.
#[derive(Clone)]
pub struct NotificationFanoutEngine {
    store: SharedStore,
}

impl NotificationFanoutEngine {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Fan out a freshly published listing to every subscriber of its
    /// category.  All rows go in one batched insert; on failure no
    /// partial-success accounting is attempted.  Returns the number of
    /// notifications written.
    pub async fn on_new_listing(&self, listing: &ListingRecord) -> Result<u32, StoreError> {
        let st = self.store.lock().await;
        let subscribers = st.list_category_subscribers(&listing.category)?;
        if subscribers.is_empty() {
            return Ok(0);
        }

        let now = now_secs();
        let rows: Vec<NotificationRow> = subscribers
            .iter()
            .map(|user_id| NotificationRow {
                id: 0,
                recipient_id: user_id.clone(),
                title: format!("New listing in {}", listing.category),
                body: listing.title.clone(),
                kind: NotificationKind::NewListing,
                read: false,
                created_at: now,
                metadata: serde_json::json!({ "listingId": listing.id }),
            })
            .collect();

        st.insert_notifications(&rows)?;
        tlog!(
            "fanout: {} notification(s) for listing {}",
            rows.len(),
            logging::listing_id(&listing.id)
        );
        Ok(rows.len() as u32)
    }

    /// One `message` notification for the recipient of a direct message.
    /// The body is the preview, truncated to 100 characters.
    pub async fn on_new_message(
        &self,
        recipient_id: &str,
        sender_id: &str,
        conversation_id: &str,
        preview: &str,
    ) -> Result<i64, StoreError> {
        let row = NotificationRow {
            id: 0,
            recipient_id: recipient_id.to_string(),
            title: "New message".to_string(),
            body: truncate_preview(preview),
            kind: NotificationKind::Message,
            read: false,
            created_at: now_secs(),
            metadata: serde_json::json!({
                "senderId": sender_id,
                "conversationId": conversation_id,
            }),
        };

        let st = self.store.lock().await;
        let id = st.insert_notification(&row)?;
        tlog!(
            "fanout: message notification for {} from {}",
            logging::user_id(recipient_id),
            logging::user_id(sender_id)
        );
        Ok(id)
    }

    /// One `system` notification with metadata passthrough.
    pub async fn on_system_event(
        &self,
        user_id: &str,
        title: &str,
        body: &str,
        metadata: serde_json::Value,
    ) -> Result<i64, StoreError> {
        let row = NotificationRow {
            id: 0,
            recipient_id: user_id.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            kind: NotificationKind::System,
            read: false,
            created_at: now_secs(),
            metadata,
        };

        let st = self.store.lock().await;
        let id = st.insert_notification(&row)?;
        tlog!("fanout: system notification for {}", logging::user_id(user_id));
        Ok(id)
    }
}
