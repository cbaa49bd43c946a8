//! SQLite-backed real-time store.
//!
//! Holds the denormalized listing mirror, notification records, category
//! subscriptions, conversations, messages, and per-user presence rows.
//! Every committed write publishes a [`ChangeEvent`] on the attached
//! [`ChangeHub`], which is the row-change feed the rest of the crate builds
//! on.  The store is a projection target: the primary transactional store
//! always wins on conflict, and nothing here is a second source of truth.

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::config::MAX_NOTIFICATION_LIMIT;
use crate::hub::{ChangeEvent, ChangeHub, ChangeOp, Table};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    Serde(serde_json::Error),
    NotFound(String),
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Sqlite(e) => write!(f, "sqlite error: {e}"),
            StoreError::Serde(e) => write!(f, "serialization error: {e}"),
            StoreError::NotFound(msg) => write!(f, "not found: {msg}"),
            StoreError::Unavailable(msg) => write!(f, "store unavailable: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Sqlite(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serde(e)
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Current time as seconds since UNIX epoch.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Generate a fresh random record id (16 bytes, hex-encoded).
pub fn new_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Canonical ordering of a user pair: the lexicographically smaller id first.
/// Conversations are keyed on this ordering so (A,B) and (B,A) resolve to the
/// same row and the unique-pair constraint catches concurrent creation.
pub fn canonical_pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Read a JSON-encoded TEXT column into a typed value inside a row mapper.
fn json_column<T: serde::de::DeserializeOwned>(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// Moderation state of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    Pending,
    Approved,
    Rejected,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::Pending => "pending",
            ListingStatus::Approved => "approved",
            ListingStatus::Rejected => "rejected",
        }
    }

    /// Parse a stored status string; unknown values read back as pending.
    pub fn parse(s: &str) -> Self {
        match s {
            "approved" => ListingStatus::Approved,
            "rejected" => ListingStatus::Rejected,
            _ => ListingStatus::Pending,
        }
    }
}

/// Denormalized listing projection mirrored from the primary store.
///
/// `id` is identical to the primary-store id and globally unique across both
/// stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingRecord {
    pub id: String,
    pub title: String,
    pub description: String,
    /// Price in minor currency units.
    pub price: i64,
    pub category: String,
    pub subcategory: Option<String>,
    pub location: Option<String>,
    /// Ordered image URLs.
    pub images: Vec<String>,
    pub owner_id: String,
    pub sold: bool,
    /// User ids that favorited the listing (set semantics).
    pub favorites: Vec<String>,
    pub status: ListingStatus,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Notification taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    NewListing,
    Message,
    System,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::NewListing => "new_listing",
            NotificationKind::Message => "message",
            NotificationKind::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new_listing" => Some(NotificationKind::NewListing),
            "message" => Some(NotificationKind::Message),
            "system" => Some(NotificationKind::System),
            _ => None,
        }
    }
}

/// Notification row stored in the database.
///
/// Created only by the fan-out engine; mutated only by the owning recipient
/// (mark-read, mark-all-read, delete).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRow {
    pub id: i64,
    pub recipient_id: String,
    pub title: String,
    pub body: String,
    pub kind: NotificationKind,
    pub read: bool,
    pub created_at: u64,
    /// Type-dependent payload: `{listingId}` for new_listing,
    /// `{senderId, conversationId}` for message, passthrough for system.
    pub metadata: serde_json::Value,
}

/// Conversation identity between two users.  The pair is stored in canonical
/// (lexicographic) order with a unique constraint, so at most one
/// conversation exists per unordered pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRow {
    pub id: String,
    pub user_low: String,
    pub user_high: String,
    pub created_at: u64,
}

/// Message row, ordered by `created_at` ascending within a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub content: String,
    pub created_at: u64,
    pub read: bool,
}

/// Per-user presence row, upserted by the owning user's client.
///
/// The stored boolean is only trustworthy within the heartbeat lease; see
/// [`crate::presence`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserStatusRow {
    pub user_id: String,
    pub is_online: bool,
    pub last_seen: u64,
}

/// A user's subscription to a category's new-listing alerts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorySubscriptionRow {
    pub user_id: String,
    pub category_id: String,
    pub created_at: u64,
}

// ---------------------------------------------------------------------------
// Store handle
// ---------------------------------------------------------------------------

/// Real-time store handle wrapping a SQLite connection and the change feed.
pub struct RealtimeStore {
    conn: Connection,
    hub: Arc<ChangeHub>,
}

/// Shared store handle, locked per operation.  Store calls are the async I/O
/// boundary of the crate: callers must tolerate arbitrary latency and must
/// not assume ordering between independent writes.
pub type SharedStore = Arc<tokio::sync::Mutex<RealtimeStore>>;

/// Wrap a store for shared use across engines and spawned tasks.
pub fn shared(store: RealtimeStore) -> SharedStore {
    Arc::new(tokio::sync::Mutex::new(store))
}

impl RealtimeStore {
    /// Open or create a database at the given path. Creates schema if needed.
    ///
    /// A failure to reach or prepare the database surfaces as
    /// [`StoreError::Unavailable`]; triggering operations treat it as
    /// non-fatal.
    pub fn open(path: &Path, hub: Arc<ChangeHub>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)
            .map_err(|e| StoreError::Unavailable(format!("open {}: {e}", path.display())))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| StoreError::Unavailable(format!("pragma: {e}")))?;
        let store = Self { conn, hub };
        store.create_schema()?;
        Ok(store)
    }

    /// Create an in-memory database (tests and embedded use).
    pub fn open_in_memory(hub: Arc<ChangeHub>) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Unavailable(format!("open in-memory: {e}")))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let store = Self { conn, hub };
        store.create_schema()?;
        Ok(store)
    }

    /// The change feed this store publishes to.
    pub fn hub(&self) -> &Arc<ChangeHub> {
        &self.hub
    }

    fn create_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS listings (
                id          TEXT PRIMARY KEY,
                title       TEXT NOT NULL,
                description TEXT NOT NULL,
                price       INTEGER NOT NULL,
                category    TEXT NOT NULL,
                subcategory TEXT,
                location    TEXT,
                images      TEXT NOT NULL DEFAULT '[]',
                owner_id    TEXT NOT NULL,
                sold        INTEGER NOT NULL DEFAULT 0,
                favorites   TEXT NOT NULL DEFAULT '[]',
                status      TEXT NOT NULL DEFAULT 'pending',
                created_at  INTEGER NOT NULL,
                updated_at  INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_listings_category
                ON listings(category, created_at);
            CREATE INDEX IF NOT EXISTS idx_listings_owner
                ON listings(owner_id);

            CREATE TABLE IF NOT EXISTS category_subscriptions (
                user_id     TEXT NOT NULL,
                category_id TEXT NOT NULL,
                created_at  INTEGER NOT NULL,
                PRIMARY KEY (user_id, category_id)
            );

            CREATE INDEX IF NOT EXISTS idx_subscriptions_category
                ON category_subscriptions(category_id);

            CREATE TABLE IF NOT EXISTS notifications (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                recipient_id TEXT NOT NULL,
                title        TEXT NOT NULL,
                body         TEXT NOT NULL,
                kind         TEXT NOT NULL,
                read         INTEGER NOT NULL DEFAULT 0,
                created_at   INTEGER NOT NULL,
                metadata     TEXT NOT NULL DEFAULT '{}'
            );

            CREATE INDEX IF NOT EXISTS idx_notifications_recipient
                ON notifications(recipient_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_notifications_unread
                ON notifications(recipient_id, read);

            CREATE TABLE IF NOT EXISTS conversations (
                id          TEXT PRIMARY KEY,
                user_low    TEXT NOT NULL,
                user_high   TEXT NOT NULL,
                created_at  INTEGER NOT NULL,
                UNIQUE (user_low, user_high)
            );

            CREATE TABLE IF NOT EXISTS messages (
                id              TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                sender_id       TEXT NOT NULL,
                recipient_id    TEXT NOT NULL,
                content         TEXT NOT NULL,
                created_at      INTEGER NOT NULL,
                read            INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_messages_conversation
                ON messages(conversation_id, created_at);

            CREATE TABLE IF NOT EXISTS user_status (
                user_id     TEXT PRIMARY KEY,
                is_online   INTEGER NOT NULL DEFAULT 0,
                last_seen   INTEGER NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    fn publish(&self, table: Table, op: ChangeOp, row: serde_json::Value) {
        self.hub.publish(&ChangeEvent { table, op, row });
    }

    // -----------------------------------------------------------------------
    // Listings (mirror target)
    // -----------------------------------------------------------------------

    /// Unconditional upsert of a mirrored listing (last-writer-wins).
    /// Idempotent: re-applying the same record changes nothing.
    pub fn upsert_listing(&self, listing: &ListingRecord) -> Result<(), StoreError> {
        let existed = self.has_listing(&listing.id)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO listings
             (id, title, description, price, category, subcategory, location,
              images, owner_id, sold, favorites, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                listing.id,
                listing.title,
                listing.description,
                listing.price,
                listing.category,
                listing.subcategory,
                listing.location,
                serde_json::to_string(&listing.images)?,
                listing.owner_id,
                listing.sold as i32,
                serde_json::to_string(&listing.favorites)?,
                listing.status.as_str(),
                listing.created_at as i64,
                listing.updated_at as i64,
            ],
        )?;
        let op = if existed {
            ChangeOp::Update
        } else {
            ChangeOp::Insert
        };
        self.publish(Table::Listings, op, serde_json::to_value(listing)?);
        Ok(())
    }

    pub fn has_listing(&self, id: &str) -> Result<bool, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM listings WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn get_listing(&self, id: &str) -> Result<Option<ListingRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, description, price, category, subcategory, location,
                    images, owner_id, sold, favorites, status, created_at, updated_at
             FROM listings WHERE id = ?1",
        )?;
        let row = stmt
            .query_row(params![id], map_listing_row)
            .optional()?;
        Ok(row)
    }

    /// Delete a mirrored listing.  Idempotent: removing a missing row is a
    /// success and publishes no event.
    pub fn delete_listing(&self, id: &str) -> Result<bool, StoreError> {
        let affected = self
            .conn
            .execute("DELETE FROM listings WHERE id = ?1", params![id])?;
        if affected > 0 {
            self.publish(
                Table::Listings,
                ChangeOp::Delete,
                serde_json::json!({ "id": id }),
            );
        }
        Ok(affected > 0)
    }

    // -----------------------------------------------------------------------
    // Category subscriptions
    // -----------------------------------------------------------------------

    /// Subscribe a user to a category.  A duplicate subscription is an
    /// idempotent success (already-subscribed is not an error).
    pub fn subscribe_category(
        &self,
        user_id: &str,
        category_id: &str,
        now: u64,
    ) -> Result<(), StoreError> {
        let affected = self.conn.execute(
            "INSERT OR IGNORE INTO category_subscriptions (user_id, category_id, created_at)
             VALUES (?1, ?2, ?3)",
            params![user_id, category_id, now as i64],
        )?;
        if affected > 0 {
            self.publish(
                Table::CategorySubscriptions,
                ChangeOp::Insert,
                serde_json::json!({
                    "user_id": user_id,
                    "category_id": category_id,
                    "created_at": now,
                }),
            );
        }
        Ok(())
    }

    pub fn unsubscribe_category(
        &self,
        user_id: &str,
        category_id: &str,
    ) -> Result<bool, StoreError> {
        let affected = self.conn.execute(
            "DELETE FROM category_subscriptions WHERE user_id = ?1 AND category_id = ?2",
            params![user_id, category_id],
        )?;
        if affected > 0 {
            self.publish(
                Table::CategorySubscriptions,
                ChangeOp::Delete,
                serde_json::json!({ "user_id": user_id, "category_id": category_id }),
            );
        }
        Ok(affected > 0)
    }

    /// All user ids subscribed to a category.  A subscription to a deleted
    /// category is tolerated: it simply matches no future listings.
    pub fn list_category_subscribers(&self, category_id: &str) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id FROM category_subscriptions
             WHERE category_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![category_id], |row| row.get(0))?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn list_user_subscriptions(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT category_id FROM category_subscriptions
             WHERE user_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![user_id], |row| row.get(0))?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Notifications
    // -----------------------------------------------------------------------

    /// Insert a single notification. Returns the new notification id.
    pub fn insert_notification(&self, row: &NotificationRow) -> Result<i64, StoreError> {
        self.conn.execute(
            "INSERT INTO notifications (recipient_id, title, body, kind, read, created_at, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                row.recipient_id,
                row.title,
                row.body,
                row.kind.as_str(),
                row.read as i32,
                row.created_at as i64,
                serde_json::to_string(&row.metadata)?,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        let mut stored = row.clone();
        stored.id = id;
        self.publish(
            Table::Notifications,
            ChangeOp::Insert,
            serde_json::to_value(&stored)?,
        );
        Ok(id)
    }

    /// Batched insert of fan-out notifications inside one transaction.
    ///
    /// Best-effort from the caller's view: either all rows commit or the
    /// error is reported for the whole batch.  Feed events are published
    /// only after the commit.
    pub fn insert_notifications(&self, rows: &[NotificationRow]) -> Result<Vec<i64>, StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            tx.execute(
                "INSERT INTO notifications (recipient_id, title, body, kind, read, created_at, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    row.recipient_id,
                    row.title,
                    row.body,
                    row.kind.as_str(),
                    row.read as i32,
                    row.created_at as i64,
                    serde_json::to_string(&row.metadata)?,
                ],
            )?;
            ids.push(tx.last_insert_rowid());
        }
        tx.commit()?;

        for (row, id) in rows.iter().zip(&ids) {
            let mut stored = row.clone();
            stored.id = *id;
            self.publish(
                Table::Notifications,
                ChangeOp::Insert,
                serde_json::to_value(&stored)?,
            );
        }
        Ok(ids)
    }

    pub fn get_notification(&self, id: i64) -> Result<Option<NotificationRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, recipient_id, title, body, kind, read, created_at, metadata
             FROM notifications WHERE id = ?1",
        )?;
        let row = stmt
            .query_row(params![id], map_notification_row)
            .optional()?;
        Ok(row)
    }

    /// List a recipient's notifications, newest first.  `limit` is clamped
    /// to [`MAX_NOTIFICATION_LIMIT`].
    pub fn list_notifications(
        &self,
        recipient_id: &str,
        unread_only: bool,
        limit: u32,
    ) -> Result<Vec<NotificationRow>, StoreError> {
        let limit = limit.min(MAX_NOTIFICATION_LIMIT);
        let sql = if unread_only {
            "SELECT id, recipient_id, title, body, kind, read, created_at, metadata
             FROM notifications WHERE recipient_id = ?1 AND read = 0
             ORDER BY created_at DESC, id DESC LIMIT ?2"
        } else {
            "SELECT id, recipient_id, title, body, kind, read, created_at, metadata
             FROM notifications WHERE recipient_id = ?1
             ORDER BY created_at DESC, id DESC LIMIT ?2"
        };

        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params![recipient_id, limit as i64], map_notification_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Mark one notification read.  Scoped to the owning recipient: a
    /// mismatched recipient leaves the row untouched.
    pub fn mark_notification_read(&self, recipient_id: &str, id: i64) -> Result<bool, StoreError> {
        let affected = self.conn.execute(
            "UPDATE notifications SET read = 1 WHERE id = ?1 AND recipient_id = ?2",
            params![id, recipient_id],
        )?;
        if affected > 0 {
            self.publish(
                Table::Notifications,
                ChangeOp::Update,
                serde_json::json!({ "id": id, "recipient_id": recipient_id, "read": true }),
            );
        }
        Ok(affected > 0)
    }

    /// Mark all of a recipient's notifications read. Returns the count.
    pub fn mark_all_notifications_read(&self, recipient_id: &str) -> Result<u32, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM notifications WHERE recipient_id = ?1 AND read = 0")?;
        let ids: Vec<i64> = stmt
            .query_map(params![recipient_id], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();

        let affected = self.conn.execute(
            "UPDATE notifications SET read = 1 WHERE recipient_id = ?1 AND read = 0",
            params![recipient_id],
        )?;

        for id in ids {
            self.publish(
                Table::Notifications,
                ChangeOp::Update,
                serde_json::json!({ "id": id, "recipient_id": recipient_id, "read": true }),
            );
        }
        Ok(affected as u32)
    }

    /// Delete one notification, scoped to the owning recipient.
    pub fn delete_notification(&self, recipient_id: &str, id: i64) -> Result<bool, StoreError> {
        let affected = self.conn.execute(
            "DELETE FROM notifications WHERE id = ?1 AND recipient_id = ?2",
            params![id, recipient_id],
        )?;
        if affected > 0 {
            self.publish(
                Table::Notifications,
                ChangeOp::Delete,
                serde_json::json!({ "id": id, "recipient_id": recipient_id }),
            );
        }
        Ok(affected > 0)
    }

    /// Unread badge count for a recipient.
    pub fn count_unread_notifications(&self, recipient_id: &str) -> Result<u32, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE recipient_id = ?1 AND read = 0",
            params![recipient_id],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    // -----------------------------------------------------------------------
    // Conversations
    // -----------------------------------------------------------------------

    /// Resolve the conversation between two users, creating it if absent.
    ///
    /// The pair is canonicalized before the insert, so concurrent calls (and
    /// swapped argument orders) converge on the same row: the OR IGNORE
    /// insert loses against the unique-pair constraint and the follow-up
    /// select returns the surviving conversation.
    pub fn find_or_create_conversation(
        &self,
        user_a: &str,
        user_b: &str,
        now: u64,
    ) -> Result<ConversationRow, StoreError> {
        let (low, high) = canonical_pair(user_a, user_b);
        let candidate_id = new_id();
        let affected = self.conn.execute(
            "INSERT OR IGNORE INTO conversations (id, user_low, user_high, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![candidate_id, low, high, now as i64],
        )?;

        let row = self
            .get_conversation_by_pair(&low, &high)?
            .ok_or_else(|| StoreError::NotFound(format!("conversation {low}/{high}")))?;

        if affected > 0 {
            self.publish(
                Table::Conversations,
                ChangeOp::Insert,
                serde_json::to_value(&row)?,
            );
        }
        Ok(row)
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_low, user_high, created_at FROM conversations WHERE id = ?1",
        )?;
        let row = stmt
            .query_row(params![id], map_conversation_row)
            .optional()?;
        Ok(row)
    }

    fn get_conversation_by_pair(
        &self,
        low: &str,
        high: &str,
    ) -> Result<Option<ConversationRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_low, user_high, created_at FROM conversations
             WHERE user_low = ?1 AND user_high = ?2",
        )?;
        let row = stmt
            .query_row(params![low, high], map_conversation_row)
            .optional()?;
        Ok(row)
    }

    /// All conversations a user participates in, newest first.
    pub fn list_user_conversations(&self, user_id: &str) -> Result<Vec<ConversationRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_low, user_high, created_at FROM conversations
             WHERE user_low = ?1 OR user_high = ?1
             ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![user_id], map_conversation_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Messages
    // -----------------------------------------------------------------------

    /// Append a message.  Duplicate ids are ignored (idempotent re-send).
    pub fn insert_message(&self, row: &MessageRow) -> Result<(), StoreError> {
        let affected = self.conn.execute(
            "INSERT OR IGNORE INTO messages
             (id, conversation_id, sender_id, recipient_id, content, created_at, read)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                row.id,
                row.conversation_id,
                row.sender_id,
                row.recipient_id,
                row.content,
                row.created_at as i64,
                row.read as i32,
            ],
        )?;
        if affected > 0 {
            self.publish(Table::Messages, ChangeOp::Insert, serde_json::to_value(row)?);
        }
        Ok(())
    }

    /// Messages in a conversation, ascending by time.  No pagination
    /// contract here; paging is a collaborator concern.
    pub fn list_conversation_messages(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<MessageRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, conversation_id, sender_id, recipient_id, content, created_at, read
             FROM messages WHERE conversation_id = ?1
             ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![conversation_id], map_message_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn mark_message_read(&self, message_id: &str) -> Result<bool, StoreError> {
        let affected = self.conn.execute(
            "UPDATE messages SET read = 1 WHERE id = ?1",
            params![message_id],
        )?;
        if affected > 0 {
            self.publish(
                Table::Messages,
                ChangeOp::Update,
                serde_json::json!({ "id": message_id, "read": true }),
            );
        }
        Ok(affected > 0)
    }

    // -----------------------------------------------------------------------
    // User status
    // -----------------------------------------------------------------------

    /// Upsert a user's presence row (heartbeat or teardown write).
    pub fn upsert_status(
        &self,
        user_id: &str,
        is_online: bool,
        last_seen: u64,
    ) -> Result<(), StoreError> {
        let existed = self.get_status(user_id)?.is_some();
        self.conn.execute(
            "INSERT OR REPLACE INTO user_status (user_id, is_online, last_seen)
             VALUES (?1, ?2, ?3)",
            params![user_id, is_online as i32, last_seen as i64],
        )?;
        let row = UserStatusRow {
            user_id: user_id.to_string(),
            is_online,
            last_seen,
        };
        let op = if existed {
            ChangeOp::Update
        } else {
            ChangeOp::Insert
        };
        self.publish(Table::UserStatus, op, serde_json::to_value(&row)?);
        Ok(())
    }

    /// Point read of a user's stored status.  `None` is a valid "never seen"
    /// state, not an error.
    pub fn get_status(&self, user_id: &str) -> Result<Option<UserStatusRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, is_online, last_seen FROM user_status WHERE user_id = ?1",
        )?;
        let row = stmt
            .query_row(params![user_id], |row| {
                Ok(UserStatusRow {
                    user_id: row.get(0)?,
                    is_online: row.get::<_, i32>(1)? != 0,
                    last_seen: row.get::<_, i64>(2)? as u64,
                })
            })
            .optional()?;
        Ok(row)
    }
}

// ---------------------------------------------------------------------------
// Row mappers
// ---------------------------------------------------------------------------

fn map_listing_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ListingRecord> {
    Ok(ListingRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        price: row.get(3)?,
        category: row.get(4)?,
        subcategory: row.get(5)?,
        location: row.get(6)?,
        images: json_column(row, 7)?,
        owner_id: row.get(8)?,
        sold: row.get::<_, i32>(9)? != 0,
        favorites: json_column(row, 10)?,
        status: ListingStatus::parse(&row.get::<_, String>(11)?),
        created_at: row.get::<_, i64>(12)? as u64,
        updated_at: row.get::<_, i64>(13)? as u64,
    })
}

fn map_notification_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<NotificationRow> {
    let kind_text: String = row.get(4)?;
    let kind = NotificationKind::parse(&kind_text).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown notification kind: {kind_text}").into(),
        )
    })?;
    Ok(NotificationRow {
        id: row.get(0)?,
        recipient_id: row.get(1)?,
        title: row.get(2)?,
        body: row.get(3)?,
        kind,
        read: row.get::<_, i32>(5)? != 0,
        created_at: row.get::<_, i64>(6)? as u64,
        metadata: json_column(row, 7)?,
    })
}

fn map_conversation_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        user_low: row.get(1)?,
        user_high: row.get(2)?,
        created_at: row.get::<_, i64>(3)? as u64,
    })
}

fn map_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        recipient_id: row.get(3)?,
        content: row.get(4)?,
        created_at: row.get::<_, i64>(5)? as u64,
        read: row.get::<_, i32>(6)? != 0,
    })
}
