//! Store-level tests: schema, mirror upsert semantics, subscription and
//! notification CRUD, presence rows.

use std::sync::Arc;

use souk_realtime::hub::ChangeHub;
use souk_realtime::store::{
    ListingRecord, ListingStatus, NotificationKind, NotificationRow, RealtimeStore,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn test_store() -> RealtimeStore {
    let hub = Arc::new(ChangeHub::new());
    RealtimeStore::open_in_memory(hub).expect("open in-memory store")
}

fn sample_listing(id: &str, category: &str) -> ListingRecord {
    ListingRecord {
        id: id.to_string(),
        title: "iPhone 13".to_string(),
        description: "Barely used, original box".to_string(),
        price: 45_000,
        category: category.to_string(),
        subcategory: Some("smartphones".to_string()),
        location: Some("Casablanca".to_string()),
        images: vec!["https://img.example/1.jpg".to_string()],
        owner_id: "zakaria".to_string(),
        sold: false,
        favorites: vec![],
        status: ListingStatus::Approved,
        created_at: 1_700_000_000,
        updated_at: 1_700_000_000,
    }
}

fn sample_notification(recipient: &str) -> NotificationRow {
    NotificationRow {
        id: 0,
        recipient_id: recipient.to_string(),
        title: "title".to_string(),
        body: "body".to_string(),
        kind: NotificationKind::System,
        read: false,
        created_at: 1_700_000_000,
        metadata: serde_json::json!({}),
    }
}

// ---------------------------------------------------------------------------
// Listing mirror rows
// ---------------------------------------------------------------------------

#[test]
fn upsert_listing_round_trips_all_fields() {
    let store = test_store();
    let listing = sample_listing("l1", "electronique");

    store.upsert_listing(&listing).expect("upsert");
    let fetched = store.get_listing("l1").expect("get").expect("row exists");
    assert_eq!(fetched, listing);
}

#[test]
fn upsert_listing_is_idempotent() {
    let store = test_store();
    let listing = sample_listing("l1", "electronique");

    store.upsert_listing(&listing).expect("first upsert");
    store.upsert_listing(&listing).expect("second upsert");

    let fetched = store.get_listing("l1").expect("get").expect("row exists");
    assert_eq!(fetched, listing);
}

#[test]
fn upsert_listing_is_last_writer_wins() {
    let store = test_store();
    let mut listing = sample_listing("l1", "electronique");
    store.upsert_listing(&listing).expect("initial upsert");

    listing.title = "iPhone 13 Pro".to_string();
    listing.sold = true;
    listing.favorites = vec!["amina".to_string()];
    listing.updated_at = 1_700_000_100;
    store.upsert_listing(&listing).expect("overwrite");

    let fetched = store.get_listing("l1").expect("get").expect("row exists");
    assert_eq!(fetched.title, "iPhone 13 Pro");
    assert!(fetched.sold);
    assert_eq!(fetched.favorites, vec!["amina".to_string()]);
}

#[test]
fn delete_listing_is_idempotent() {
    let store = test_store();
    store
        .upsert_listing(&sample_listing("l1", "electronique"))
        .expect("upsert");

    assert!(store.delete_listing("l1").expect("first delete"));
    assert!(!store.delete_listing("l1").expect("second delete"));
    assert!(store.get_listing("l1").expect("get").is_none());
}

// ---------------------------------------------------------------------------
// Category subscriptions
// ---------------------------------------------------------------------------

#[test]
fn duplicate_subscription_is_idempotent_success() {
    let store = test_store();
    store
        .subscribe_category("xavier", "electronique", 100)
        .expect("first subscribe");
    store
        .subscribe_category("xavier", "electronique", 200)
        .expect("duplicate subscribe");

    let subscribers = store
        .list_category_subscribers("electronique")
        .expect("list");
    assert_eq!(subscribers, vec!["xavier".to_string()]);
}

#[test]
fn unsubscribe_removes_the_pair() {
    let store = test_store();
    store
        .subscribe_category("xavier", "electronique", 100)
        .expect("subscribe");

    assert!(store
        .unsubscribe_category("xavier", "electronique")
        .expect("unsubscribe"));
    assert!(!store
        .unsubscribe_category("xavier", "electronique")
        .expect("second unsubscribe"));
    assert!(store
        .list_category_subscribers("electronique")
        .expect("list")
        .is_empty());
}

#[test]
fn orphaned_subscription_to_unknown_category_is_tolerated() {
    let store = test_store();
    store
        .subscribe_category("xavier", "deleted-category", 100)
        .expect("subscribe");
    // No listings will ever match; the row simply sits there.
    let subs = store.list_user_subscriptions("xavier").expect("list");
    assert_eq!(subs, vec!["deleted-category".to_string()]);
}

// ---------------------------------------------------------------------------
// Notification read surface
// ---------------------------------------------------------------------------

#[test]
fn notifications_list_newest_first_and_count_unread() {
    let store = test_store();
    let mut n1 = sample_notification("amina");
    n1.created_at = 100;
    let mut n2 = sample_notification("amina");
    n2.created_at = 200;

    store.insert_notification(&n1).expect("insert n1");
    let id2 = store.insert_notification(&n2).expect("insert n2");

    let list = store
        .list_notifications("amina", false, 50)
        .expect("list all");
    assert_eq!(list.len(), 2);
    assert_eq!(list[0].id, id2); // newest first

    assert_eq!(store.count_unread_notifications("amina").expect("count"), 2);
}

#[test]
fn mark_read_is_scoped_to_the_owning_recipient() {
    let store = test_store();
    let id = store
        .insert_notification(&sample_notification("amina"))
        .expect("insert");

    // Another user cannot mutate amina's notification.
    assert!(!store.mark_notification_read("mallory", id).expect("mark"));
    assert_eq!(store.count_unread_notifications("amina").expect("count"), 1);

    assert!(store.mark_notification_read("amina", id).expect("mark"));
    assert_eq!(store.count_unread_notifications("amina").expect("count"), 0);
}

#[test]
fn mark_all_read_touches_only_that_recipient() {
    let store = test_store();
    store
        .insert_notification(&sample_notification("amina"))
        .expect("insert");
    store
        .insert_notification(&sample_notification("amina"))
        .expect("insert");
    store
        .insert_notification(&sample_notification("bob"))
        .expect("insert");

    assert_eq!(store.mark_all_notifications_read("amina").expect("mark"), 2);
    assert_eq!(store.count_unread_notifications("amina").expect("count"), 0);
    assert_eq!(store.count_unread_notifications("bob").expect("count"), 1);
}

#[test]
fn delete_notification_is_scoped_and_idempotent() {
    let store = test_store();
    let id = store
        .insert_notification(&sample_notification("amina"))
        .expect("insert");

    assert!(!store.delete_notification("mallory", id).expect("delete"));
    assert!(store.delete_notification("amina", id).expect("delete"));
    assert!(!store.delete_notification("amina", id).expect("re-delete"));
    assert!(store.get_notification(id).expect("get").is_none());
}

#[test]
fn batched_insert_writes_all_rows() {
    let store = test_store();
    let rows = vec![
        sample_notification("amina"),
        sample_notification("bob"),
        sample_notification("chloe"),
    ];
    let ids = store.insert_notifications(&rows).expect("batch insert");
    assert_eq!(ids.len(), 3);
    for (row, id) in rows.iter().zip(&ids) {
        let stored = store.get_notification(*id).expect("get").expect("exists");
        assert_eq!(stored.recipient_id, row.recipient_id);
    }
}

// ---------------------------------------------------------------------------
// On-disk persistence
// ---------------------------------------------------------------------------

#[test]
fn on_disk_store_survives_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("realtime.db");

    {
        let hub = Arc::new(ChangeHub::new());
        let store = RealtimeStore::open(&path, hub).expect("open");
        store
            .upsert_listing(&sample_listing("l1", "electronique"))
            .expect("upsert");
    }

    let hub = Arc::new(ChangeHub::new());
    let reopened = RealtimeStore::open(&path, hub).expect("reopen");
    let fetched = reopened.get_listing("l1").expect("get").expect("row");
    assert_eq!(fetched.title, "iPhone 13");
}

// ---------------------------------------------------------------------------
// User status rows
// ---------------------------------------------------------------------------

#[test]
fn status_upsert_and_point_read() {
    let store = test_store();
    assert!(store.get_status("alice").expect("get").is_none());

    store.upsert_status("alice", true, 1_000).expect("upsert");
    let row = store.get_status("alice").expect("get").expect("exists");
    assert!(row.is_online);
    assert_eq!(row.last_seen, 1_000);

    store.upsert_status("alice", false, 2_000).expect("upsert");
    let row = store.get_status("alice").expect("get").expect("exists");
    assert!(!row.is_online);
    assert_eq!(row.last_seen, 2_000);
}
