//! Fan-out tests: listing publication reaches exactly the category
//! subscribers, message notifications carry the conversation metadata, and
//! the committed-listing glue fires both projections.

use std::sync::Arc;
use std::time::Duration;

use souk_realtime::events;
use souk_realtime::fanout::NotificationFanoutEngine;
use souk_realtime::hub::ChangeHub;
use souk_realtime::mirror::ListingMirror;
use souk_realtime::store::{
    shared, ListingRecord, ListingStatus, NotificationKind, RealtimeStore, SharedStore,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn test_store() -> SharedStore {
    let hub = Arc::new(ChangeHub::new());
    shared(RealtimeStore::open_in_memory(hub).expect("open in-memory store"))
}

fn listing_in(category: &str) -> ListingRecord {
    ListingRecord {
        id: "listing-1".to_string(),
        title: "PS5 neuve".to_string(),
        description: "Still sealed".to_string(),
        price: 55_000,
        category: category.to_string(),
        subcategory: None,
        location: Some("Rabat".to_string()),
        images: vec![],
        owner_id: "zakaria".to_string(),
        sold: false,
        favorites: vec![],
        status: ListingStatus::Approved,
        created_at: 1_700_000_000,
        updated_at: 1_700_000_000,
    }
}

// ---------------------------------------------------------------------------
// Listing fan-out
// ---------------------------------------------------------------------------

#[tokio::test]
async fn listing_notifies_exactly_the_category_subscribers() {
    let store = test_store();
    let engine = NotificationFanoutEngine::new(store.clone());

    {
        let st = store.lock().await;
        st.subscribe_category("xavier", "electronique", 100)
            .expect("x subscribes");
        st.subscribe_category("yasmine", "immobilier", 100)
            .expect("y subscribes elsewhere");
        // zineb subscribes to nothing.
    }

    let written = engine
        .on_new_listing(&listing_in("electronique"))
        .await
        .expect("fan out");
    assert_eq!(written, 1);

    let st = store.lock().await;
    let for_x = st.list_notifications("xavier", false, 50).expect("list x");
    assert_eq!(for_x.len(), 1);
    assert_eq!(for_x[0].kind, NotificationKind::NewListing);
    assert_eq!(for_x[0].title, "New listing in electronique");
    assert_eq!(for_x[0].body, "PS5 neuve");
    assert_eq!(for_x[0].metadata["listingId"], "listing-1");

    assert!(st
        .list_notifications("yasmine", false, 50)
        .expect("list y")
        .is_empty());
    assert!(st
        .list_notifications("zineb", false, 50)
        .expect("list z")
        .is_empty());
}

#[tokio::test]
async fn listing_with_no_subscribers_writes_nothing() {
    let store = test_store();
    let engine = NotificationFanoutEngine::new(store.clone());

    let written = engine
        .on_new_listing(&listing_in("electronique"))
        .await
        .expect("fan out");
    assert_eq!(written, 0);
}

#[tokio::test]
async fn each_subscriber_gets_exactly_one_notification() {
    let store = test_store();
    let engine = NotificationFanoutEngine::new(store.clone());

    {
        let st = store.lock().await;
        for user in ["a", "b", "c"] {
            st.subscribe_category(user, "electronique", 100)
                .expect("subscribe");
        }
    }

    let written = engine
        .on_new_listing(&listing_in("electronique"))
        .await
        .expect("fan out");
    assert_eq!(written, 3);

    let st = store.lock().await;
    for user in ["a", "b", "c"] {
        let rows = st.list_notifications(user, false, 50).expect("list");
        assert_eq!(rows.len(), 1, "user {user}");
    }
}

// ---------------------------------------------------------------------------
// Message and system notifications
// ---------------------------------------------------------------------------

#[tokio::test]
async fn message_notification_carries_sender_and_conversation() {
    let store = test_store();
    let engine = NotificationFanoutEngine::new(store.clone());

    let id = engine
        .on_new_message("amina", "bilal", "conv-1", "salut, toujours dispo ?")
        .await
        .expect("notify");

    let st = store.lock().await;
    let row = st.get_notification(id).expect("get").expect("exists");
    assert_eq!(row.recipient_id, "amina");
    assert_eq!(row.kind, NotificationKind::Message);
    assert_eq!(row.body, "salut, toujours dispo ?");
    assert_eq!(row.metadata["senderId"], "bilal");
    assert_eq!(row.metadata["conversationId"], "conv-1");
}

#[tokio::test]
async fn long_message_preview_is_truncated_in_the_notification() {
    let store = test_store();
    let engine = NotificationFanoutEngine::new(store.clone());

    let long = "x".repeat(150);
    let id = engine
        .on_new_message("amina", "bilal", "conv-1", &long)
        .await
        .expect("notify");

    let st = store.lock().await;
    let row = st.get_notification(id).expect("get").expect("exists");
    assert_eq!(row.body.chars().count(), 103);
    assert!(row.body.ends_with("..."));
}

#[tokio::test]
async fn system_event_passes_metadata_through() {
    let store = test_store();
    let engine = NotificationFanoutEngine::new(store.clone());

    let metadata = serde_json::json!({ "reason": "listing_approved", "listingId": "l9" });
    let id = engine
        .on_system_event("zakaria", "Listing approved", "Your listing is live", metadata.clone())
        .await
        .expect("notify");

    let st = store.lock().await;
    let row = st.get_notification(id).expect("get").expect("exists");
    assert_eq!(row.kind, NotificationKind::System);
    assert_eq!(row.metadata, metadata);
}

// ---------------------------------------------------------------------------
// Committed-listing glue
// ---------------------------------------------------------------------------

async fn wait_until<F>(mut check: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 1s");
}

#[tokio::test]
async fn committed_listing_fires_mirror_and_fanout() {
    let store = test_store();
    let mirror = ListingMirror::new(store.clone());
    let engine = NotificationFanoutEngine::new(store.clone());

    {
        let st = store.lock().await;
        st.subscribe_category("xavier", "electronique", 100)
            .expect("subscribe");
    }

    events::listing_committed(&mirror, &engine, &listing_in("electronique"), true);

    let probe = store.clone();
    wait_until(move || {
        let st = probe.try_lock();
        match st {
            Ok(st) => {
                st.has_listing("listing-1").unwrap_or(false)
                    && st.count_unread_notifications("xavier").unwrap_or(0) == 1
            }
            Err(_) => false,
        }
    })
    .await;
}

#[tokio::test]
async fn committed_edit_does_not_renotify_subscribers() {
    let store = test_store();
    let mirror = ListingMirror::new(store.clone());
    let engine = NotificationFanoutEngine::new(store.clone());

    {
        let st = store.lock().await;
        st.subscribe_category("xavier", "electronique", 100)
            .expect("subscribe");
    }

    // An edit syncs the mirror but is not a first publication.
    events::listing_committed(&mirror, &engine, &listing_in("electronique"), false);

    let probe = store.clone();
    wait_until(move || match probe.try_lock() {
        Ok(st) => st.has_listing("listing-1").unwrap_or(false),
        Err(_) => false,
    })
    .await;

    let st = store.lock().await;
    assert_eq!(st.count_unread_notifications("xavier").expect("count"), 0);
}

#[tokio::test]
async fn removed_listing_is_deleted_from_the_mirror() {
    let store = test_store();
    let mirror = ListingMirror::new(store.clone());

    mirror
        .sync(&listing_in("electronique"))
        .await
        .expect("initial sync");
    events::listing_removed(&mirror, "listing-1");

    let probe = store.clone();
    wait_until(move || match probe.try_lock() {
        Ok(st) => !st.has_listing("listing-1").unwrap_or(true),
        Err(_) => false,
    })
    .await;
}
