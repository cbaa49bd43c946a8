//! Fire-and-forget projection glue for primary-store commits.
//!
//! The primary store calls in here synchronously after its own commit.  The
//! mirror sync and the notification fan-out are two independent
//! eventual-consistency channels, not a pipeline: each runs in its own task,
//! each logs and swallows its own failure, and a client may observe the
//! notification before the mirrored row or vice versa.  Nothing here can
//! roll back or block the primary write.

use crate::fanout::NotificationFanoutEngine;
use crate::logging;
use crate::mirror::ListingMirror;
use crate::store::ListingRecord;
use crate::tlog;

/// A listing was created or updated in the primary store.  Fires the mirror
/// upsert and the subscriber fan-out as two independent tasks.
pub fn listing_committed(
    mirror: &ListingMirror,
    fanout: &NotificationFanoutEngine,
    listing: &ListingRecord,
    newly_published: bool,
) {
    let m = mirror.clone();
    let record = listing.clone();
    tokio::spawn(async move {
        if let Err(e) = m.sync(&record).await {
            tlog!(
                "mirror: sync of listing {} failed: {}",
                logging::listing_id(&record.id),
                e
            );
        }
    });

    // Subscribers are only notified for first publication, not edits.
    if newly_published {
        let f = fanout.clone();
        let record = listing.clone();
        tokio::spawn(async move {
            if let Err(e) = f.on_new_listing(&record).await {
                tlog!(
                    "fanout: listing {} failed: {}",
                    logging::listing_id(&record.id),
                    e
                );
            }
        });
    }
}

/// A listing was deleted in the primary store.  Fires the mirror delete.
pub fn listing_removed(mirror: &ListingMirror, listing_id: &str) {
    let m = mirror.clone();
    let id = listing_id.to_string();
    tokio::spawn(async move {
        if let Err(e) = m.remove(&id).await {
            tlog!(
                "mirror: removal of listing {} failed: {}",
                logging::listing_id(&id),
                e
            );
        }
    });
}
