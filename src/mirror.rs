//! Listing mirror: keeps the real-time store's denormalized listing
//! projection loosely consistent with the primary transactional store.
//!
//! Both operations are last-writer-wins and idempotent.  A failure here must
//! never roll back or block the primary-store write that triggered it: the
//! caller has already committed, so sync errors are logged by the
//! fire-and-forget glue in [`crate::events`] and surfaced only through
//! observability.  No retry is performed in the base design.

use crate::logging;
use crate::store::{ListingRecord, SharedStore, StoreError};
use crate::tlog;

/// Synchronizer for the mirrored listing projection.
#[derive(Clone)]
pub struct ListingMirror {
    store: SharedStore,
}

impl ListingMirror {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Upsert the mirrored row for `listing`, overwriting every field
    /// unconditionally.  Re-applying the same record has no further effect.
    pub async fn sync(&self, listing: &ListingRecord) -> Result<(), StoreError> {
        let st = self.store.lock().await;
        st.upsert_listing(listing)?;
        tlog!(
            "mirror: synced listing {} (category {})",
            logging::listing_id(&listing.id),
            listing.category
        );
        Ok(())
    }

    /// Delete the mirrored row.  Removing an already-absent listing is a
    /// success.
    pub async fn remove(&self, listing_id: &str) -> Result<(), StoreError> {
        let st = self.store.lock().await;
        let removed = st.delete_listing(listing_id)?;
        if removed {
            tlog!("mirror: removed listing {}", logging::listing_id(listing_id));
        }
        Ok(())
    }
}
