//! Configuration types and constants for the realtime core.

use std::path::PathBuf;

/// Cadence at which an attached client re-writes its own presence row.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 60;

/// A stored heartbeat older than this many intervals no longer proves
/// liveness; renderers must treat the user as offline past the lease.
pub const ONLINE_LEASE_FACTOR: u64 = 2;

/// Notification bodies built from a message preview are truncated to this
/// many characters.
pub const PREVIEW_MAX_CHARS: usize = 100;

/// Marker appended to a truncated preview.
pub(crate) const PREVIEW_ELLIPSIS: &str = "...";

/// Default cap for notification list queries.
pub const DEFAULT_NOTIFICATION_LIMIT: u32 = 50;

/// Hard cap for notification list queries.
pub const MAX_NOTIFICATION_LIMIT: u32 = 200;

/// Runtime configuration for the realtime core.
///
/// Values come from defaults overridden by environment variables:
/// `SOUK_DB_PATH` for the real-time store location and
/// `SOUK_HEARTBEAT_SECS` for the presence heartbeat cadence.
pub struct CoreConfig {
    pub db_path: PathBuf,
    pub heartbeat_interval_secs: u64,
}

impl CoreConfig {
    pub fn from_env() -> Self {
        let db_path = std::env::var("SOUK_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                std::env::var("HOME")
                    .map(|h| PathBuf::from(h).join(".souk").join("realtime.db"))
                    .unwrap_or_else(|_| PathBuf::from("realtime.db"))
            });

        let heartbeat_interval_secs = std::env::var("SOUK_HEARTBEAT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(HEARTBEAT_INTERVAL_SECS);

        Self {
            db_path,
            heartbeat_interval_secs,
        }
    }

    /// Length of the presence lease: heartbeats older than this are stale.
    pub fn online_lease_secs(&self) -> u64 {
        self.heartbeat_interval_secs * ONLINE_LEASE_FACTOR
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
