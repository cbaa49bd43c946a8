//! Real-time core for the Souk classifieds marketplace.
//!
//! Mirrors listing records from the primary transactional store into a
//! secondary real-time store, fans out notifications on domain events,
//! pushes row changes to subscribed consumers, and tracks user presence.

pub mod config;
pub mod conversations;
pub mod events;
pub mod fanout;
pub mod hub;
pub mod logging;
pub mod mirror;
pub mod presence;
pub mod store;
