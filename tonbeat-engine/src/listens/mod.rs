//! Counted-listen tracking and delivery
//!
//! `tracker` decides when elapsed playback qualifies as a counted listen;
//! `delivery` durably sends the resulting records to the backend with a
//! bounded retry queue.

pub mod delivery;
pub mod tracker;

pub use delivery::{ListenDelivery, ListenRecord};
pub use tracker::ListenTracker;
