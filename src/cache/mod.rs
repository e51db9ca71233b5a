//! Capability cache
//!
//! TTL-bounded storage for detection results keyed by hardware fingerprint,
//! with LRU eviction, optional on-disk persistence and a background updater.

mod clock;
mod entry;
mod persistence;
mod store;
mod updater;

pub use clock::*;
pub use entry::*;
pub use persistence::*;
pub use store::*;
pub use updater::*;
