//! Core data model
//!
//! Capability bitmasks, performance tiers, platform identity and the
//! callback registry shared by the cache and the detection orchestrator.

mod capability;
mod listeners;
mod platform;
mod tier;

pub use capability::*;
pub use listeners::*;
pub use platform::*;
pub use tier::*;
