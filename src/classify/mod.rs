//! Tier classification
//!
//! Configurable, monotonic thresholds mapping benchmark scores to the four
//! performance tiers.

mod classifier;
mod thresholds;

pub use classifier::*;
pub use thresholds::*;
