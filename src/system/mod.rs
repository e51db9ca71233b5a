//! Hardware probing and feature analysis
//!
//! Provides the `HardwareProbe` interface, a host implementation and a
//! static one, plus the derivations from raw features to capabilities,
//! platform summaries and recommended settings.

mod capabilities;
mod features;
mod probe;
mod resources;
mod tuning;

pub use capabilities::*;
pub use features::*;
pub use probe::*;
pub use resources::*;
pub use tuning::*;
