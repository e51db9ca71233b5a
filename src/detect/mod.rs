//! Capability detection
//!
//! The orchestrator ties probing, benchmarking, classification and caching
//! together. Fallback answers, driver merging and prediction from a
//! hardware description live beside it.

mod driver;
mod fallback;
mod orchestrator;
mod prediction;
mod results;

pub use driver::*;
pub use fallback::*;
pub use orchestrator::*;
pub use prediction::*;
pub use results::*;
