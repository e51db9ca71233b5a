//! Progress reporting module
//!
//! Terminal display of a detection run's phase and estimated progress.

mod reporter;

pub use reporter::*;
