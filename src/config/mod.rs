//! Configuration module for captier
//!
//! Provides the detection/cache/benchmark configuration value objects,
//! their named profiles, and the command-line arguments.

mod detection;
mod settings;

pub use detection::*;
pub use settings::*;
