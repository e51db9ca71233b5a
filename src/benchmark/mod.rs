//! Micro-benchmarking
//!
//! Bounded per-subsystem workloads producing normalised, unit-less scores
//! and a fixed-weight overall score.

mod results;
mod runner;
mod workloads;

pub use results::*;
pub use runner::*;
pub use workloads::*;
