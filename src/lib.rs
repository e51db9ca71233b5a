//! # captier - Capability Detection & Adaptive Tiering
//!
//! captier answers two questions about the machine it runs on: which
//! hardware capabilities it supports, and how fast it is. It probes the CPU,
//! GPU, memory and I/O, runs bounded micro-benchmarks, and classifies the
//! platform into one of four performance tiers so callers can adapt quality
//! and workload size.
//!
//! ## Features
//!
//! - **Hardware Probing**: Pluggable probes; any subset may fail
//! - **Micro-benchmarks**: CPU, memory and storage workloads with per-benchmark budgets
//! - **Tier Classification**: Per-subsystem thresholds, minimum-tier rule
//! - **Capability Cache**: TTL, LRU eviction, XXH3 content hashes, LZ4 persistence
//! - **Fallbacks**: Conservative answers when detection cannot run
//! - **Change Notifications**: Listeners for capability and tier changes
//! - **Recommendations**: Settings for gaming, productivity and other use cases
//!
//! ## Quick Start
//!
//! ```no_run
//! use captier::config::CapabilityDetectionConfig;
//! use captier::core::Capability;
//! use captier::detect::DetectionOrchestrator;
//! use captier::system::SystemProbe;
//! use std::sync::Arc;
//!
//! let orchestrator = DetectionOrchestrator::new(Arc::new(SystemProbe::new()));
//! orchestrator.initialize(CapabilityDetectionConfig::default()).unwrap();
//!
//! let results = orchestrator.detect_capabilities(false).unwrap();
//! println!("Tier: {}", results.performance_tier);
//! println!("Compute shaders: {}", results.supports(Capability::ComputeShaders));
//! ```
//!
//! ## Reacting to Changes
//!
//! ```no_run
//! use captier::config::CapabilityDetectionConfig;
//! use captier::detect::{DetectionEvent, DetectionOrchestrator};
//! use captier::system::SystemProbe;
//! use std::sync::Arc;
//!
//! let orchestrator = DetectionOrchestrator::new(Arc::new(SystemProbe::new()));
//! orchestrator.initialize(CapabilityDetectionConfig::default()).unwrap();
//!
//! orchestrator.register_event_listener(|event| {
//!     if let DetectionEvent::TierChanged { old_tier, new_tier, .. } = event {
//!         println!("tier changed: {} -> {}", old_tier, new_tier);
//!     }
//! });
//! orchestrator.update_for_driver_change("gpu-driver").unwrap();
//! ```
//!
//! ## Predicting Hardware
//!
//! ```no_run
//! use captier::detect::predict_capabilities;
//! use std::collections::HashMap;
//!
//! let specs = HashMap::from([("platform".to_string(), "PSP".to_string())]);
//! let mask = predict_capabilities(&specs).unwrap();
//! println!("{:?}", mask.names());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod benchmark;
pub mod cache;
pub mod classify;
pub mod config;
pub mod core;
pub mod detect;
pub mod error;
pub mod hash;
pub mod progress;
pub mod system;

// Re-export commonly used types
pub use config::CapabilityDetectionConfig;
pub use core::{Capability, CapabilityMask, PerformanceTier};
pub use detect::{CapabilityDetectionResults, DetectionOrchestrator};
pub use error::{CapabilityError, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    //! Convenient re-exports for common usage
    //!
    //! ```no_run
    //! use captier::prelude::*;
    //! ```

    pub use crate::benchmark::{BenchmarkRunner, SystemBenchmarkResults};
    pub use crate::cache::{CapabilityCache, InvalidationReason};
    pub use crate::classify::{TierClassifier, TierThresholds};
    pub use crate::config::{BenchmarkConfig, CacheConfig, CapabilityDetectionConfig};
    pub use crate::core::{Capability, CapabilityMask, PerformanceTier, PlatformInfo, Subsystem};
    pub use crate::detect::{
        CapabilityChangeNotification, CapabilityDetectionResults, DetectionEvent, DetectionOrchestrator,
        FallbackProvider,
    };
    pub use crate::error::{CapabilityError, Result};
    pub use crate::progress::ProgressReporter;
    pub use crate::system::{HardwareProbe, StaticProbe, SystemProbe};
}
