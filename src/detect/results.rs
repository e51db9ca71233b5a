//! Detection results and change notifications

use crate::benchmark::SystemBenchmarkResults;
use crate::core::{Capability, CapabilityMask, PerformanceTier, PlatformInfo};
use crate::error::Result;
use crate::system::{CpuFeatures, GpuFeatures, HardwareFeatures, IoFeatures, MemoryFeatures};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Results came from a detection run that probed the hardware
pub const SOURCE_HARDWARE: &str = "hardware";
/// Results were rebuilt from cache entries
pub const SOURCE_CACHE: &str = "cache";
/// Results came from the fallback provider
pub const SOURCE_FALLBACK: &str = "fallback";

/// Full snapshot returned by a detection run
///
/// Immutable once returned; the next run supersedes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDetectionResults {
    /// When the run (or the cached run) happened
    pub detection_timestamp: DateTime<Utc>,
    /// Wall time of the call that produced these results
    pub detection_duration: Duration,
    /// False when every probe failed and fallback answers were used
    pub detection_successful: bool,
    /// "hardware", "cache" or "fallback"
    pub detection_source: String,
    /// Supported capabilities, driver bits included
    pub capability_mask: CapabilityMask,
    /// Overall performance tier
    pub performance_tier: PerformanceTier,
    /// Platform snapshot
    pub platform_info: PlatformInfo,
    /// Capabilities with a software fallback
    pub fallback_availability: BTreeMap<Capability, bool>,
    /// Capabilities reported by each driver
    pub driver_capabilities: BTreeMap<String, CapabilityMask>,
    /// CPU probe output
    pub cpu_features: CpuFeatures,
    /// GPU probe output
    pub gpu_features: GpuFeatures,
    /// Memory probe output
    pub memory_features: MemoryFeatures,
    /// I/O probe output
    pub io_features: IoFeatures,
    /// Benchmark run, absent in quick mode
    pub benchmark_results: Option<SystemBenchmarkResults>,
    /// Fraction of probes that answered
    pub hardware_confidence: f64,
    /// Fraction of attempted benchmarks that succeeded
    pub benchmark_confidence: f64,
    /// Combined confidence
    pub detection_confidence: f64,
    /// Absorbed subsystem failures and cross-check findings
    pub warnings: Vec<String>,
    /// Failures that made the run unsuccessful
    pub errors: Vec<String>,
}

impl CapabilityDetectionResults {
    /// Results with no facts, stamped `timestamp`
    pub fn empty(timestamp: DateTime<Utc>, source: &str) -> Self {
        Self {
            detection_timestamp: timestamp,
            detection_duration: Duration::ZERO,
            detection_successful: false,
            detection_source: source.to_string(),
            capability_mask: CapabilityMask::empty(),
            performance_tier: PerformanceTier::Minimal,
            platform_info: PlatformInfo::default(),
            fallback_availability: BTreeMap::new(),
            driver_capabilities: BTreeMap::new(),
            cpu_features: CpuFeatures::default(),
            gpu_features: GpuFeatures::default(),
            memory_features: MemoryFeatures::default(),
            io_features: IoFeatures::default(),
            benchmark_results: None,
            hardware_confidence: 0.0,
            benchmark_confidence: 0.0,
            detection_confidence: 0.0,
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Whether `capability` is supported
    pub fn supports(&self, capability: Capability) -> bool {
        self.capability_mask.contains(capability)
    }

    /// The four feature structs as one value
    pub fn hardware_features(&self) -> HardwareFeatures {
        HardwareFeatures {
            cpu: self.cpu_features.clone(),
            gpu: self.gpu_features.clone(),
            memory: self.memory_features.clone(),
            io: self.io_features.clone(),
        }
    }

    /// Replace the four feature structs
    pub fn set_hardware_features(&mut self, features: HardwareFeatures) {
        self.cpu_features = features.cpu;
        self.gpu_features = features.gpu;
        self.memory_features = features.memory;
        self.io_features = features.io;
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Combined confidence: `min(hardware, 0.5 + 0.5 * benchmark)`
///
/// A weighted minimum, so a perfect benchmark run cannot hide missing probes.
pub fn combined_confidence(hardware: f64, benchmark: f64) -> f64 {
    hardware.min(0.5 + 0.5 * benchmark).clamp(0.0, 1.0)
}

/// One capability or tier change between two runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityChangeNotification {
    /// When the change was observed
    pub timestamp: DateTime<Utc>,
    /// Capability that changed; `None` for a tier-only change
    pub capability: Option<Capability>,
    /// Support in the previous run
    pub was_supported: bool,
    /// Support in the new run
    pub now_supported: bool,
    /// Why the new run happened
    pub reason: String,
    /// Tier of the previous run
    pub old_tier: PerformanceTier,
    /// Tier of the new run
    pub new_tier: PerformanceTier,
}

impl CapabilityChangeNotification {
    /// Whether the tier differs between the two runs
    pub fn tier_changed(&self) -> bool {
        self.old_tier != self.new_tier
    }
}

/// Diff two runs
///
/// One notification per capability whose support changed, in bit order. A
/// tier change with no capability change yields a single notification with
/// `capability == None`.
pub fn compare_capability_results(
    old: &CapabilityDetectionResults,
    new: &CapabilityDetectionResults,
    reason: &str,
) -> Vec<CapabilityChangeNotification> {
    let old_tier = old.performance_tier;
    let new_tier = new.performance_tier;
    let timestamp = new.detection_timestamp;

    let mut changes: Vec<CapabilityChangeNotification> = Capability::ALL
        .into_iter()
        .filter(|cap| old.supports(*cap) != new.supports(*cap))
        .map(|cap| CapabilityChangeNotification {
            timestamp,
            capability: Some(cap),
            was_supported: old.supports(cap),
            now_supported: new.supports(cap),
            reason: reason.to_string(),
            old_tier,
            new_tier,
        })
        .collect();

    if changes.is_empty() && old_tier != new_tier {
        changes.push(CapabilityChangeNotification {
            timestamp,
            capability: None,
            was_supported: false,
            now_supported: false,
            reason: reason.to_string(),
            old_tier,
            new_tier,
        });
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results(mask: CapabilityMask, tier: PerformanceTier) -> CapabilityDetectionResults {
        let mut results = CapabilityDetectionResults::empty(Utc::now(), SOURCE_HARDWARE);
        results.capability_mask = mask;
        results.performance_tier = tier;
        results.detection_successful = true;
        results
    }

    #[test]
    fn test_empty_results_round_trip() {
        let results = CapabilityDetectionResults::empty(Utc::now(), SOURCE_FALLBACK);
        let back = CapabilityDetectionResults::from_json(&results.to_json().unwrap()).unwrap();
        assert_eq!(back, results);
        assert!(back.warnings.is_empty());
        assert_eq!(back.detection_confidence, 0.0);
    }

    #[test]
    fn test_populated_results_round_trip() {
        let mut results = results(
            [Capability::Threading, Capability::WiFi].into_iter().collect(),
            PerformanceTier::Standard,
        );
        results.hardware_confidence = 0.75;
        results.benchmark_confidence = 1.0 / 3.0;
        results.detection_confidence = combined_confidence(0.75, 1.0 / 3.0);
        results.cpu_features.cores = Some(8);
        results.gpu_features.supports_vulkan = Some(false);
        results.driver_capabilities.insert(
            "snd".into(),
            [Capability::AudioEffects].into_iter().collect(),
        );
        results.fallback_availability.insert(Capability::Hardware3D, true);
        results.benchmark_results = Some(SystemBenchmarkResults::empty(Utc::now()));
        results.warnings.push("gpu probe unavailable".into());
        results.errors.push("none".into());

        let back = CapabilityDetectionResults::from_json(&results.to_json().unwrap()).unwrap();
        assert_eq!(back, results);
    }

    #[test]
    fn test_confidence_is_weighted_minimum() {
        assert_eq!(combined_confidence(1.0, 1.0), 1.0);
        assert_eq!(combined_confidence(1.0, 0.0), 0.5);
        assert_eq!(combined_confidence(0.25, 1.0), 0.25);
        assert_eq!(combined_confidence(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_compare_reports_each_changed_capability() {
        let old = results(
            [Capability::WiFi, Capability::Threading].into_iter().collect(),
            PerformanceTier::High,
        );
        let new = results(
            [Capability::Threading, Capability::Bluetooth].into_iter().collect(),
            PerformanceTier::High,
        );

        let changes = compare_capability_results(&old, &new, "rescan");
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].capability, Some(Capability::WiFi));
        assert!(changes[0].was_supported && !changes[0].now_supported);
        assert_eq!(changes[1].capability, Some(Capability::Bluetooth));
        assert!(!changes[1].was_supported && changes[1].now_supported);
        assert!(changes.iter().all(|c| c.reason == "rescan" && !c.tier_changed()));
    }

    #[test]
    fn test_compare_tier_only_change() {
        let old = results(CapabilityMask::empty(), PerformanceTier::High);
        let new = results(CapabilityMask::empty(), PerformanceTier::Limited);

        let changes = compare_capability_results(&old, &new, "thermal");
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].capability, None);
        assert!(changes[0].tier_changed());
    }

    #[test]
    fn test_compare_identical_runs() {
        let run = results(
            [Capability::Networking].into_iter().collect(),
            PerformanceTier::Standard,
        );
        assert!(compare_capability_results(&run, &run.clone(), "again").is_empty());
    }
}
