//! Conservative answers when detection cannot run
//!
//! Seeded from what the build target guarantees, optionally refined by caller
//! hints and by whatever a failed detection run still managed to learn. It
//! under-reports: a capability is only claimed when the target or a probe
//! confirmed it.

use super::results::{CapabilityDetectionResults, SOURCE_FALLBACK};
use crate::core::{Capability, CapabilityMask, PerformanceTier, PlatformInfo};
use crate::error::{CapabilityError, Result};
use crate::system::software_fallbacks;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

/// Confidence of answers derived from build-target facts alone
pub const BASE_FALLBACK_CONFIDENCE: f64 = 0.3;
/// Confidence once caller hints were applied
const HINTED_CONFIDENCE: f64 = 0.5;
/// Upper bound; fallback answers never claim detection-grade confidence
const MAX_FALLBACK_CONFIDENCE: f64 = 0.8;

#[derive(Debug, Clone)]
struct FallbackState {
    capabilities: CapabilityMask,
    tier: PerformanceTier,
    platform: PlatformInfo,
    confidence: f64,
    hints: BTreeMap<String, String>,
}

/// Never-failing source of a capability mask and tier
pub struct FallbackProvider {
    state: RwLock<FallbackState>,
}

/// Capabilities the build target guarantees
fn target_capabilities() -> CapabilityMask {
    let mut mask = CapabilityMask::empty();
    let wasm = cfg!(target_arch = "wasm32");
    let hosted = cfg!(any(unix, windows));

    mask.set(Capability::Threading, !wasm && hosted);
    mask.set(Capability::AtomicOperations, cfg!(target_has_atomic = "ptr"));
    mask.set(Capability::VirtualMemory, hosted);
    mask.set(Capability::MemoryProtection, hosted);
    mask.set(Capability::HighPrecisionTimer, hosted);
    mask.set(Capability::PersistentStorage, hosted);
    mask.set(Capability::SandboxRestrictions, wasm);
    mask
}

fn target_platform(tier: PerformanceTier) -> PlatformInfo {
    PlatformInfo {
        name: std::env::consts::OS.to_string(),
        architecture: std::env::consts::ARCH.to_string(),
        tier,
        total_memory: 0,
        cpu_cores: 1,
        has_fpu: cfg!(any(target_arch = "x86_64", target_arch = "aarch64")),
        has_simd: cfg!(any(target_feature = "sse2", target_feature = "neon")),
    }
}

fn parse_hint<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| CapabilityError::config(format!("invalid value '{}' for hint '{}'", value, key)))
}

impl FallbackProvider {
    /// Provider seeded from the build target
    pub fn new() -> Self {
        let tier = if cfg!(any(unix, windows)) {
            PerformanceTier::Limited
        } else {
            PerformanceTier::Minimal
        };
        Self {
            state: RwLock::new(FallbackState {
                capabilities: target_capabilities(),
                tier,
                platform: target_platform(tier),
                confidence: BASE_FALLBACK_CONFIDENCE,
                hints: BTreeMap::new(),
            }),
        }
    }

    /// Apply caller-supplied platform hints
    ///
    /// Recognised keys: `platform`, `architecture`, `memory_mb`, `cpu_cores`,
    /// `tier`, `capabilities` (comma-separated names), `has_fpu`, `has_simd`.
    /// Other keys are kept but ignored. Nothing changes if any value is
    /// invalid.
    pub fn initialize_with_hints(&self, hints: &HashMap<String, String>) -> Result<()> {
        let mut next = self.state.read().clone();

        for (key, value) in hints {
            match key.as_str() {
                "platform" => next.platform.name = value.clone(),
                "architecture" => next.platform.architecture = value.clone(),
                "memory_mb" => {
                    next.platform.total_memory = parse_hint::<u64>(key, value)?.saturating_mul(1024 * 1024)
                }
                "cpu_cores" => {
                    let cores: u32 = parse_hint(key, value)?;
                    next.platform.cpu_cores = cores.max(1);
                    next.capabilities.set(Capability::Threading, cores > 1);
                }
                "tier" => next.tier = value.parse()?,
                "capabilities" => {
                    let names = value.split(',').map(str::trim).filter(|n| !n.is_empty());
                    next.capabilities |= CapabilityMask::from_names(names)?;
                }
                "has_fpu" => next.platform.has_fpu = parse_hint(key, value)?,
                "has_simd" => next.platform.has_simd = parse_hint(key, value)?,
                _ => tracing::debug!("Ignoring unknown fallback hint '{}'", key),
            }
            next.hints.insert(key.clone(), value.clone());
        }

        next.platform.tier = next.tier;
        next.confidence = next.confidence.max(HINTED_CONFIDENCE);
        *self.state.write() = next;
        tracing::debug!("Fallback provider seeded with {} hint(s)", hints.len());
        Ok(())
    }

    /// Learn from a detection run that did not complete
    ///
    /// Capability bits in `results` are confirmed facts and are adopted. The
    /// tier is capped at `Standard` since it was not measured.
    pub fn update_from_partial_results(&self, results: &CapabilityDetectionResults) {
        if results.hardware_confidence <= 0.0 {
            return;
        }

        let mut state = self.state.write();
        state.capabilities |= results.capability_mask;
        state.tier = results.performance_tier.min(PerformanceTier::Standard);

        let learned = &results.platform_info;
        if learned.total_memory > 0 {
            state.platform.total_memory = learned.total_memory;
        }
        if learned.cpu_cores > 0 {
            state.platform.cpu_cores = learned.cpu_cores;
        }
        if !learned.architecture.is_empty() {
            state.platform.architecture = learned.architecture.clone();
        }
        state.platform.has_fpu |= learned.has_fpu;
        state.platform.has_simd |= learned.has_simd;
        state.platform.tier = state.tier;

        let learned_confidence = BASE_FALLBACK_CONFIDENCE + 0.5 * results.hardware_confidence;
        state.confidence = state.confidence.max(learned_confidence).min(MAX_FALLBACK_CONFIDENCE);
        tracing::debug!(
            "Fallback provider updated from partial results: {} capabilities, tier {}",
            state.capabilities.count(),
            state.tier
        );
    }

    /// Whether a capability is claimed
    pub fn supports_capability(&self, capability: Capability) -> bool {
        self.state.read().capabilities.contains(capability)
    }

    /// Claimed capabilities
    pub fn capability_mask(&self) -> CapabilityMask {
        self.state.read().capabilities
    }

    /// Conservative tier
    pub fn performance_tier(&self) -> PerformanceTier {
        self.state.read().tier
    }

    /// Platform snapshot built from hints and partial results
    pub fn platform_info(&self) -> PlatformInfo {
        self.state.read().platform.clone()
    }

    /// Whether a software fallback exists for `capability`
    pub fn has_fallback(&self, capability: Capability) -> bool {
        software_fallbacks().get(&capability).copied().unwrap_or(false)
    }

    /// Confidence of the fallback answers
    pub fn get_fallback_confidence(&self) -> f64 {
        self.state.read().confidence
    }

    /// Hints applied so far
    pub fn hints(&self) -> BTreeMap<String, String> {
        self.state.read().hints.clone()
    }

    /// Fallback answers shaped as detection results
    pub fn results(&self, timestamp: DateTime<Utc>) -> CapabilityDetectionResults {
        let state = self.state.read();
        let mut results = CapabilityDetectionResults::empty(timestamp, SOURCE_FALLBACK);
        results.capability_mask = state.capabilities;
        results.performance_tier = state.tier;
        results.platform_info = state.platform.clone();
        results.fallback_availability = software_fallbacks();
        results.detection_confidence = state.confidence;
        results
    }
}

impl Default for FallbackProvider {
    fn default() -> Self {
        Self::new()
    }
}
