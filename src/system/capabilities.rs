//! Deriving capabilities and platform summaries from raw features

use super::HardwareFeatures;
use crate::core::{Capability, CapabilityMask, HardwareIdentity, PerformanceTier, PlatformInfo};
use std::collections::BTreeMap;

const MIB: u64 = 1024 * 1024;

/// Build the capability mask from probe output
///
/// Only confirmed facts set a bit: a field the probe could not answer leaves
/// its capability cleared, so a failed GPU probe yields no GPU-gated bits.
pub fn capability_mask_from_features(features: &HardwareFeatures) -> CapabilityMask {
    let cpu = &features.cpu;
    let gpu = &features.gpu;
    let memory = &features.memory;
    let io = &features.io;
    let yes = |flag: Option<bool>| flag == Some(true);

    let mut mask = CapabilityMask::empty();
    mask.set(
        Capability::Threading,
        cpu.threads.or(cpu.cores).map(|n| n > 1).unwrap_or(false),
    );
    mask.set(Capability::AtomicOperations, yes(cpu.has_atomics));
    mask.set(Capability::DMA, yes(memory.supports_dma));
    mask.set(Capability::VirtualMemory, yes(memory.supports_virtual_memory));
    mask.set(Capability::MemoryProtection, yes(memory.supports_memory_protection));

    mask.set(Capability::Hardware3D, gpu.has_any_3d_api());
    mask.set(Capability::Hardware2D, yes(gpu.supports_2d_acceleration));
    mask.set(Capability::VertexShaders, yes(gpu.supports_vertex_shaders));
    mask.set(Capability::FragmentShaders, yes(gpu.supports_fragment_shaders));
    mask.set(Capability::ComputeShaders, yes(gpu.supports_compute_shaders));

    mask.set(Capability::HardwareAudio, yes(io.supports_hardware_audio));
    mask.set(Capability::MultiChannelAudio, yes(io.supports_multichannel_audio));
    mask.set(Capability::AudioEffects, yes(io.supports_hardware_effects));
    mask.set(Capability::MultiTouch, yes(io.supports_multitouch));
    mask.set(Capability::Accelerometer, yes(io.supports_accelerometer));
    mask.set(Capability::Gamepad, yes(io.supports_gamepad));
    mask.set(Capability::Networking, yes(io.supports_networking));
    mask.set(Capability::WiFi, yes(io.supports_wifi));
    mask.set(Capability::Bluetooth, yes(io.supports_bluetooth));
    mask.set(Capability::HighPrecisionTimer, yes(io.supports_high_precision_timer));
    mask.set(Capability::RealTimeClock, yes(io.supports_real_time_clock));
    mask.set(Capability::PersistentStorage, yes(io.supports_persistent_storage));
    mask.set(Capability::AsyncIO, yes(io.supports_async_io));
    mask.set(Capability::PowerManagement, yes(io.supports_power_management));
    mask.set(Capability::SandboxRestrictions, yes(io.sandboxed));
    mask
}

/// Tier estimate from features alone, used when benchmarks are skipped
///
/// Memory size drives the estimate. Unknown memory caps it at `Limited` and
/// a missing 3D pipeline caps it at `Standard`.
pub fn estimate_tier_from_features(features: &HardwareFeatures) -> PerformanceTier {
    let cores = features.cpu.cores.or(features.cpu.threads).unwrap_or(1);

    let by_memory = match features.memory.total_physical {
        None => PerformanceTier::Limited,
        Some(total) if total < 32 * MIB => PerformanceTier::Minimal,
        Some(total) if total < 256 * MIB => PerformanceTier::Limited,
        Some(total) if total < 4 * 1024 * MIB || cores < 4 => PerformanceTier::Standard,
        Some(_) => PerformanceTier::High,
    };

    if features.gpu.has_any_3d_api() {
        by_memory
    } else {
        by_memory.min(PerformanceTier::Standard)
    }
}

/// Summarise features into a platform snapshot
pub fn platform_info_from_features(
    identity: &HardwareIdentity,
    features: &HardwareFeatures,
    tier: PerformanceTier,
) -> PlatformInfo {
    let cpu = &features.cpu;
    PlatformInfo {
        name: identity.platform_name.clone(),
        architecture: cpu
            .architecture
            .clone()
            .unwrap_or_else(|| identity.architecture.clone()),
        tier,
        total_memory: features.memory.total_physical.unwrap_or(0),
        cpu_cores: cpu.threads.or(cpu.cores).unwrap_or(1),
        has_fpu: cpu.has_fpu == Some(true),
        has_simd: cpu.has_any_simd(),
    }
}

/// Whether a software fallback exists for a missing capability
///
/// Rendering and audio mixing can run in software; threading and networking
/// cannot be emulated.
pub fn software_fallbacks() -> BTreeMap<Capability, bool> {
    BTreeMap::from([
        (Capability::Hardware3D, true),
        (Capability::Hardware2D, true),
        (Capability::HardwareAudio, true),
        (Capability::Threading, false),
        (Capability::Networking, false),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::HardwareIdentity;
    use crate::system::{GpuFeatures, HardwareProbe, StaticProbe};

    fn desktop_features() -> HardwareFeatures {
        let probe = StaticProbe::desktop();
        HardwareFeatures {
            cpu: probe.probe_cpu().unwrap(),
            gpu: probe.probe_gpu().unwrap(),
            memory: probe.probe_memory().unwrap(),
            io: probe.probe_io().unwrap(),
        }
    }

    #[test]
    fn test_desktop_mask() {
        let mask = capability_mask_from_features(&desktop_features());
        assert!(mask.contains(Capability::Threading));
        assert!(mask.contains(Capability::ComputeShaders));
        assert!(mask.contains(Capability::Networking));
        assert!(!mask.contains(Capability::MultiTouch));
        assert!(!mask.contains(Capability::SandboxRestrictions));
    }

    #[test]
    fn test_unknown_gpu_sets_no_gpu_bits() {
        let mut features = desktop_features();
        features.gpu = GpuFeatures::default();
        let mask = capability_mask_from_features(&features);
        assert!(mask.intersection(CapabilityMask::GPU_GATED).is_empty());
        assert!(mask.contains(Capability::Threading));
    }

    #[test]
    fn test_feature_tier_estimates() {
        assert_eq!(estimate_tier_from_features(&desktop_features()), PerformanceTier::High);

        let console = StaticProbe::retro_console();
        let features = HardwareFeatures {
            cpu: console.probe_cpu().unwrap(),
            gpu: console.probe_gpu().unwrap(),
            memory: console.probe_memory().unwrap(),
            io: console.probe_io().unwrap(),
        };
        assert_eq!(estimate_tier_from_features(&features), PerformanceTier::Minimal);

        assert_eq!(
            estimate_tier_from_features(&HardwareFeatures::default()),
            PerformanceTier::Limited
        );
    }

    #[test]
    fn test_missing_3d_caps_tier() {
        let mut features = desktop_features();
        features.gpu = GpuFeatures::default();
        assert_eq!(estimate_tier_from_features(&features), PerformanceTier::Standard);
    }

    #[test]
    fn test_platform_info() {
        let identity = HardwareIdentity::host();
        let info = platform_info_from_features(&identity, &desktop_features(), PerformanceTier::High);
        assert_eq!(info.cpu_cores, 16);
        assert!(info.has_simd);
        assert_eq!(info.total_memory, 32 * 1024 * MIB);
    }
}
