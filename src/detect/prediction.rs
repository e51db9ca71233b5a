//! Capability prediction for hypothetical hardware
//!
//! A static rule table maps vendor/model strings to the capabilities that
//! hardware is known to have. When no rule matches, the CPU architecture
//! family supplies a generic answer. Pure: no probing, no cache access.

use crate::core::{Capability, CapabilityMask, PerformanceTier};
use crate::error::{CapabilityError, Result};
use serde::Serialize;
use std::collections::HashMap;

use Capability::*;

/// One entry of the rule table
struct PredictionRule {
    name: &'static str,
    /// Keys inspected, lowercase
    keys: &'static [&'static str],
    /// Lowercase substrings, any of which matches
    patterns: &'static [&'static str],
    capabilities: &'static [Capability],
    tier: PerformanceTier,
}

const CPU_KEYS: &[&str] = &["cpu_vendor", "cpu_model", "cpu"];
const GPU_KEYS: &[&str] = &["gpu_vendor", "gpu_model", "gpu"];
const PLATFORM_KEYS: &[&str] = &["platform"];
const ARCH_KEYS: &[&str] = &["architecture", "arch", "cpu_architecture"];

const DESKTOP_CPU: &[Capability] = &[
    Threading,
    AtomicOperations,
    VirtualMemory,
    MemoryProtection,
    HighPrecisionTimer,
    AsyncIO,
];
const PROGRAMMABLE_GPU: &[Capability] = &[Hardware3D, Hardware2D, VertexShaders, FragmentShaders];

static RULES: &[PredictionRule] = &[
    PredictionRule {
        name: "dreamcast",
        keys: PLATFORM_KEYS,
        patterns: &["dreamcast"],
        capabilities: &[
            Hardware3D,
            Hardware2D,
            HardwareAudio,
            MultiChannelAudio,
            DMA,
            Gamepad,
            PersistentStorage,
            RealTimeClock,
        ],
        tier: PerformanceTier::Minimal,
    },
    PredictionRule {
        name: "psp",
        keys: PLATFORM_KEYS,
        patterns: &["psp", "playstation portable"],
        capabilities: &[
            Hardware3D,
            Hardware2D,
            HardwareAudio,
            DMA,
            Gamepad,
            Networking,
            WiFi,
            PersistentStorage,
            PowerManagement,
            RealTimeClock,
        ],
        tier: PerformanceTier::Limited,
    },
    PredictionRule {
        name: "web",
        keys: PLATFORM_KEYS,
        patterns: &["web", "browser", "wasm", "emscripten"],
        capabilities: &[
            Hardware3D,
            Hardware2D,
            VertexShaders,
            FragmentShaders,
            Networking,
            PersistentStorage,
            AsyncIO,
            SandboxRestrictions,
        ],
        tier: PerformanceTier::Limited,
    },
    PredictionRule {
        name: "desktop_os",
        keys: PLATFORM_KEYS,
        patterns: &["windows", "linux", "macos", "mac os"],
        capabilities: &[Networking, PersistentStorage, RealTimeClock, HighPrecisionTimer, AsyncIO],
        tier: PerformanceTier::Standard,
    },
    PredictionRule {
        name: "sh4_cpu",
        keys: CPU_KEYS,
        patterns: &["sh-4", "sh4"],
        capabilities: &[DMA, RealTimeClock],
        tier: PerformanceTier::Minimal,
    },
    PredictionRule {
        name: "mips_cpu",
        keys: CPU_KEYS,
        patterns: &["mips", "r4000", "allegrex"],
        capabilities: &[DMA],
        tier: PerformanceTier::Limited,
    },
    PredictionRule {
        name: "x86_desktop_cpu",
        keys: CPU_KEYS,
        patterns: &["intel", "amd", "ryzen", "core i", "i3-", "i5-", "i7-", "i9-", "xeon", "epyc"],
        capabilities: DESKTOP_CPU,
        tier: PerformanceTier::High,
    },
    PredictionRule {
        name: "arm_application_cpu",
        keys: CPU_KEYS,
        patterns: &["cortex-a", "apple m", "snapdragon", "neoverse"],
        capabilities: &[Threading, AtomicOperations, VirtualMemory, MemoryProtection, HighPrecisionTimer],
        tier: PerformanceTier::Standard,
    },
    PredictionRule {
        name: "desktop_gpu",
        keys: GPU_KEYS,
        patterns: &["nvidia", "geforce", "rtx", "gtx", "radeon", "rx ", "amd", "arc "],
        capabilities: &[Hardware3D, Hardware2D, VertexShaders, FragmentShaders, ComputeShaders],
        tier: PerformanceTier::High,
    },
    PredictionRule {
        name: "mobile_gpu",
        keys: GPU_KEYS,
        patterns: &["mali", "adreno", "powervr sgx", "apple gpu"],
        capabilities: PROGRAMMABLE_GPU,
        tier: PerformanceTier::Standard,
    },
    PredictionRule {
        name: "fixed_function_gpu",
        keys: GPU_KEYS,
        patterns: &["powervr2", "powervr 2", "graphics synthesizer", "gpu (psp)"],
        capabilities: &[Hardware3D, Hardware2D],
        tier: PerformanceTier::Minimal,
    },
];

/// Generic answer per CPU architecture family
struct ArchitectureFamily {
    name: &'static str,
    patterns: &'static [&'static str],
    capabilities: &'static [Capability],
    tier: PerformanceTier,
}

static FAMILIES: &[ArchitectureFamily] = &[
    ArchitectureFamily {
        name: "x86",
        patterns: &["x86_64", "x86-64", "amd64", "x86", "i686", "i386"],
        capabilities: DESKTOP_CPU,
        tier: PerformanceTier::Standard,
    },
    ArchitectureFamily {
        name: "arm",
        patterns: &["aarch64", "arm64", "armv8", "armv7", "arm"],
        capabilities: &[Threading, AtomicOperations, VirtualMemory, MemoryProtection],
        tier: PerformanceTier::Limited,
    },
    ArchitectureFamily {
        name: "riscv",
        patterns: &["riscv", "risc-v"],
        capabilities: &[AtomicOperations, VirtualMemory, MemoryProtection],
        tier: PerformanceTier::Limited,
    },
    ArchitectureFamily {
        name: "wasm",
        patterns: &["wasm"],
        capabilities: &[SandboxRestrictions],
        tier: PerformanceTier::Limited,
    },
    ArchitectureFamily {
        name: "mips",
        patterns: &["mips"],
        capabilities: &[DMA],
        tier: PerformanceTier::Minimal,
    },
    ArchitectureFamily {
        name: "superh",
        patterns: &["sh-4", "sh4", "superh"],
        capabilities: &[DMA],
        tier: PerformanceTier::Minimal,
    },
];

/// What a prediction matched and produced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HardwarePrediction {
    /// Predicted capabilities
    pub capabilities: CapabilityMask,
    /// Most conservative tier among matched rules
    pub tier: PerformanceTier,
    /// Names of the rules (or the architecture family) that matched
    pub matched: Vec<&'static str>,
    /// True when only an architecture family matched
    pub generic: bool,
}

/// Copy of the hardware description with keys and values lowercased
fn normalise(specs: &HashMap<String, String>) -> HashMap<String, String> {
    specs
        .iter()
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_ascii_lowercase()))
        .collect()
}

fn any_value_matches(specs: &HashMap<String, String>, keys: &[&str], patterns: &[&str]) -> bool {
    keys.iter()
        .filter_map(|key| specs.get(*key))
        .any(|value| patterns.iter().any(|p| value.contains(p)))
}

/// Predict capabilities and tier for a hardware description
///
/// Keys: `platform`, `cpu_vendor`, `cpu_model`, `cpu`, `gpu_vendor`,
/// `gpu_model`, `gpu`, `architecture`. Matching is case-insensitive by
/// substring; every matching rule contributes its capabilities.
pub fn predict_hardware(specs: &HashMap<String, String>) -> Result<HardwarePrediction> {
    let specs = normalise(specs);

    let matched: Vec<&PredictionRule> = RULES
        .iter()
        .filter(|rule| any_value_matches(&specs, rule.keys, rule.patterns))
        .collect();

    if !matched.is_empty() {
        return Ok(HardwarePrediction {
            capabilities: matched
                .iter()
                .flat_map(|rule| rule.capabilities.iter().copied())
                .collect(),
            tier: matched
                .iter()
                .map(|rule| rule.tier)
                .min()
                .unwrap_or(PerformanceTier::Minimal),
            matched: matched.iter().map(|rule| rule.name).collect(),
            generic: false,
        });
    }

    // Fall back to the architecture family, from an explicit key or the CPU strings
    let family = FAMILIES.iter().find(|family| {
        any_value_matches(&specs, ARCH_KEYS, family.patterns) || any_value_matches(&specs, CPU_KEYS, family.patterns)
    });

    match family {
        Some(family) => Ok(HardwarePrediction {
            capabilities: family.capabilities.iter().copied().collect(),
            tier: family.tier,
            matched: vec![family.name],
            generic: true,
        }),
        None => {
            let mut described: Vec<String> = specs.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            described.sort();
            Err(CapabilityError::UnknownHardwareProfile(format!("{{{}}}", described.join(", "))))
        }
    }
}

/// Predicted capability mask for a hardware description
pub fn predict_capabilities(specs: &HashMap<String, String>) -> Result<CapabilityMask> {
    predict_hardware(specs).map(|prediction| prediction.capabilities)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_high_end_desktop() {
        let prediction = predict_hardware(&specs(&[
            ("cpu_vendor", "Intel"),
            ("cpu_model", "i7-12700K"),
            ("gpu_vendor", "NVIDIA"),
            ("gpu_model", "RTX 4070"),
        ]))
        .unwrap();
        assert!(prediction.capabilities.contains(ComputeShaders));
        assert!(prediction.capabilities.contains(Threading));
        assert_eq!(prediction.tier, PerformanceTier::High);
        assert!(!prediction.generic);
    }

    #[test]
    fn test_amd_desktop() {
        let mask = predict_capabilities(&specs(&[
            ("cpu_vendor", "AMD"),
            ("cpu_model", "Ryzen 7 5800X"),
            ("gpu_vendor", "AMD"),
            ("gpu_model", "RX 6700 XT"),
        ]))
        .unwrap();
        assert!(mask.contains(VertexShaders));
        assert!(mask.contains(AsyncIO));
    }

    #[test]
    fn test_mobile_soc() {
        let prediction = predict_hardware(&specs(&[
            ("cpu_vendor", "ARM"),
            ("cpu_model", "Cortex-A78"),
            ("gpu_vendor", "ARM"),
            ("gpu_model", "Mali G78"),
        ]))
        .unwrap();
        assert!(prediction.capabilities.contains(FragmentShaders));
        assert!(!prediction.capabilities.contains(ComputeShaders));
        assert_eq!(prediction.tier, PerformanceTier::Standard);
    }

    #[test]
    fn test_retro_consoles() {
        let dreamcast = predict_hardware(&specs(&[
            ("platform", "Dreamcast"),
            ("cpu", "SH-4"),
            ("gpu", "PowerVR2"),
        ]))
        .unwrap();
        assert!(dreamcast.capabilities.contains(Hardware3D));
        assert!(!dreamcast.capabilities.contains(VertexShaders));
        assert!(!dreamcast.capabilities.contains(Threading));
        assert_eq!(dreamcast.tier, PerformanceTier::Minimal);

        let psp = predict_hardware(&specs(&[
            ("platform", "PSP"),
            ("cpu", "MIPS R4000"),
            ("gpu", "Graphics Synthesizer"),
        ]))
        .unwrap();
        assert!(psp.capabilities.contains(WiFi));
        assert!(psp.capabilities.contains(PowerManagement));
        assert_eq!(psp.tier, PerformanceTier::Minimal);
    }

    #[test]
    fn test_architecture_family_fallback() {
        let prediction = predict_hardware(&specs(&[("architecture", "aarch64"), ("cpu_model", "custom")])).unwrap();
        assert!(prediction.generic);
        assert_eq!(prediction.matched, vec!["arm"]);
        assert!(prediction.capabilities.contains(AtomicOperations));
    }

    #[test]
    fn test_unknown_profile() {
        let err = predict_capabilities(&specs(&[("cpu_model", "Z80"), ("gpu_model", "VDP")])).unwrap_err();
        assert!(matches!(err, CapabilityError::UnknownHardwareProfile(_)));
        assert!(predict_capabilities(&HashMap::new()).is_err());
    }
}
