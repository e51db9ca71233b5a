//! Platform identity and summary

use super::PerformanceTier;
use serde::{Deserialize, Serialize};

/// Snapshot of the platform, immutable once a detection run produced it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformInfo {
    /// Human-readable platform name
    pub name: String,
    /// CPU architecture (e.g. "SH-4", "mips", "x86_64")
    pub architecture: String,
    /// Derived performance tier
    pub tier: PerformanceTier,
    /// Total system memory in bytes (0 when unknown)
    pub total_memory: u64,
    /// Number of CPU cores/threads
    pub cpu_cores: u32,
    /// Floating-point unit available
    pub has_fpu: bool,
    /// SIMD instructions available
    pub has_simd: bool,
}

/// Identity used to derive cache fingerprints
///
/// Two runs on the same machine must produce the same identity so that a
/// restart reuses cached results instead of benchmarking again.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HardwareIdentity {
    /// Platform/OS name
    pub platform_name: String,
    /// CPU architecture
    pub architecture: String,
    /// CPU model string ("unknown" when the probe did not answer)
    pub cpu_model: String,
    /// GPU model string ("unknown" when the probe did not answer)
    pub gpu_model: String,
}

impl HardwareIdentity {
    /// Placeholder for fields a probe could not report
    pub const UNKNOWN: &'static str = "unknown";

    /// Identity of the host this binary was compiled for, models unknown
    pub fn host() -> Self {
        Self {
            platform_name: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            cpu_model: Self::UNKNOWN.to_string(),
            gpu_model: Self::UNKNOWN.to_string(),
        }
    }

    /// Stable fingerprint over all identity fields
    pub fn fingerprint(&self) -> String {
        crate::hash::fingerprint_fields(&[
            &self.platform_name,
            &self.architecture,
            &self.cpu_model,
            &self.gpu_model,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(cpu: &str) -> HardwareIdentity {
        HardwareIdentity {
            platform_name: "linux".into(),
            architecture: "x86_64".into(),
            cpu_model: cpu.into(),
            gpu_model: "RTX 4070".into(),
        }
    }

    #[test]
    fn test_fingerprint_is_stable() {
        assert_eq!(identity("i7").fingerprint(), identity("i7").fingerprint());
    }

    #[test]
    fn test_fingerprint_changes_with_hardware() {
        assert_ne!(identity("i7").fingerprint(), identity("i9").fingerprint());
    }
}
