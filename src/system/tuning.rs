//! Recommended runtime settings
//!
//! Turns a detected platform (tier, capability mask, core count, memory)
//! into concrete engine settings for a given use case.

use crate::core::{Capability, CapabilityMask, PerformanceTier, PlatformInfo};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// What the engine is being tuned for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UseCase {
    /// Frame rate and visual quality
    Gaming,
    /// Responsiveness with many background tasks
    Productivity,
    /// Battery life
    PowerSaving,
    /// Diagnostics enabled, moderate quality
    Development,
    /// Used for unrecognised names
    Balanced,
}

impl UseCase {
    /// Stable name
    pub fn name(self) -> &'static str {
        match self {
            UseCase::Gaming => "gaming",
            UseCase::Productivity => "productivity",
            UseCase::PowerSaving => "power_saving",
            UseCase::Development => "development",
            UseCase::Balanced => "balanced",
        }
    }
}

impl fmt::Display for UseCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for UseCase {
    type Err = std::convert::Infallible;

    /// Never fails; unknown names map to `Balanced`
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "gaming" | "game" => UseCase::Gaming,
            "productivity" => UseCase::Productivity,
            "power_saving" | "powersaving" | "battery" => UseCase::PowerSaving,
            "development" | "dev" => UseCase::Development,
            _ => UseCase::Balanced,
        })
    }
}

/// Area a setting applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettingCategory {
    /// Threading
    Cpu,
    /// Rendering
    Graphics,
    /// Audio mixing
    Audio,
    /// Memory budgets
    Memory,
    /// Storage and streaming
    Io,
}

/// One recommended setting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingRecommendation {
    /// Area the setting belongs to
    pub category: SettingCategory,
    /// Setting key (e.g. "worker_threads")
    pub key: String,
    /// Recommended value
    pub value: String,
    /// Short explanation shown to users
    pub rationale: String,
}

impl SettingRecommendation {
    fn new(
        category: SettingCategory,
        key: &str,
        value: impl ToString,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            category,
            key: key.to_string(),
            value: value.to_string(),
            rationale: rationale.into(),
        }
    }
}

/// Produces settings for a platform and use case
pub struct SettingsAdvisor {
    platform: PlatformInfo,
    capabilities: CapabilityMask,
    use_case: UseCase,
}

impl SettingsAdvisor {
    /// Create an advisor
    pub fn new(platform: PlatformInfo, capabilities: CapabilityMask, use_case: UseCase) -> Self {
        Self {
            platform,
            capabilities,
            use_case,
        }
    }

    /// All recommendations, grouped by category
    pub fn analyze(&self) -> Vec<SettingRecommendation> {
        let mut recommendations = Vec::new();
        recommendations.extend(self.analyze_cpu());
        recommendations.extend(self.analyze_graphics());
        recommendations.extend(self.analyze_audio());
        recommendations.extend(self.analyze_memory());
        recommendations.extend(self.analyze_io());
        recommendations
    }

    /// Recommendations flattened to `key -> value`
    pub fn as_map(&self) -> BTreeMap<String, String> {
        self.analyze()
            .into_iter()
            .map(|r| (r.key, r.value))
            .collect()
    }

    fn tier(&self) -> PerformanceTier {
        self.platform.tier
    }

    fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(capability)
    }

    fn analyze_cpu(&self) -> Vec<SettingRecommendation> {
        let cores = self.platform.cpu_cores.max(1);
        let threads = if !self.has(Capability::Threading) {
            1
        } else {
            match self.use_case {
                // Leave one core for the main/render thread
                UseCase::Gaming => cores.saturating_sub(1).max(1),
                UseCase::Productivity | UseCase::Development => cores,
                UseCase::PowerSaving => (cores / 4).max(1),
                UseCase::Balanced => (cores / 2).max(1),
            }
        };

        vec![SettingRecommendation::new(
            SettingCategory::Cpu,
            "worker_threads",
            threads,
            if self.has(Capability::Threading) {
                format!("{} hardware threads available", cores)
            } else {
                "platform has no threading support".to_string()
            },
        )]
    }

    fn analyze_graphics(&self) -> Vec<SettingRecommendation> {
        let mut recs = Vec::new();

        let quality = match (self.tier(), self.use_case) {
            (_, UseCase::PowerSaving) => "low",
            (PerformanceTier::High, UseCase::Gaming) => "ultra",
            (PerformanceTier::High, _) => "high",
            (PerformanceTier::Standard, _) => "medium",
            (PerformanceTier::Limited, _) => "low",
            (PerformanceTier::Minimal, _) => "minimal",
        };
        recs.push(SettingRecommendation::new(
            SettingCategory::Graphics,
            "render_quality",
            quality,
            format!("{} tier platform", self.tier()),
        ));

        let texture = match self.tier() {
            PerformanceTier::High => 4096,
            PerformanceTier::Standard => 2048,
            PerformanceTier::Limited => 512,
            PerformanceTier::Minimal => 256,
        };
        recs.push(SettingRecommendation::new(
            SettingCategory::Graphics,
            "max_texture_size",
            texture,
            "scaled to performance tier",
        ));

        let shader_path = if self.has(Capability::ComputeShaders) {
            "compute"
        } else if self.has(Capability::VertexShaders) && self.has(Capability::FragmentShaders) {
            "programmable"
        } else if self.has(Capability::Hardware3D) {
            "fixed_function"
        } else {
            "software"
        };
        recs.push(SettingRecommendation::new(
            SettingCategory::Graphics,
            "shader_path",
            shader_path,
            "highest shader stage the GPU confirmed",
        ));

        let fps = match (self.use_case, self.tier()) {
            (UseCase::PowerSaving, _) => 30,
            (UseCase::Gaming, PerformanceTier::High) => 144,
            (_, PerformanceTier::High | PerformanceTier::Standard) => 60,
            _ => 30,
        };
        recs.push(SettingRecommendation::new(
            SettingCategory::Graphics,
            "target_fps",
            fps,
            format!("{} on {} tier", self.use_case, self.tier()),
        ));

        recs
    }

    fn analyze_audio(&self) -> Vec<SettingRecommendation> {
        let channels = match (self.has(Capability::MultiChannelAudio), self.use_case) {
            (_, UseCase::PowerSaving) => 2,
            (true, UseCase::Gaming) => 8,
            (true, _) => 6,
            (false, _) => 2,
        };
        let mixing = if self.has(Capability::HardwareAudio) {
            "hardware"
        } else {
            "software"
        };

        vec![
            SettingRecommendation::new(
                SettingCategory::Audio,
                "audio_channels",
                channels,
                "multi-channel output support",
            ),
            SettingRecommendation::new(
                SettingCategory::Audio,
                "audio_mixing",
                mixing,
                "hardware mixing when the platform provides it",
            ),
        ]
    }

    fn analyze_memory(&self) -> Vec<SettingRecommendation> {
        let total_mb = self.platform.total_memory / (1024 * 1024);
        // Fraction of physical memory the engine should budget for itself
        let percent = match self.use_case {
            UseCase::Gaming => 60,
            UseCase::Productivity => 40,
            UseCase::PowerSaving => 25,
            UseCase::Development | UseCase::Balanced => 50,
        };
        let budget = if total_mb == 0 {
            // Unknown memory: assume a Minimal-class 16MB device
            8
        } else {
            (total_mb * percent / 100).max(1)
        };

        vec![SettingRecommendation::new(
            SettingCategory::Memory,
            "memory_budget_mb",
            budget,
            format!("{}% of {} MB", percent, total_mb),
        )]
    }

    fn analyze_io(&self) -> Vec<SettingRecommendation> {
        let async_io = self.has(Capability::AsyncIO) && self.use_case != UseCase::PowerSaving;
        let streaming = match self.tier() {
            PerformanceTier::High | PerformanceTier::Standard if async_io => "background",
            PerformanceTier::Minimal => "preload",
            _ => "on_demand",
        };

        vec![
            SettingRecommendation::new(
                SettingCategory::Io,
                "async_io",
                async_io,
                "asynchronous I/O support",
            ),
            SettingRecommendation::new(
                SettingCategory::Io,
                "asset_streaming",
                streaming,
                "streaming strategy for tier and I/O model",
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn platform(tier: PerformanceTier, cores: u32, memory_mb: u64) -> PlatformInfo {
        PlatformInfo {
            name: "test".into(),
            architecture: "x86_64".into(),
            tier,
            total_memory: memory_mb * 1024 * 1024,
            cpu_cores: cores,
            has_fpu: true,
            has_simd: true,
        }
    }

    fn desktop_mask() -> CapabilityMask {
        [
            Capability::Threading,
            Capability::Hardware3D,
            Capability::VertexShaders,
            Capability::FragmentShaders,
            Capability::ComputeShaders,
            Capability::MultiChannelAudio,
            Capability::AsyncIO,
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_use_case_parsing() {
        assert_eq!("Gaming".parse::<UseCase>().unwrap(), UseCase::Gaming);
        assert_eq!("power-saving".parse::<UseCase>().unwrap(), UseCase::PowerSaving);
        assert_eq!("server".parse::<UseCase>().unwrap(), UseCase::Balanced);
    }

    #[test]
    fn test_gaming_on_desktop() {
        let advisor = SettingsAdvisor::new(
            platform(PerformanceTier::High, 16, 32 * 1024),
            desktop_mask(),
            UseCase::Gaming,
        );
        let settings = advisor.as_map();
        assert_eq!(settings["worker_threads"], "15");
        assert_eq!(settings["render_quality"], "ultra");
        assert_eq!(settings["shader_path"], "compute");
        assert_eq!(settings["target_fps"], "144");
        assert_eq!(settings["asset_streaming"], "background");
    }

    #[test]
    fn test_single_threaded_console() {
        let advisor = SettingsAdvisor::new(
            platform(PerformanceTier::Minimal, 1, 16),
            CapabilityMask::from_bits(Capability::HardwareAudio.bit()),
            UseCase::Gaming,
        );
        let settings = advisor.as_map();
        assert_eq!(settings["worker_threads"], "1");
        assert_eq!(settings["shader_path"], "software");
        assert_eq!(settings["audio_mixing"], "hardware");
        assert_eq!(settings["asset_streaming"], "preload");
    }

    #[test]
    fn test_power_saving_is_conservative() {
        let advisor = SettingsAdvisor::new(
            platform(PerformanceTier::High, 8, 16 * 1024),
            desktop_mask(),
            UseCase::PowerSaving,
        );
        let settings = advisor.as_map();
        assert_eq!(settings["worker_threads"], "2");
        assert_eq!(settings["render_quality"], "low");
        assert_eq!(settings["target_fps"], "30");
        assert_eq!(settings["async_io"], "false");
    }
}
