//! Raw hardware feature structs reported by probes
//!
//! Every field is an `Option`: `None` means the probe did not answer, which
//! is different from `Some(false)`. Capability derivation only ever trusts
//! `Some(true)`.

use serde::{Deserialize, Serialize};

/// CPU features
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuFeatures {
    /// Vendor (GenuineIntel, AuthenticAMD, ARM, ...)
    pub vendor: Option<String>,
    /// Model name
    pub model: Option<String>,
    /// Architecture (x86_64, aarch64, SH-4, ...)
    pub architecture: Option<String>,
    /// Physical cores
    pub cores: Option<u32>,
    /// Logical threads
    pub threads: Option<u32>,
    /// Cache line size in bytes
    pub cache_line_size: Option<u32>,
    /// Floating-point unit
    pub has_fpu: Option<bool>,
    /// Hardware atomic read-modify-write instructions
    pub has_atomics: Option<bool>,
    /// SSE
    pub has_sse: Option<bool>,
    /// SSE2
    pub has_sse2: Option<bool>,
    /// SSE4.1
    pub has_sse4_1: Option<bool>,
    /// SSE4.2
    pub has_sse4_2: Option<bool>,
    /// AVX
    pub has_avx: Option<bool>,
    /// AVX2
    pub has_avx2: Option<bool>,
    /// AVX-512 foundation
    pub has_avx512: Option<bool>,
    /// ARM NEON
    pub has_neon: Option<bool>,
    /// AES acceleration
    pub has_aes: Option<bool>,
    /// L1 data cache in KB
    pub l1_cache_kb: Option<u32>,
    /// L2 cache in KB
    pub l2_cache_kb: Option<u32>,
    /// L3 cache in KB
    pub l3_cache_kb: Option<u32>,
    /// Base frequency in MHz
    pub base_frequency_mhz: Option<u32>,
    /// Maximum frequency in MHz
    pub max_frequency_mhz: Option<u32>,
}

impl CpuFeatures {
    /// Whether any SIMD extension is confirmed present
    pub fn has_any_simd(&self) -> bool {
        [
            self.has_sse,
            self.has_sse2,
            self.has_sse4_1,
            self.has_sse4_2,
            self.has_avx,
            self.has_avx2,
            self.has_avx512,
            self.has_neon,
        ]
        .iter()
        .any(|flag| *flag == Some(true))
    }
}

/// GPU features
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuFeatures {
    /// Vendor (NVIDIA, AMD, Intel, PowerVR, ...)
    pub vendor: Option<String>,
    /// Device name
    pub device_name: Option<String>,
    /// Driver version
    pub driver_version: Option<String>,
    /// OpenGL/OpenGL ES
    pub supports_opengl: Option<bool>,
    /// Vulkan
    pub supports_vulkan: Option<bool>,
    /// Direct3D
    pub supports_directx: Option<bool>,
    /// Metal
    pub supports_metal: Option<bool>,
    /// WebGL
    pub supports_webgl: Option<bool>,
    /// Accelerated 2D blitting
    pub supports_2d_acceleration: Option<bool>,
    /// Vertex shaders
    pub supports_vertex_shaders: Option<bool>,
    /// Fragment shaders
    pub supports_fragment_shaders: Option<bool>,
    /// Geometry shaders
    pub supports_geometry_shaders: Option<bool>,
    /// Compute shaders
    pub supports_compute_shaders: Option<bool>,
    /// Tessellation
    pub supports_tessellation: Option<bool>,
    /// Maximum texture dimension
    pub max_texture_size: Option<u32>,
    /// Total video memory in bytes
    pub total_memory: Option<u64>,
    /// Available video memory in bytes
    pub available_memory: Option<u64>,
    /// Shader units
    pub shader_units: Option<u32>,
}

impl GpuFeatures {
    /// Whether any 3D API is confirmed
    pub fn has_any_3d_api(&self) -> bool {
        [
            self.supports_opengl,
            self.supports_vulkan,
            self.supports_directx,
            self.supports_metal,
            self.supports_webgl,
        ]
        .iter()
        .any(|flag| *flag == Some(true))
    }
}

/// Memory features
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryFeatures {
    /// Total physical memory in bytes
    pub total_physical: Option<u64>,
    /// Available physical memory in bytes
    pub available_physical: Option<u64>,
    /// Total virtual memory (physical + swap) in bytes
    pub total_virtual: Option<u64>,
    /// Available virtual memory in bytes
    pub available_virtual: Option<u64>,
    /// Page size in bytes
    pub page_size: Option<u32>,
    /// Large/huge page support
    pub supports_large_pages: Option<bool>,
    /// NUMA topology with more than one node
    pub supports_numa: Option<bool>,
    /// Direct memory access
    pub supports_dma: Option<bool>,
    /// Paged virtual memory
    pub supports_virtual_memory: Option<bool>,
    /// Memory protection
    pub supports_memory_protection: Option<bool>,
    /// Measured bandwidth in MB/s
    pub bandwidth_mbps: Option<u32>,
    /// Measured latency in nanoseconds
    pub latency_ns: Option<u32>,
}

/// I/O, input, audio and platform-service features
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoFeatures {
    /// Persistent storage available
    pub supports_persistent_storage: Option<bool>,
    /// Asynchronous I/O
    pub supports_async_io: Option<bool>,
    /// Memory-mapped I/O
    pub supports_memory_mapped_io: Option<bool>,
    /// Network connectivity
    pub supports_networking: Option<bool>,
    /// WiFi
    pub supports_wifi: Option<bool>,
    /// Bluetooth
    pub supports_bluetooth: Option<bool>,
    /// Wired ethernet
    pub supports_ethernet: Option<bool>,
    /// Touch input
    pub supports_touch: Option<bool>,
    /// Multi-touch input
    pub supports_multitouch: Option<bool>,
    /// Gamepad input
    pub supports_gamepad: Option<bool>,
    /// Accelerometer
    pub supports_accelerometer: Option<bool>,
    /// Audio output
    pub supports_audio_output: Option<bool>,
    /// Hardware-accelerated audio mixing
    pub supports_hardware_audio: Option<bool>,
    /// Multi-channel audio
    pub supports_multichannel_audio: Option<bool>,
    /// Hardware audio effects/DSP
    pub supports_hardware_effects: Option<bool>,
    /// Maximum audio channels
    pub max_audio_channels: Option<u32>,
    /// Maximum sample rate in Hz
    pub max_sample_rate: Option<u32>,
    /// High-precision monotonic timer
    pub supports_high_precision_timer: Option<bool>,
    /// Battery-backed real-time clock
    pub supports_real_time_clock: Option<bool>,
    /// Power state management
    pub supports_power_management: Option<bool>,
    /// Host imposes sandbox restrictions
    pub sandboxed: Option<bool>,
}

/// All four feature structs from one probing pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareFeatures {
    /// CPU features
    pub cpu: CpuFeatures,
    /// GPU features
    pub gpu: GpuFeatures,
    /// Memory features
    pub memory: MemoryFeatures,
    /// I/O features
    pub io: IoFeatures,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_unknown_not_false() {
        let gpu = GpuFeatures::default();
        assert_eq!(gpu.supports_vertex_shaders, None);
        assert!(!gpu.has_any_3d_api());
    }

    #[test]
    fn test_simd_requires_confirmation() {
        let mut cpu = CpuFeatures {
            has_sse2: Some(false),
            ..Default::default()
        };
        assert!(!cpu.has_any_simd());
        cpu.has_neon = Some(true);
        assert!(cpu.has_any_simd());
    }
}
