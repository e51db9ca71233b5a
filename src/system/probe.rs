//! Hardware probe interface
//!
//! The low-level probing calls (CPUID, sysctl, graphics API queries) live
//! behind `HardwareProbe`. The detection pipeline only consumes it, and must
//! cope with any subset of the four calls failing.

use super::{CpuFeatures, GpuFeatures, HardwareFeatures, IoFeatures, MemoryFeatures};
use crate::core::{HardwareIdentity, Subsystem};
use crate::error::{CapabilityError, Result};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Source of raw hardware features
pub trait HardwareProbe: Send + Sync {
    /// Probe the CPU
    fn probe_cpu(&self) -> Result<CpuFeatures>;

    /// Probe the GPU
    fn probe_gpu(&self) -> Result<GpuFeatures>;

    /// Probe main memory
    fn probe_memory(&self) -> Result<MemoryFeatures>;

    /// Probe storage, network, input and audio devices
    fn probe_io(&self) -> Result<IoFeatures>;

    /// Cheap identity used for cache fingerprints
    ///
    /// The default asks the CPU and GPU probes for their model strings;
    /// implementations with a cheaper source should override it.
    fn identify(&self) -> HardwareIdentity {
        let mut identity = HardwareIdentity::host();
        if let Ok(cpu) = self.probe_cpu() {
            if let Some(arch) = cpu.architecture {
                identity.architecture = arch;
            }
            if let Some(model) = cpu.model {
                identity.cpu_model = model;
            }
        }
        if let Ok(Some(device)) = self.probe_gpu().map(|gpu| gpu.device_name) {
            identity.gpu_model = device;
        }
        identity
    }
}

/// Probe that answers from a fixed feature set
///
/// Used for platforms whose hardware is known at build time (consoles,
/// handhelds), for what-if simulation, and to script failures in tests.
pub struct StaticProbe {
    identity: HardwareIdentity,
    state: Mutex<StaticProbeState>,
    calls: [AtomicUsize; 4],
}

struct StaticProbeState {
    features: HardwareFeatures,
    failing: HashSet<Subsystem>,
    delay: Duration,
}

impl StaticProbe {
    /// Create a probe answering with `features`
    pub fn new(identity: HardwareIdentity, features: HardwareFeatures) -> Self {
        Self {
            identity,
            state: Mutex::new(StaticProbeState {
                features,
                failing: HashSet::new(),
                delay: Duration::ZERO,
            }),
            calls: Default::default(),
        }
    }

    /// An 8-core desktop with a shader-capable GPU
    pub fn desktop() -> Self {
        let features = HardwareFeatures {
            cpu: CpuFeatures {
                vendor: Some("GenuineIntel".into()),
                model: Some("Core i7-12700K".into()),
                architecture: Some("x86_64".into()),
                cores: Some(8),
                threads: Some(16),
                cache_line_size: Some(64),
                has_fpu: Some(true),
                has_atomics: Some(true),
                has_sse: Some(true),
                has_sse2: Some(true),
                has_sse4_1: Some(true),
                has_sse4_2: Some(true),
                has_avx: Some(true),
                has_avx2: Some(true),
                has_avx512: Some(false),
                has_neon: Some(false),
                has_aes: Some(true),
                l1_cache_kb: Some(48),
                l2_cache_kb: Some(1280),
                l3_cache_kb: Some(25600),
                base_frequency_mhz: Some(3600),
                max_frequency_mhz: Some(5000),
            },
            gpu: GpuFeatures {
                vendor: Some("NVIDIA".into()),
                device_name: Some("RTX 4070".into()),
                driver_version: Some("550.54".into()),
                supports_opengl: Some(true),
                supports_vulkan: Some(true),
                supports_directx: Some(false),
                supports_metal: Some(false),
                supports_webgl: Some(false),
                supports_2d_acceleration: Some(true),
                supports_vertex_shaders: Some(true),
                supports_fragment_shaders: Some(true),
                supports_geometry_shaders: Some(true),
                supports_compute_shaders: Some(true),
                supports_tessellation: Some(true),
                max_texture_size: Some(32768),
                total_memory: Some(12 * 1024 * 1024 * 1024),
                available_memory: Some(10 * 1024 * 1024 * 1024),
                shader_units: Some(5888),
            },
            memory: MemoryFeatures {
                total_physical: Some(32 * 1024 * 1024 * 1024),
                available_physical: Some(24 * 1024 * 1024 * 1024),
                total_virtual: Some(40 * 1024 * 1024 * 1024),
                available_virtual: Some(32 * 1024 * 1024 * 1024),
                page_size: Some(4096),
                supports_large_pages: Some(true),
                supports_numa: Some(false),
                supports_dma: Some(true),
                supports_virtual_memory: Some(true),
                supports_memory_protection: Some(true),
                bandwidth_mbps: None,
                latency_ns: None,
            },
            io: IoFeatures {
                supports_persistent_storage: Some(true),
                supports_async_io: Some(true),
                supports_memory_mapped_io: Some(true),
                supports_networking: Some(true),
                supports_wifi: Some(true),
                supports_bluetooth: Some(true),
                supports_ethernet: Some(true),
                supports_touch: Some(false),
                supports_multitouch: Some(false),
                supports_gamepad: Some(true),
                supports_accelerometer: Some(false),
                supports_audio_output: Some(true),
                supports_hardware_audio: Some(true),
                supports_multichannel_audio: Some(true),
                supports_hardware_effects: Some(false),
                max_audio_channels: Some(8),
                max_sample_rate: Some(192_000),
                supports_high_precision_timer: Some(true),
                supports_real_time_clock: Some(true),
                supports_power_management: Some(true),
                sandboxed: Some(false),
            },
        };
        let identity = HardwareIdentity {
            platform_name: "linux".into(),
            architecture: "x86_64".into(),
            cpu_model: "Core i7-12700K".into(),
            gpu_model: "RTX 4070".into(),
        };
        Self::new(identity, features)
    }

    /// A Dreamcast-class console: 16MB, one SH-4 core, fixed-function GPU
    pub fn retro_console() -> Self {
        let features = HardwareFeatures {
            cpu: CpuFeatures {
                vendor: Some("Hitachi".into()),
                model: Some("SH-4".into()),
                architecture: Some("SH-4".into()),
                cores: Some(1),
                threads: Some(1),
                cache_line_size: Some(32),
                has_fpu: Some(true),
                has_atomics: Some(false),
                l1_cache_kb: Some(16),
                base_frequency_mhz: Some(200),
                max_frequency_mhz: Some(200),
                ..Default::default()
            },
            gpu: GpuFeatures {
                vendor: Some("PowerVR".into()),
                device_name: Some("PowerVR2 CLX2".into()),
                supports_opengl: Some(false),
                supports_vulkan: Some(false),
                supports_2d_acceleration: Some(true),
                supports_vertex_shaders: Some(false),
                supports_fragment_shaders: Some(false),
                supports_compute_shaders: Some(false),
                total_memory: Some(8 * 1024 * 1024),
                ..Default::default()
            },
            memory: MemoryFeatures {
                total_physical: Some(16 * 1024 * 1024),
                available_physical: Some(12 * 1024 * 1024),
                page_size: Some(4096),
                supports_dma: Some(true),
                supports_virtual_memory: Some(false),
                supports_memory_protection: Some(false),
                ..Default::default()
            },
            io: IoFeatures {
                supports_persistent_storage: Some(true),
                supports_async_io: Some(false),
                supports_networking: Some(true),
                supports_wifi: Some(false),
                supports_gamepad: Some(true),
                supports_audio_output: Some(true),
                supports_hardware_audio: Some(true),
                supports_multichannel_audio: Some(true),
                max_audio_channels: Some(64),
                supports_real_time_clock: Some(true),
                ..Default::default()
            },
        };
        let identity = HardwareIdentity {
            platform_name: "dreamcast".into(),
            architecture: "SH-4".into(),
            cpu_model: "SH-4".into(),
            gpu_model: "PowerVR2 CLX2".into(),
        };
        Self::new(identity, features)
    }

    /// Make one subsystem's probe fail until `recover` is called
    pub fn fail(&self, subsystem: Subsystem) {
        self.state.lock().failing.insert(subsystem);
    }

    /// Undo `fail`
    pub fn recover(&self, subsystem: Subsystem) {
        self.state.lock().failing.remove(&subsystem);
    }

    /// Replace the reported features
    pub fn set_features(&self, features: HardwareFeatures) {
        self.state.lock().features = features;
    }

    /// Edit the reported features in place
    pub fn update_features(&self, edit: impl FnOnce(&mut HardwareFeatures)) {
        edit(&mut self.state.lock().features);
    }

    /// Artificial latency added to every probe call
    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().delay = delay;
    }

    /// How many times a subsystem was probed
    pub fn probe_count(&self, subsystem: Subsystem) -> usize {
        self.calls[Self::slot(subsystem)].load(Ordering::SeqCst)
    }

    fn slot(subsystem: Subsystem) -> usize {
        match subsystem {
            Subsystem::Cpu => 0,
            Subsystem::Gpu => 1,
            Subsystem::Memory => 2,
            Subsystem::Io => 3,
        }
    }

    fn answer<T>(&self, subsystem: Subsystem, pick: impl FnOnce(&HardwareFeatures) -> T) -> Result<T> {
        self.calls[Self::slot(subsystem)].fetch_add(1, Ordering::SeqCst);

        let (delay, result) = {
            let state = self.state.lock();
            let result = if state.failing.contains(&subsystem) {
                Err(CapabilityError::probe_unavailable(subsystem, "probe scripted to fail"))
            } else {
                Ok(pick(&state.features))
            };
            (state.delay, result)
        };

        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        result
    }
}

impl HardwareProbe for StaticProbe {
    fn probe_cpu(&self) -> Result<CpuFeatures> {
        self.answer(Subsystem::Cpu, |f| f.cpu.clone())
    }

    fn probe_gpu(&self) -> Result<GpuFeatures> {
        self.answer(Subsystem::Gpu, |f| f.gpu.clone())
    }

    fn probe_memory(&self) -> Result<MemoryFeatures> {
        self.answer(Subsystem::Memory, |f| f.memory.clone())
    }

    fn probe_io(&self) -> Result<IoFeatures> {
        self.answer(Subsystem::Io, |f| f.io.clone())
    }

    fn identify(&self) -> HardwareIdentity {
        self.identity.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_failure_and_recovery() {
        let probe = StaticProbe::desktop();
        probe.fail(Subsystem::Gpu);
        assert!(matches!(
            probe.probe_gpu(),
            Err(CapabilityError::ProbeUnavailable { subsystem: Subsystem::Gpu, .. })
        ));
        assert!(probe.probe_cpu().is_ok());

        probe.recover(Subsystem::Gpu);
        assert!(probe.probe_gpu().is_ok());
        assert_eq!(probe.probe_count(Subsystem::Gpu), 2);
    }

    #[test]
    fn test_default_identify_uses_probes() {
        struct CpuOnly;
        impl HardwareProbe for CpuOnly {
            fn probe_cpu(&self) -> Result<CpuFeatures> {
                Ok(CpuFeatures {
                    model: Some("Cortex-A78".into()),
                    architecture: Some("aarch64".into()),
                    ..Default::default()
                })
            }
            fn probe_gpu(&self) -> Result<GpuFeatures> {
                Err(CapabilityError::probe_unavailable(Subsystem::Gpu, "none"))
            }
            fn probe_memory(&self) -> Result<MemoryFeatures> {
                Ok(MemoryFeatures::default())
            }
            fn probe_io(&self) -> Result<IoFeatures> {
                Ok(IoFeatures::default())
            }
        }

        let identity = CpuOnly.identify();
        assert_eq!(identity.cpu_model, "Cortex-A78");
        assert_eq!(identity.architecture, "aarch64");
        assert_eq!(identity.gpu_model, HardwareIdentity::UNKNOWN);
    }

    #[test]
    fn test_update_features() {
        let probe = StaticProbe::retro_console();
        probe.update_features(|f| f.io.supports_wifi = Some(true));
        assert_eq!(probe.probe_io().unwrap().supports_wifi, Some(true));
    }
}
