//! Host hardware probe
//!
//! Reads CPU, memory, storage and network facts through `sysinfo`, CPU
//! feature flags through the standard library's runtime detection macros,
//! and GPU/peripheral presence from sysfs on Linux. Anything the host does
//! not expose is reported as unknown.

use super::{CpuFeatures, GpuFeatures, HardwareProbe, IoFeatures, MemoryFeatures};
use crate::core::{HardwareIdentity, Subsystem};
use crate::error::{CapabilityError, Result};
use std::path::Path;
use sysinfo::{CpuRefreshKind, Disks, MemoryRefreshKind, Networks, RefreshKind, System};

/// Probe backed by the running host
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl SystemProbe {
    /// Create a host probe
    pub fn new() -> Self {
        Self
    }

    fn cpu_system() -> System {
        System::new_with_specifics(RefreshKind::new().with_cpu(CpuRefreshKind::everything()))
    }

    fn memory_system() -> System {
        System::new_with_specifics(RefreshKind::new().with_memory(MemoryRefreshKind::everything()))
    }
}

impl HardwareProbe for SystemProbe {
    fn probe_cpu(&self) -> Result<CpuFeatures> {
        let sys = Self::cpu_system();
        let cpus = sys.cpus();
        let first = cpus
            .first()
            .ok_or_else(|| CapabilityError::probe_unavailable(Subsystem::Cpu, "no CPUs reported"))?;

        let non_empty = |s: &str| (!s.trim().is_empty()).then(|| s.trim().to_string());
        let frequency = u32::try_from(first.frequency()).ok().filter(|f| *f > 0);

        let mut features = CpuFeatures {
            vendor: non_empty(first.vendor_id()),
            model: non_empty(first.brand()),
            architecture: Some(std::env::consts::ARCH.to_string()),
            cores: u32::try_from(num_cpus::get_physical()).ok(),
            threads: u32::try_from(num_cpus::get()).ok(),
            has_atomics: Some(cfg!(target_has_atomic = "64")),
            base_frequency_mhz: frequency,
            max_frequency_mhz: cpus
                .iter()
                .filter_map(|c| u32::try_from(c.frequency()).ok())
                .max()
                .filter(|f| *f > 0),
            ..Default::default()
        };
        detect_instruction_sets(&mut features);
        read_cache_sizes(&mut features);

        tracing::debug!(
            "CPU probe: {} ({} cores / {} threads)",
            features.model.as_deref().unwrap_or("unknown"),
            features.cores.unwrap_or(0),
            features.threads.unwrap_or(0)
        );
        Ok(features)
    }

    fn probe_gpu(&self) -> Result<GpuFeatures> {
        probe_drm_gpu()
    }

    fn probe_memory(&self) -> Result<MemoryFeatures> {
        let sys = Self::memory_system();
        let total = sys.total_memory();
        if total == 0 {
            return Err(CapabilityError::probe_unavailable(
                Subsystem::Memory,
                "host reported zero physical memory",
            ));
        }

        Ok(MemoryFeatures {
            total_physical: Some(total),
            available_physical: Some(sys.available_memory()),
            total_virtual: Some(total.saturating_add(sys.total_swap())),
            available_virtual: Some(sys.available_memory().saturating_add(sys.free_swap())),
            page_size: page_size(),
            supports_large_pages: path_flag("/sys/kernel/mm/transparent_hugepage"),
            supports_numa: numa_node_count().map(|nodes| nodes > 1),
            supports_dma: None,
            supports_virtual_memory: Some(cfg!(any(unix, windows))),
            supports_memory_protection: Some(cfg!(any(unix, windows))),
            bandwidth_mbps: None,
            latency_ns: None,
        })
    }

    fn probe_io(&self) -> Result<IoFeatures> {
        let disks = Disks::new_with_refreshed_list();
        let networks = Networks::new_with_refreshed_list();
        let interfaces: Vec<String> = networks.iter().map(|(name, _)| name.clone()).collect();

        Ok(IoFeatures {
            supports_persistent_storage: Some(!disks.list().is_empty()),
            supports_async_io: Some(cfg!(any(target_os = "linux", target_os = "macos", windows))),
            supports_memory_mapped_io: Some(cfg!(any(unix, windows))),
            supports_networking: Some(interfaces.iter().any(|n| !is_loopback(n))),
            supports_wifi: Some(interfaces.iter().any(|n| is_wireless(n))),
            supports_bluetooth: dir_has_entries("/sys/class/bluetooth"),
            supports_ethernet: Some(interfaces.iter().any(|n| is_ethernet(n))),
            supports_touch: None,
            supports_multitouch: None,
            supports_gamepad: None,
            supports_accelerometer: None,
            supports_audio_output: dir_has_entries("/sys/class/sound"),
            supports_hardware_audio: None,
            supports_multichannel_audio: None,
            supports_hardware_effects: None,
            max_audio_channels: None,
            max_sample_rate: None,
            supports_high_precision_timer: Some(true),
            supports_real_time_clock: path_flag("/dev/rtc0"),
            supports_power_management: path_flag("/sys/class/power_supply"),
            sandboxed: Some(is_sandboxed()),
        })
    }

    fn identify(&self) -> HardwareIdentity {
        let sys = Self::cpu_system();
        let mut identity = HardwareIdentity::host();
        if let Some(cpu) = sys.cpus().first() {
            let brand = cpu.brand().trim();
            if !brand.is_empty() {
                identity.cpu_model = brand.to_string();
            }
        }
        if let Ok(Some(device)) = probe_drm_gpu().map(|gpu| gpu.device_name) {
            identity.gpu_model = device;
        }
        identity
    }
}

#[cfg(target_arch = "x86_64")]
fn detect_instruction_sets(features: &mut CpuFeatures) {
    features.has_fpu = Some(true);
    features.has_sse = Some(std::arch::is_x86_feature_detected!("sse"));
    features.has_sse2 = Some(std::arch::is_x86_feature_detected!("sse2"));
    features.has_sse4_1 = Some(std::arch::is_x86_feature_detected!("sse4.1"));
    features.has_sse4_2 = Some(std::arch::is_x86_feature_detected!("sse4.2"));
    features.has_avx = Some(std::arch::is_x86_feature_detected!("avx"));
    features.has_avx2 = Some(std::arch::is_x86_feature_detected!("avx2"));
    features.has_avx512 = Some(std::arch::is_x86_feature_detected!("avx512f"));
    features.has_aes = Some(std::arch::is_x86_feature_detected!("aes"));
    features.has_neon = Some(false);
    features.cache_line_size = Some(64);
}

#[cfg(target_arch = "aarch64")]
fn detect_instruction_sets(features: &mut CpuFeatures) {
    features.has_fpu = Some(true);
    features.has_neon = Some(std::arch::is_aarch64_feature_detected!("neon"));
    features.has_aes = Some(std::arch::is_aarch64_feature_detected!("aes"));
    for flag in [
        &mut features.has_sse,
        &mut features.has_sse2,
        &mut features.has_sse4_1,
        &mut features.has_sse4_2,
        &mut features.has_avx,
        &mut features.has_avx2,
        &mut features.has_avx512,
    ] {
        *flag = Some(false);
    }
    features.cache_line_size = Some(64);
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
fn detect_instruction_sets(_features: &mut CpuFeatures) {}

/// L1d/L2/L3 sizes from sysfs cpu0 cache indices
fn read_cache_sizes(features: &mut CpuFeatures) {
    let base = Path::new("/sys/devices/system/cpu/cpu0/cache");
    let Ok(entries) = std::fs::read_dir(base) else {
        return;
    };

    for entry in entries.flatten() {
        let dir = entry.path();
        let read = |name: &str| {
            std::fs::read_to_string(dir.join(name))
                .map(|s| s.trim().to_string())
                .ok()
        };
        let (Some(level), Some(kind), Some(size)) = (read("level"), read("type"), read("size")) else {
            continue;
        };
        let Some(kb) = parse_cache_size_kb(&size) else {
            continue;
        };
        match (level.as_str(), kind.as_str()) {
            ("1", "Data") => features.l1_cache_kb = Some(kb),
            ("2", _) => features.l2_cache_kb = Some(kb),
            ("3", _) => features.l3_cache_kb = Some(kb),
            _ => {}
        }
    }
}

/// Parse sysfs cache sizes such as "48K" or "30M"
fn parse_cache_size_kb(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    if let Some(kb) = raw.strip_suffix('K') {
        kb.parse().ok()
    } else if let Some(mb) = raw.strip_suffix('M') {
        mb.parse::<u32>().ok().map(|m| m * 1024)
    } else {
        raw.parse::<u32>().ok().map(|bytes| bytes / 1024)
    }
}

/// GPU presence from DRM card nodes
///
/// Shader stages are only inferred when a render node exists; the kernel
/// exposes no API level, so those stay unknown otherwise.
fn probe_drm_gpu() -> Result<GpuFeatures> {
    let drm = Path::new("/sys/class/drm");
    let entries = std::fs::read_dir(drm)
        .map_err(|e| CapabilityError::probe_unavailable(Subsystem::Gpu, e.to_string()))?;

    let card = entries
        .flatten()
        .map(|e| e.path())
        .find(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("card") && !n.contains('-'))
                .unwrap_or(false)
        })
        .ok_or_else(|| CapabilityError::probe_unavailable(Subsystem::Gpu, "no DRM card found"))?;

    let device_dir = card.join("device");
    let read = |name: &str| {
        std::fs::read_to_string(device_dir.join(name))
            .map(|s| s.trim().to_string())
            .ok()
    };

    let vendor = read("vendor").and_then(|id| pci_vendor_name(&id).map(str::to_string));
    let device_name = match (&vendor, read("device")) {
        (Some(v), Some(id)) => Some(format!("{} {}", v, id)),
        (None, Some(id)) => Some(id),
        _ => None,
    };
    let has_render_node = std::fs::read_dir("/dev/dri")
        .map(|entries| {
            entries
                .flatten()
                .any(|e| e.file_name().to_string_lossy().starts_with("renderD"))
        })
        .unwrap_or(false);
    let shaders = has_render_node.then_some(true);

    tracing::debug!("GPU probe: {:?} via {}", device_name, card.display());

    Ok(GpuFeatures {
        vendor,
        device_name,
        driver_version: read("driver/module/version"),
        supports_opengl: shaders,
        supports_2d_acceleration: Some(true),
        supports_vertex_shaders: shaders,
        supports_fragment_shaders: shaders,
        total_memory: read("mem_info_vram_total").and_then(|s| s.parse().ok()),
        available_memory: None,
        ..Default::default()
    })
}

/// Map a PCI vendor id ("0x10de") to a vendor name
fn pci_vendor_name(id: &str) -> Option<&'static str> {
    match id.trim().to_ascii_lowercase().as_str() {
        "0x10de" => Some("NVIDIA"),
        "0x1002" | "0x1022" => Some("AMD"),
        "0x8086" => Some("Intel"),
        "0x13b5" => Some("ARM"),
        "0x5143" => Some("Qualcomm"),
        "0x1af4" => Some("VirtIO"),
        "0x15ad" => Some("VMware"),
        _ => None,
    }
}

fn is_loopback(name: &str) -> bool {
    name == "lo" || name.starts_with("lo0") || name.eq_ignore_ascii_case("loopback")
}

fn is_wireless(name: &str) -> bool {
    name.starts_with("wl") || name.starts_with("wifi") || name.starts_with("ath")
}

fn is_ethernet(name: &str) -> bool {
    name.starts_with("eth") || name.starts_with("en")
}

fn is_sandboxed() -> bool {
    std::env::var_os("FLATPAK_ID").is_some()
        || std::env::var_os("SNAP").is_some()
        || Path::new("/.flatpak-info").exists()
}

/// `Some(true)` if the path exists; unknown on hosts without sysfs
fn path_flag(path: &str) -> Option<bool> {
    if Path::new(path).exists() {
        Some(true)
    } else if cfg!(target_os = "linux") {
        Some(false)
    } else {
        None
    }
}

fn dir_has_entries(path: &str) -> Option<bool> {
    match std::fs::read_dir(path) {
        Ok(mut entries) => Some(entries.next().is_some()),
        Err(_) if cfg!(target_os = "linux") => Some(false),
        Err(_) => None,
    }
}

#[cfg(unix)]
fn page_size() -> Option<u32> {
    // SAFETY: sysconf has no preconditions
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    u32::try_from(size).ok().filter(|s| *s > 0)
}

#[cfg(not(unix))]
fn page_size() -> Option<u32> {
    None
}

/// NUMA node count (Linux-specific)
fn numa_node_count() -> Option<usize> {
    let entries = std::fs::read_dir("/sys/devices/system/node").ok()?;
    let nodes = entries
        .flatten()
        .filter(|e| {
            let name = e.file_name();
            let name = name.to_string_lossy();
            name.len() > 4
                && name.starts_with("node")
                && name[4..].chars().all(|c| c.is_ascii_digit())
        })
        .count();
    (nodes > 0).then_some(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_probe_reports_threads() {
        let cpu = SystemProbe::new().probe_cpu().unwrap();
        assert!(cpu.threads.unwrap_or(0) >= 1);
        assert_eq!(cpu.architecture.as_deref(), Some(std::env::consts::ARCH));
    }

    #[test]
    fn test_memory_probe() {
        let memory = SystemProbe::new().probe_memory().unwrap();
        assert!(memory.total_physical.unwrap() > 0);
        assert!(memory.total_virtual.unwrap() >= memory.total_physical.unwrap());
    }

    #[test]
    fn test_identity_is_stable() {
        let probe = SystemProbe::new();
        assert_eq!(probe.identify().fingerprint(), probe.identify().fingerprint());
    }

    #[test]
    fn test_cache_size_parsing() {
        assert_eq!(parse_cache_size_kb("48K"), Some(48));
        assert_eq!(parse_cache_size_kb("30M"), Some(30 * 1024));
        assert_eq!(parse_cache_size_kb("garbage"), None);
    }

    #[test]
    fn test_vendor_ids() {
        assert_eq!(pci_vendor_name("0x10DE"), Some("NVIDIA"));
        assert_eq!(pci_vendor_name("0x8086\n"), Some("Intel"));
        assert_eq!(pci_vendor_name("0xffff"), None);
    }

    #[test]
    fn test_interface_classification() {
        assert!(is_loopback("lo"));
        assert!(is_wireless("wlp3s0"));
        assert!(is_ethernet("enp0s31f6"));
        assert!(!is_ethernet("wlan0"));
    }
}
