//! Detection, cache and benchmark configuration
//!
//! Each struct is a plain value object with documented defaults, named
//! presets and a `validate()` that returns warnings for legal-but-odd
//! values and `InvalidConfig` for values that cannot work.

use super::{humantime_duration, Profile};
use crate::core::Subsystem;
use crate::error::{CapabilityError, IoResultExt, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where cache entries live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStorage {
    /// In memory only
    #[default]
    Memory,
    /// Every store is written through to disk
    Persistent,
    /// In memory, saved on maintenance and explicit save
    Hybrid,
}

/// Capability cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL used when the caller does not supply one
    #[serde(with = "humantime_duration")]
    pub default_ttl: Duration,
    /// Upper TTL bound
    #[serde(with = "humantime_duration")]
    pub max_ttl: Duration,
    /// Lower TTL bound
    #[serde(with = "humantime_duration")]
    pub min_ttl: Duration,
    /// Maximum number of entries
    pub max_entries: usize,
    /// Maximum estimated memory usage in bytes
    pub max_memory_usage: usize,
    /// Storage mode
    pub storage: CacheStorage,
    /// Cache file used by persistent and hybrid modes
    pub storage_path: PathBuf,
    /// Refresh dirty entries in the background
    pub enable_background_refresh: bool,
    /// Background maintenance interval
    #[serde(with = "humantime_duration")]
    pub background_interval: Duration,
    /// Hit ratio below which the background updater runs more often
    pub cache_hit_ratio_threshold: f64,
    /// LZ4-compress the cache file
    pub enable_compression: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(24 * 3600),
            max_ttl: Duration::from_secs(7 * 24 * 3600),
            min_ttl: Duration::from_secs(60),
            max_entries: 128,
            max_memory_usage: 4 * 1024 * 1024,
            storage: CacheStorage::Memory,
            storage_path: default_cache_path(),
            enable_background_refresh: true,
            background_interval: Duration::from_secs(5 * 60),
            cache_hit_ratio_threshold: 0.8,
            enable_compression: false,
        }
    }
}

/// Default cache file location
pub fn default_cache_path() -> PathBuf {
    std::env::temp_dir().join("captier").join("capabilities.cache")
}

impl CacheConfig {
    /// Defaults for a storage mode
    pub fn for_storage(storage: CacheStorage) -> Self {
        let mut config = Self {
            storage,
            ..Self::default()
        };
        if storage != CacheStorage::Memory {
            config.enable_compression = true;
        }
        config
    }

    /// Preset for a use case ("gaming", "embedded", "server", "development")
    pub fn for_use_case(use_case: &str) -> Result<Self> {
        let config = match use_case.trim().to_ascii_lowercase().as_str() {
            "gaming" => Self {
                storage: CacheStorage::Hybrid,
                default_ttl: Duration::from_secs(7 * 24 * 3600),
                enable_compression: true,
                ..Self::default()
            },
            "embedded" => Self {
                max_entries: 16,
                max_memory_usage: 256 * 1024,
                enable_background_refresh: false,
                ..Self::default()
            },
            "server" => Self {
                storage: CacheStorage::Persistent,
                max_entries: 1024,
                max_memory_usage: 64 * 1024 * 1024,
                background_interval: Duration::from_secs(60),
                enable_compression: true,
                ..Self::default()
            },
            "development" => Self {
                default_ttl: Duration::from_secs(5 * 60),
                min_ttl: Duration::from_secs(1),
                background_interval: Duration::from_secs(30),
                ..Self::default()
            },
            other => {
                return Err(CapabilityError::config(format!(
                    "unknown cache use case '{}'",
                    other
                )))
            }
        };
        Ok(config)
    }

    /// Whether entries reach disk at all
    pub fn is_persistent(&self) -> bool {
        self.storage != CacheStorage::Memory
    }

    /// Clamp a TTL into `[min_ttl, max_ttl]`
    pub fn clamp_ttl(&self, ttl: Duration) -> Duration {
        ttl.clamp(self.min_ttl, self.max_ttl)
    }

    /// Validate; returns warnings for suspicious values
    pub fn validate(&self) -> Result<Vec<String>> {
        let mut warnings = Vec::new();

        if self.min_ttl.is_zero() {
            return Err(CapabilityError::config("min_ttl must be greater than zero"));
        }
        if self.min_ttl > self.max_ttl {
            return Err(CapabilityError::config(format!(
                "min_ttl ({}) exceeds max_ttl ({})",
                humantime::format_duration(self.min_ttl),
                humantime::format_duration(self.max_ttl)
            )));
        }
        if self.default_ttl < self.min_ttl || self.default_ttl > self.max_ttl {
            return Err(CapabilityError::config(
                "default_ttl must lie within [min_ttl, max_ttl]",
            ));
        }
        if self.max_entries == 0 {
            return Err(CapabilityError::config("max_entries must be at least 1"));
        }
        if self.max_memory_usage == 0 {
            return Err(CapabilityError::config("max_memory_usage must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.cache_hit_ratio_threshold) {
            return Err(CapabilityError::config(
                "cache_hit_ratio_threshold must be within [0, 1]",
            ));
        }
        if self.is_persistent() && self.storage_path.as_os_str().is_empty() {
            return Err(CapabilityError::config(
                "persistent cache storage requires storage_path",
            ));
        }
        if self.enable_background_refresh && self.background_interval.is_zero() {
            return Err(CapabilityError::config(
                "background_interval must be greater than zero",
            ));
        }

        if self.max_entries < 3 {
            warnings.push(format!(
                "max_entries = {} cannot hold one detection's capability, hardware and benchmark entries",
                self.max_entries
            ));
        }
        if self.enable_compression && !self.is_persistent() {
            warnings.push("enable_compression has no effect on a memory-only cache".to_string());
        }

        Ok(warnings)
    }
}

/// Micro-benchmark configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    /// Budget for each individual benchmark
    #[serde(with = "humantime_duration")]
    pub max_duration: Duration,
    /// Unmeasured iterations run first
    pub warmup_iterations: u32,
    /// Measured iterations
    pub measurement_iterations: u32,
    /// Run CPU benchmarks
    pub enable_cpu_benchmarks: bool,
    /// Run GPU benchmarks
    pub enable_gpu_benchmarks: bool,
    /// Run memory benchmarks
    pub enable_memory_benchmarks: bool,
    /// Run I/O benchmarks
    pub enable_io_benchmarks: bool,
    /// Smaller workloads and fewer iterations
    pub quick_benchmark: bool,
    /// Maximum coefficient of variation before a result is flagged unstable
    pub accuracy_threshold: f64,
    /// Directory for storage benchmarks (system temp dir when unset)
    pub working_dir: Option<PathBuf>,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            max_duration: Duration::from_millis(500),
            warmup_iterations: 2,
            measurement_iterations: 8,
            enable_cpu_benchmarks: true,
            enable_gpu_benchmarks: true,
            enable_memory_benchmarks: true,
            enable_io_benchmarks: true,
            quick_benchmark: false,
            accuracy_threshold: 0.15,
            working_dir: None,
        }
    }
}

impl BenchmarkConfig {
    /// Short, low-iteration preset
    pub fn quick() -> Self {
        Self {
            max_duration: Duration::from_millis(100),
            warmup_iterations: 1,
            measurement_iterations: 3,
            quick_benchmark: true,
            accuracy_threshold: 0.3,
            ..Self::default()
        }
    }

    /// Long, high-iteration preset
    pub fn comprehensive() -> Self {
        Self {
            max_duration: Duration::from_secs(2),
            warmup_iterations: 3,
            measurement_iterations: 20,
            accuracy_threshold: 0.1,
            ..Self::default()
        }
    }

    /// Preset for a use case ("gaming", "productivity", "minimal", "comprehensive")
    pub fn for_use_case(use_case: &str) -> Result<Self> {
        match use_case.trim().to_ascii_lowercase().as_str() {
            "gaming" => Ok(Self {
                enable_io_benchmarks: false,
                ..Self::default()
            }),
            "productivity" => Ok(Self {
                enable_gpu_benchmarks: false,
                ..Self::default()
            }),
            "minimal" => Ok(Self {
                enable_gpu_benchmarks: false,
                enable_io_benchmarks: false,
                ..Self::quick()
            }),
            "comprehensive" => Ok(Self::comprehensive()),
            other => Err(CapabilityError::config(format!(
                "unknown benchmark use case '{}'",
                other
            ))),
        }
    }

    /// Whether a subsystem's benchmarks are enabled
    pub fn is_enabled(&self, subsystem: Subsystem) -> bool {
        match subsystem {
            Subsystem::Cpu => self.enable_cpu_benchmarks,
            Subsystem::Gpu => self.enable_gpu_benchmarks,
            Subsystem::Memory => self.enable_memory_benchmarks,
            Subsystem::Io => self.enable_io_benchmarks,
        }
    }

    /// Enable or disable a subsystem's benchmarks
    pub fn set_enabled(&mut self, subsystem: Subsystem, enabled: bool) {
        match subsystem {
            Subsystem::Cpu => self.enable_cpu_benchmarks = enabled,
            Subsystem::Gpu => self.enable_gpu_benchmarks = enabled,
            Subsystem::Memory => self.enable_memory_benchmarks = enabled,
            Subsystem::Io => self.enable_io_benchmarks = enabled,
        }
    }

    /// Directory used by storage benchmarks
    pub fn working_dir(&self) -> PathBuf {
        self.working_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Validate; returns warnings for suspicious values
    pub fn validate(&self) -> Result<Vec<String>> {
        let mut warnings = Vec::new();

        if self.max_duration.is_zero() {
            return Err(CapabilityError::config("benchmark max_duration must be greater than zero"));
        }
        if self.measurement_iterations == 0 {
            return Err(CapabilityError::config("measurement_iterations must be at least 1"));
        }
        if !self.accuracy_threshold.is_finite() || self.accuracy_threshold <= 0.0 {
            return Err(CapabilityError::config(
                "accuracy_threshold must be a positive number",
            ));
        }

        if Subsystem::ALL.iter().all(|s| !self.is_enabled(*s)) {
            warnings.push("every benchmark subsystem is disabled".to_string());
        }
        if self.measurement_iterations < 3 {
            warnings.push(format!(
                "{} measurement iteration(s) give no meaningful variance estimate",
                self.measurement_iterations
            ));
        }

        Ok(warnings)
    }
}

/// Top-level detection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityDetectionConfig {
    /// Probe hardware at runtime
    pub enable_hardware_detection: bool,
    /// Run micro-benchmarks
    pub enable_performance_benchmarks: bool,
    /// Cache detection results
    pub enable_capability_caching: bool,
    /// Merge driver-reported capabilities
    pub enable_driver_integration: bool,
    /// Run the background cache updater after `initialize`
    pub enable_background_updates: bool,
    /// Run a forced detection inside `initialize`
    pub force_detection_on_startup: bool,
    /// Skip benchmarks and estimate the tier from features
    pub use_quick_detection_mode: bool,
    /// Check cached content hashes before serving them
    pub validate_cached_results: bool,
    /// Answer from the fallback provider when detection fails
    pub enable_fallback_detection: bool,
    /// Ceiling across probing and benchmarking
    #[serde(with = "humantime_duration")]
    pub max_detection_time: Duration,
    /// Background updater period
    #[serde(with = "humantime_duration")]
    pub cache_update_interval: Duration,
    /// Fraction of failed probes/benchmarks tolerated before a warning
    pub acceptable_error_rate: f64,
    /// Subsystems benchmarked in parallel
    pub max_concurrent_detections: u32,
    /// Re-detect when a driver changes
    pub auto_update_on_driver_change: bool,
    /// Emit change notifications to listeners
    pub propagate_capability_changes: bool,
    /// Allow `predict_capabilities`
    pub enable_capability_prediction: bool,
    /// Relative tolerance for the overall-score vs. minimum-tier check
    pub tier_discrepancy_epsilon: f64,
    /// Entries kept in the change history ring
    pub history_limit: usize,
    /// Cache configuration
    pub cache_config: CacheConfig,
    /// Benchmark configuration
    pub benchmark_config: BenchmarkConfig,
}

impl Default for CapabilityDetectionConfig {
    fn default() -> Self {
        Self {
            enable_hardware_detection: true,
            enable_performance_benchmarks: true,
            enable_capability_caching: true,
            enable_driver_integration: true,
            enable_background_updates: false,
            force_detection_on_startup: false,
            use_quick_detection_mode: false,
            validate_cached_results: true,
            enable_fallback_detection: true,
            max_detection_time: Duration::from_secs(10),
            cache_update_interval: Duration::from_secs(5 * 60),
            acceptable_error_rate: 0.25,
            max_concurrent_detections: 1,
            auto_update_on_driver_change: true,
            propagate_capability_changes: true,
            enable_capability_prediction: true,
            tier_discrepancy_epsilon: 0.10,
            history_limit: 256,
            cache_config: CacheConfig::default(),
            benchmark_config: BenchmarkConfig::default(),
        }
    }
}

impl CapabilityDetectionConfig {
    /// Configuration for a named profile
    pub fn for_profile(profile: Profile) -> Self {
        match profile {
            Profile::Default => Self::default(),
            Profile::Quick => Self {
                enable_performance_benchmarks: false,
                use_quick_detection_mode: true,
                max_detection_time: Duration::from_secs(2),
                benchmark_config: BenchmarkConfig::quick(),
                ..Self::default()
            },
            Profile::Comprehensive => Self {
                force_detection_on_startup: true,
                max_detection_time: Duration::from_secs(60),
                max_concurrent_detections: 2,
                benchmark_config: BenchmarkConfig::comprehensive(),
                ..Self::default()
            },
            Profile::Embedded => Self {
                enable_driver_integration: false,
                use_quick_detection_mode: true,
                enable_performance_benchmarks: false,
                max_detection_time: Duration::from_secs(1),
                history_limit: 32,
                cache_config: CacheConfig::for_use_case("embedded").unwrap_or_default(),
                benchmark_config: BenchmarkConfig::quick(),
                ..Self::default()
            },
        }
    }

    /// Configuration for a named profile string
    pub fn for_profile_name(name: &str) -> Result<Self> {
        let profile = match name.trim().to_ascii_lowercase().as_str() {
            "default" => Profile::Default,
            "quick" => Profile::Quick,
            "comprehensive" => Profile::Comprehensive,
            "embedded" => Profile::Embedded,
            other => return Err(CapabilityError::config(format!("unknown profile '{}'", other))),
        };
        Ok(Self::for_profile(profile))
    }

    /// Configuration for a use case ("gaming", "server", "embedded", "development", "testing")
    pub fn for_use_case(use_case: &str) -> Result<Self> {
        let key = use_case.trim().to_ascii_lowercase();
        let config = match key.as_str() {
            "gaming" => Self {
                enable_background_updates: true,
                cache_config: CacheConfig::for_use_case("gaming")?,
                benchmark_config: BenchmarkConfig::for_use_case("gaming")?,
                ..Self::default()
            },
            "server" => Self {
                enable_background_updates: true,
                max_concurrent_detections: 2,
                cache_config: CacheConfig::for_use_case("server")?,
                benchmark_config: BenchmarkConfig::for_use_case("productivity")?,
                ..Self::default()
            },
            "embedded" => Self::for_profile(Profile::Embedded),
            "development" => Self {
                force_detection_on_startup: true,
                cache_config: CacheConfig::for_use_case("development")?,
                benchmark_config: BenchmarkConfig::quick(),
                ..Self::default()
            },
            "testing" => Self {
                enable_performance_benchmarks: false,
                use_quick_detection_mode: true,
                enable_driver_integration: false,
                validate_cached_results: false,
                ..Self::default()
            },
            other => {
                return Err(CapabilityError::config(format!(
                    "unknown detection use case '{}'",
                    other
                )))
            }
        };
        Ok(config)
    }

    /// Validate the whole configuration; returns warnings
    pub fn validate(&self) -> Result<Vec<String>> {
        let mut warnings = Vec::new();

        if self.max_detection_time.is_zero() {
            return Err(CapabilityError::config("max_detection_time must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.acceptable_error_rate) {
            return Err(CapabilityError::config("acceptable_error_rate must be within [0, 1]"));
        }
        if self.max_concurrent_detections == 0 {
            return Err(CapabilityError::config(
                "max_concurrent_detections must be at least 1",
            ));
        }
        if !self.tier_discrepancy_epsilon.is_finite()
            || !(0.0..1.0).contains(&self.tier_discrepancy_epsilon)
        {
            return Err(CapabilityError::config(
                "tier_discrepancy_epsilon must be within [0, 1)",
            ));
        }
        if self.history_limit == 0 {
            return Err(CapabilityError::config("history_limit must be at least 1"));
        }
        if !self.enable_hardware_detection && !self.enable_fallback_detection {
            return Err(CapabilityError::config(
                "hardware detection and fallback detection cannot both be disabled",
            ));
        }
        if self.enable_background_updates && !self.enable_capability_caching {
            return Err(CapabilityError::config(
                "background updates require capability caching",
            ));
        }
        if self.enable_background_updates && self.cache_update_interval.is_zero() {
            return Err(CapabilityError::config(
                "cache_update_interval must be greater than zero",
            ));
        }

        warnings.extend(self.cache_config.validate()?);
        warnings.extend(self.benchmark_config.validate()?);

        if self.use_quick_detection_mode && self.enable_performance_benchmarks {
            warnings.push("quick detection mode skips the enabled benchmarks".to_string());
        }
        if self.enable_performance_benchmarks
            && !self.use_quick_detection_mode
            && self.benchmark_config.max_duration > self.max_detection_time
        {
            warnings.push(format!(
                "benchmark max_duration ({}) exceeds max_detection_time ({})",
                humantime::format_duration(self.benchmark_config.max_duration),
                humantime::format_duration(self.max_detection_time)
            ));
        }

        Ok(warnings)
    }

    /// Load from a JSON file; missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_path(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Write as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_path(parent)?;
        }
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text).with_path(path)
    }
}
