//! Detection orchestrator
//!
//! Drives one detection run at a time through
//! `Idle -> Probing -> Benchmarking -> Classifying -> Completed | Failed`,
//! answers from the cache when it can, and falls back to conservative answers
//! when every probe fails.
//!
//! Concurrent `detect_capabilities` calls are single-flight: a caller that
//! arrives while a run is in progress waits for that run and receives its
//! outcome. Locks are never held across a probe or benchmark call.

use super::driver::{collect_driver_capabilities, merge_driver_capabilities, DriverRegistry};
use super::fallback::FallbackProvider;
use super::prediction;
use super::results::{
    combined_confidence, compare_capability_results, CapabilityChangeNotification,
    CapabilityDetectionResults, SOURCE_CACHE, SOURCE_HARDWARE,
};
use crate::benchmark::{BenchmarkRunner, SystemBenchmarkResults};
use crate::cache::{
    benchmark_cache_key, hardware_cache_key, platform_cache_key, BackgroundCacheUpdater,
    CacheEntry, CacheEvent, CachePayload, CacheRefresher, CachedCapabilityInfo, CapabilityCache,
    Cached, Clock, InvalidationReason, SystemClock,
};
use crate::classify::TierClassifier;
use crate::config::CapabilityDetectionConfig;
use crate::core::{
    Capability, CapabilityMask, HardwareIdentity, ListenerId, ListenerRegistry, PerformanceTier,
    Subsystem,
};
use crate::error::{CapabilityError, Result};
use crate::system::{
    capability_mask_from_features, estimate_tier_from_features, platform_info_from_features,
    software_fallbacks, HardwareFeatures, HardwareProbe, SettingRecommendation, SettingsAdvisor,
    UseCase,
};
use parking_lot::{Condvar, Mutex, RwLock};
use serde::Serialize;
use std::any::Any;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Share of the progress bar spent probing
const PROBE_SHARE: f64 = 0.2;
/// Share of the progress bar spent benchmarking
const BENCHMARK_SHARE: f64 = 0.75;

/// Where a detection run is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionPhase {
    /// No run has started
    Idle,
    /// Calling the hardware probes
    Probing,
    /// Running micro-benchmarks
    Benchmarking,
    /// Deriving mask, tier and confidence
    Classifying,
    /// Last run produced hardware-backed results
    Completed,
    /// Last run was cancelled or fell back
    Failed,
}

impl DetectionPhase {
    /// Whether a run is executing
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            DetectionPhase::Probing | DetectionPhase::Benchmarking | DetectionPhase::Classifying
        )
    }

    /// Stable name
    pub fn name(self) -> &'static str {
        match self {
            DetectionPhase::Idle => "idle",
            DetectionPhase::Probing => "probing",
            DetectionPhase::Benchmarking => "benchmarking",
            DetectionPhase::Classifying => "classifying",
            DetectionPhase::Completed => "completed",
            DetectionPhase::Failed => "failed",
        }
    }
}

/// Notification delivered to detection listeners
#[derive(Debug, Clone)]
pub enum DetectionEvent {
    /// A run started with this configuration
    Started(CapabilityDetectionConfig),
    /// A run produced hardware-backed results
    Completed(Arc<CapabilityDetectionResults>),
    /// A run was cancelled or every probe failed
    Failed {
        /// What went wrong
        reason: String,
        /// Fallback answers returned instead, if any
        partial: Option<Arc<CapabilityDetectionResults>>,
    },
    /// Support for one capability changed between runs
    CapabilityChanged(CapabilityChangeNotification),
    /// The overall tier changed between runs
    TierChanged {
        /// Previous tier
        old_tier: PerformanceTier,
        /// New tier
        new_tier: PerformanceTier,
        /// Why the new run happened
        reason: String,
    },
}

/// Orchestrator counters since the last reset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DetectionStatistics {
    /// Runs that entered probing
    pub detections_started: u64,
    /// Runs that completed with hardware-backed results
    pub detections_completed: u64,
    /// Runs where every probe failed
    pub detections_failed: u64,
    /// Runs cancelled by the caller
    pub detections_cancelled: u64,
    /// Calls answered from the cache
    pub cache_hits: u64,
    /// Calls that consulted the cache and ran detection
    pub cache_misses: u64,
    /// Calls answered by the fallback provider
    pub fallback_results: u64,
    /// Events delivered to listeners
    pub notifications_sent: u64,
    /// Listener invocations that panicked
    pub listener_panics: u64,
    /// Driver change notifications handled
    pub driver_updates: u64,
    /// Wall time spent in detection runs
    pub total_detection_time_ms: u64,
}

impl DetectionStatistics {
    /// Flattened `name -> value` view
    pub fn as_map(&self) -> BTreeMap<String, u64> {
        BTreeMap::from([
            ("detections_started".to_string(), self.detections_started),
            ("detections_completed".to_string(), self.detections_completed),
            ("detections_failed".to_string(), self.detections_failed),
            ("detections_cancelled".to_string(), self.detections_cancelled),
            ("cache_hits".to_string(), self.cache_hits),
            ("cache_misses".to_string(), self.cache_misses),
            ("fallback_results".to_string(), self.fallback_results),
            ("notifications_sent".to_string(), self.notifications_sent),
            ("listener_panics".to_string(), self.listener_panics),
            ("driver_updates".to_string(), self.driver_updates),
            ("total_detection_time_ms".to_string(), self.total_detection_time_ms),
        ])
    }
}

#[derive(Default)]
struct Counters {
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    fallback: AtomicU64,
    notifications: AtomicU64,
    listener_panics: AtomicU64,
    driver_updates: AtomicU64,
    detection_time_ms: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> DetectionStatistics {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        DetectionStatistics {
            detections_started: get(&self.started),
            detections_completed: get(&self.completed),
            detections_failed: get(&self.failed),
            detections_cancelled: get(&self.cancelled),
            cache_hits: get(&self.cache_hits),
            cache_misses: get(&self.cache_misses),
            fallback_results: get(&self.fallback),
            notifications_sent: get(&self.notifications),
            listener_panics: get(&self.listener_panics),
            driver_updates: get(&self.driver_updates),
            total_detection_time_ms: get(&self.detection_time_ms),
        }
    }

    fn reset(&self) {
        for counter in [
            &self.started,
            &self.completed,
            &self.failed,
            &self.cancelled,
            &self.cache_hits,
            &self.cache_misses,
            &self.fallback,
            &self.notifications,
            &self.listener_panics,
            &self.driver_updates,
            &self.detection_time_ms,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Outcome of a finished run, replayed to callers that waited on it
#[derive(Clone)]
enum RunOutcome {
    Finished(CapabilityDetectionResults),
    Cancelled,
    Failed(String),
}

impl RunOutcome {
    fn capture(outcome: &Result<CapabilityDetectionResults>) -> Self {
        match outcome {
            Ok(results) => RunOutcome::Finished(results.clone()),
            Err(CapabilityError::Cancelled) => RunOutcome::Cancelled,
            Err(CapabilityError::DetectionFailed(message)) => RunOutcome::Failed(message.clone()),
            Err(e) => RunOutcome::Failed(e.to_string()),
        }
    }

    fn replay(&self) -> Result<CapabilityDetectionResults> {
        match self {
            RunOutcome::Finished(results) => Ok(results.clone()),
            RunOutcome::Cancelled => Err(CapabilityError::Cancelled),
            RunOutcome::Failed(message) => Err(CapabilityError::DetectionFailed(message.clone())),
        }
    }
}

struct RunState {
    phase: DetectionPhase,
    generation: u64,
    last_outcome: Option<RunOutcome>,
}

fn probe_into(probe: &dyn HardwareProbe, subsystem: Subsystem, features: &mut HardwareFeatures) -> Result<()> {
    match subsystem {
        Subsystem::Cpu => features.cpu = probe.probe_cpu()?,
        Subsystem::Gpu => features.gpu = probe.probe_gpu()?,
        Subsystem::Memory => features.memory = probe.probe_memory()?,
        Subsystem::Io => features.io = probe.probe_io()?,
    }
    Ok(())
}

/// Capability summary rebuilt from a fresh probe
///
/// Benchmarks are not re-run, so a benchmark-derived tier and the benchmark
/// confidence carry over from `previous` and a warning says so.
fn refreshed_info(
    previous: &CachedCapabilityInfo,
    identity: &HardwareIdentity,
    features: &HardwareFeatures,
    failed_probes: usize,
    now: chrono::DateTime<chrono::Utc>,
) -> CachedCapabilityInfo {
    let probes = Subsystem::ALL.len();
    let hardware_confidence = (probes - failed_probes) as f64 / probes as f64;
    let benchmarked = previous.benchmark_confidence > 0.0;
    let tier = if benchmarked {
        previous.tier
    } else {
        estimate_tier_from_features(features)
    };

    let mut warnings = Vec::new();
    if failed_probes > 0 {
        warnings.push(format!(
            "{} of {} probes failed during background refresh",
            failed_probes, probes
        ));
    }
    if benchmarked {
        warnings.push("performance tier carried over from the last benchmark run".to_string());
    }

    CachedCapabilityInfo {
        capabilities: merge_driver_capabilities(
            capability_mask_from_features(features),
            &previous.driver_capabilities,
        ),
        tier,
        platform: platform_info_from_features(identity, features, tier),
        fallback_availability: previous.fallback_availability.clone(),
        driver_capabilities: previous.driver_capabilities.clone(),
        hardware_confidence,
        benchmark_confidence: previous.benchmark_confidence,
        detection_confidence: combined_confidence(hardware_confidence, previous.benchmark_confidence),
        warnings,
        detected_at: now,
        detection_duration: previous.detection_duration,
    }
}

/// Re-probes hardware for the background cache updater
///
/// Benchmark entries are left to the next detection run.
struct ProbeRefresher {
    probe: Arc<dyn HardwareProbe>,
    identity: HardwareIdentity,
    clock: Arc<dyn Clock>,
}

impl CacheRefresher for ProbeRefresher {
    fn refresh(&self, key: &str, current: &CacheEntry) -> Result<Option<CachePayload>> {
        match &current.payload {
            CachePayload::HardwareFeatures(previous) => {
                let mut features = previous.clone();
                for subsystem in Subsystem::ALL {
                    if let Err(e) = probe_into(self.probe.as_ref(), subsystem, &mut features) {
                        tracing::debug!("Keeping cached {} features for '{}': {}", subsystem, key, e);
                    }
                }
                Ok(Some(CachePayload::HardwareFeatures(features)))
            }
            CachePayload::CapabilityInfo(previous) => {
                let mut features = HardwareFeatures::default();
                let mut failed = 0;
                for subsystem in Subsystem::ALL {
                    if let Err(e) = probe_into(self.probe.as_ref(), subsystem, &mut features) {
                        tracing::debug!("Refresh of '{}': {}", key, e);
                        failed += 1;
                    }
                }
                if failed == Subsystem::ALL.len() {
                    return Err(CapabilityError::DetectionFailed(format!(
                        "every hardware probe failed while refreshing '{}'",
                        key
                    )));
                }
                let info = refreshed_info(previous, &self.identity, &features, failed, self.clock.now());
                Ok(Some(CachePayload::CapabilityInfo(info)))
            }
            CachePayload::BenchmarkResults(_) => Ok(None),
        }
    }
}

/// State reachable from cache listeners as well as from the orchestrator
struct SharedState {
    config: RwLock<CapabilityDetectionConfig>,
    identity: RwLock<Option<HardwareIdentity>>,
    current: RwLock<Option<Arc<CapabilityDetectionResults>>>,
    history: Mutex<VecDeque<CapabilityChangeNotification>>,
    listeners: ListenerRegistry<DetectionEvent>,
    stats: Counters,
}

impl SharedState {
    fn emit(&self, event: &DetectionEvent) {
        let panicked = self.listeners.notify(event);
        self.stats.notifications.fetch_add(1, Ordering::Relaxed);
        if panicked > 0 {
            self.stats
                .listener_panics
                .fetch_add(panicked as u64, Ordering::Relaxed);
        }
    }

    /// Record what changed since `previous` and notify listeners
    fn record_changes(
        &self,
        previous: Option<Arc<CapabilityDetectionResults>>,
        results: &CapabilityDetectionResults,
        reason: &str,
    ) {
        let changes = previous
            .map(|previous| compare_capability_results(&previous, results, reason))
            .unwrap_or_default();
        if changes.is_empty() {
            return;
        }

        let (history_limit, propagate) = {
            let config = self.config.read();
            (config.history_limit, config.propagate_capability_changes)
        };
        {
            let mut history = self.history.lock();
            history.extend(changes.iter().cloned());
            while history.len() > history_limit {
                history.pop_front();
            }
        }
        tracing::info!("{} capability change(s) after {}", changes.len(), reason);

        if propagate {
            for change in changes.iter().filter(|c| c.capability.is_some()) {
                self.emit(&DetectionEvent::CapabilityChanged(change.clone()));
            }
            if let Some(change) = changes.first().filter(|c| c.tier_changed()) {
                self.emit(&DetectionEvent::TierChanged {
                    old_tier: change.old_tier,
                    new_tier: change.new_tier,
                    reason: reason.to_string(),
                });
            }
        }
    }

    /// Fold a background refresh of one of this machine's entries into the current results
    fn adopt_refreshed(&self, cache: &CapabilityCache, key: &str) {
        let Some(identity) = self.identity.read().clone() else {
            return;
        };
        let ours = key == platform_cache_key(&identity) || key == hardware_cache_key(&identity);
        if !ours {
            return;
        }
        let Some(base) = self.current.read().clone() else {
            return;
        };
        let Some(entry) = cache.peek(key) else {
            return;
        };

        let mut results = (*base).clone();
        match entry.payload {
            CachePayload::CapabilityInfo(info) => apply_cached_info(&mut results, info),
            CachePayload::HardwareFeatures(features) => results.set_hardware_features(features),
            CachePayload::BenchmarkResults(_) => return,
        }
        results.detection_source = SOURCE_CACHE.to_string();
        let results = Arc::new(results);

        let previous = {
            let mut slot = self.current.write();
            // A detection run published meanwhile; its results are newer
            if !slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, &base)) {
                return;
            }
            slot.replace(Arc::clone(&results))
        };
        tracing::debug!("Current results updated from refreshed cache entry '{}'", key);
        self.record_changes(previous, &results, "background refresh");
    }
}

/// Copy a cached capability summary into `results`
fn apply_cached_info(results: &mut CapabilityDetectionResults, info: CachedCapabilityInfo) {
    results.detection_timestamp = info.detected_at;
    results.capability_mask = info.capabilities;
    results.performance_tier = info.tier;
    results.platform_info = info.platform;
    results.fallback_availability = info.fallback_availability;
    results.driver_capabilities = info.driver_capabilities;
    results.hardware_confidence = info.hardware_confidence;
    results.benchmark_confidence = info.benchmark_confidence;
    results.detection_confidence = info.detection_confidence;
    results.warnings = info.warnings;
}

/// Owns the detection pipeline, its cache and its listeners
pub struct DetectionOrchestrator {
    probe: Arc<dyn HardwareProbe>,
    drivers: Option<Arc<dyn DriverRegistry>>,
    runner: Arc<BenchmarkRunner>,
    classifier: TierClassifier,
    fallback: FallbackProvider,
    clock: Arc<dyn Clock>,
    cache: RwLock<Option<Arc<CapabilityCache>>>,
    updater: Mutex<Option<BackgroundCacheUpdater>>,
    initialized: AtomicBool,
    run: Mutex<RunState>,
    run_finished: Condvar,
    cancel_requested: AtomicBool,
    probes_done: AtomicUsize,
    shared: Arc<SharedState>,
}

impl DetectionOrchestrator {
    /// Orchestrator over `probe` with the built-in benchmark suite
    pub fn new(probe: Arc<dyn HardwareProbe>) -> Self {
        let config = CapabilityDetectionConfig::default();
        Self {
            probe,
            drivers: None,
            runner: Arc::new(BenchmarkRunner::new()),
            classifier: TierClassifier::new(config.tier_discrepancy_epsilon),
            fallback: FallbackProvider::new(),
            clock: Arc::new(SystemClock),
            cache: RwLock::new(None),
            updater: Mutex::new(None),
            initialized: AtomicBool::new(false),
            run: Mutex::new(RunState {
                phase: DetectionPhase::Idle,
                generation: 0,
                last_outcome: None,
            }),
            run_finished: Condvar::new(),
            cancel_requested: AtomicBool::new(false),
            probes_done: AtomicUsize::new(0),
            shared: Arc::new(SharedState {
                config: RwLock::new(config),
                identity: RwLock::new(None),
                current: RwLock::new(None),
                history: Mutex::new(VecDeque::new()),
                listeners: ListenerRegistry::new(),
                stats: Counters::default(),
            }),
        }
    }

    /// Use a specific benchmark runner
    pub fn with_runner(mut self, runner: Arc<BenchmarkRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Merge capabilities from installed drivers
    pub fn with_driver_registry(mut self, registry: Arc<dyn DriverRegistry>) -> Self {
        self.drivers = Some(registry);
        self
    }

    /// Use a specific clock for timestamps and cache expiry
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validate `config`, build the cache and start optional background work
    ///
    /// Calling it again re-initializes with the new configuration.
    pub fn initialize(&self, config: CapabilityDetectionConfig) -> Result<Vec<String>> {
        let mut warnings = config.validate()?;
        self.classifier.set_epsilon(config.tier_discrepancy_epsilon)?;

        let cache = if config.enable_capability_caching {
            Some(self.attach_cache(CapabilityCache::with_clock(
                config.cache_config.clone(),
                Arc::clone(&self.clock),
            )?))
        } else {
            None
        };

        self.stop_background_updates();
        *self.cache.write() = cache;
        *self.shared.config.write() = config.clone();
        *self.shared.identity.write() = Some(self.probe.identify());
        self.initialized.store(true, Ordering::SeqCst);

        tracing::info!(
            "Capability detection initialized (caching: {}, benchmarks: {}, quick: {})",
            config.enable_capability_caching,
            config.enable_performance_benchmarks,
            config.use_quick_detection_mode
        );

        if config.enable_background_updates {
            self.start_background_updates(config.cache_update_interval)?;
        }
        if config.force_detection_on_startup {
            if let Err(e) = self.detect_capabilities(true) {
                tracing::warn!("Startup detection failed: {}", e);
                warnings.push(format!("startup detection failed: {}", e));
            }
        }
        Ok(warnings)
    }

    /// Stop background work, persist the cache and release it
    pub fn shutdown(&self) {
        if !self.initialized.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.cancel_detection();
        self.stop_background_updates();

        if let Some(cache) = self.cache.write().take() {
            if cache.get_configuration().is_persistent() {
                if let Err(e) = cache.save_cache() {
                    tracing::warn!("Failed to save capability cache on shutdown: {}", e);
                }
            }
        }
        tracing::info!("Capability detection shut down");
    }

    /// Whether `initialize` ran and `shutdown` did not
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Wrap a new cache so background refreshes of this machine's entries reach `current`
    fn attach_cache(&self, cache: CapabilityCache) -> Arc<CapabilityCache> {
        let cache = Arc::new(cache);
        let shared = Arc::clone(&self.shared);
        let weak = Arc::downgrade(&cache);
        cache.register_listener(move |event| {
            if let CacheEvent::Invalidated {
                key,
                reason: InvalidationReason::BackgroundRefresh,
            } = event
            {
                if let Some(cache) = weak.upgrade() {
                    shared.adopt_refreshed(&cache, key);
                }
            }
        });
        cache
    }

    /// Machine identity, probed once and reused for cache keys
    fn identity(&self) -> HardwareIdentity {
        if let Some(identity) = self.shared.identity.read().clone() {
            return identity;
        }
        let identity = self.probe.identify();
        *self.shared.identity.write() = Some(identity.clone());
        identity
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(CapabilityError::NotInitialized)
        }
    }

    /// Detect capabilities, answering from the cache unless `force`
    pub fn detect_capabilities(&self, force: bool) -> Result<CapabilityDetectionResults> {
        let reason = if force { "forced detection" } else { "detection" };
        self.detect_with_reason(force, reason)
    }

    fn detect_with_reason(&self, force: bool, reason: &str) -> Result<CapabilityDetectionResults> {
        self.ensure_initialized()?;

        if !force {
            if let Some(results) = self.cached_results() {
                return Ok(results);
            }
        }

        {
            let mut run = self.run.lock();
            if run.phase.is_in_flight() {
                tracing::debug!("Detection already in flight; waiting for its outcome");
                let generation = run.generation;
                while run.generation == generation {
                    self.run_finished.wait(&mut run);
                }
                return match &run.last_outcome {
                    Some(outcome) => outcome.replay(),
                    None => Err(CapabilityError::DetectionFailed("run finished without an outcome".into())),
                };
            }
            run.phase = DetectionPhase::Probing;
            self.cancel_requested.store(false, Ordering::SeqCst);
            self.runner.clear_cancel();
            self.probes_done.store(0, Ordering::SeqCst);
        }

        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run_detection(force, reason)))
            .unwrap_or_else(|payload| Err(self.run_panicked(payload.as_ref())));
        self.shared
            .stats
            .detection_time_ms
            .fetch_add(started.elapsed().as_millis() as u64, Ordering::Relaxed);

        let mut run = self.run.lock();
        run.phase = match &outcome {
            Ok(results) if results.detection_successful => DetectionPhase::Completed,
            _ => DetectionPhase::Failed,
        };
        run.last_outcome = Some(RunOutcome::capture(&outcome));
        run.generation += 1;
        self.run_finished.notify_all();
        outcome
    }

    fn run_panicked(&self, payload: &(dyn Any + Send)) -> CapabilityError {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Counters::bump(&self.shared.stats.failed);
        tracing::error!("Capability detection panicked: {}", message);

        let error = CapabilityError::DetectionFailed(format!("detection run panicked: {}", message));
        self.emit(&DetectionEvent::Failed {
            reason: error.to_string(),
            partial: None,
        });
        error
    }

    /// Move to classifying unless a cancellation is pending
    fn enter_classifying(&self) -> Result<()> {
        let mut run = self.run.lock();
        if self.cancel_requested.load(Ordering::SeqCst) {
            drop(run);
            return Err(self.cancelled());
        }
        run.phase = DetectionPhase::Classifying;
        tracing::debug!("Detection phase: {}", DetectionPhase::Classifying.name());
        Ok(())
    }

    fn set_phase(&self, phase: DetectionPhase) {
        self.run.lock().phase = phase;
        tracing::debug!("Detection phase: {}", phase.name());
    }

    fn cancelled(&self) -> CapabilityError {
        Counters::bump(&self.shared.stats.cancelled);
        tracing::info!("Capability detection cancelled");
        self.emit(&DetectionEvent::Failed {
            reason: CapabilityError::Cancelled.to_string(),
            partial: None,
        });
        CapabilityError::Cancelled
    }

    fn run_detection(&self, force: bool, reason: &str) -> Result<CapabilityDetectionResults> {
        let config = self.get_configuration();
        let started = Instant::now();
        let deadline = started + config.max_detection_time;
        let timestamp = self.clock.now();

        Counters::bump(&self.shared.stats.started);
        self.emit(&DetectionEvent::Started(config.clone()));
        tracing::info!(
            "Starting capability detection (force: {}, quick: {})",
            force,
            config.use_quick_detection_mode
        );

        if !config.enable_hardware_detection {
            let mut results = self.fallback.results(timestamp);
            results.detection_successful = true;
            results.warnings.push("hardware detection disabled; using fallback answers".to_string());
            results.detection_duration = started.elapsed();
            Counters::bump(&self.shared.stats.fallback);
            return self.publish(results, reason);
        }

        // Probing
        let identity = self.probe.identify();
        *self.shared.identity.write() = Some(identity.clone());
        let mut features = HardwareFeatures::default();
        let mut warnings = Vec::new();
        let mut failed = Vec::new();
        for subsystem in Subsystem::ALL {
            if Instant::now() >= deadline {
                let timeout = CapabilityError::DetectionTimedOut(config.max_detection_time);
                warnings.push(format!("{} probe skipped: {}", subsystem, timeout));
                failed.push(subsystem);
            } else if let Err(e) = probe_into(self.probe.as_ref(), subsystem, &mut features) {
                tracing::warn!("{}", e);
                warnings.push(e.to_string());
                failed.push(subsystem);
            }
            self.probes_done.fetch_add(1, Ordering::SeqCst);
            if self.cancel_requested.load(Ordering::SeqCst) {
                return Err(self.cancelled());
            }
        }

        if failed.len() == Subsystem::ALL.len() {
            let error = CapabilityError::DetectionFailed("every hardware probe failed".to_string());
            return self.fail_with_fallback(error, warnings, timestamp, started);
        }

        // Benchmarking
        let mut benchmark_results: Option<SystemBenchmarkResults> = None;
        if config.enable_performance_benchmarks && !config.use_quick_detection_mode {
            if Instant::now() >= deadline {
                warnings.push(format!(
                    "{}; benchmarks skipped",
                    CapabilityError::DetectionTimedOut(config.max_detection_time)
                ));
            } else {
                self.set_phase(DetectionPhase::Benchmarking);
                let mut bench_config = config.benchmark_config.clone();
                for subsystem in &failed {
                    bench_config.set_enabled(*subsystem, false);
                }
                match self.runner.benchmark_system_until(
                    &bench_config,
                    Some(deadline),
                    config.max_concurrent_detections as usize,
                ) {
                    Ok(results) => benchmark_results = Some(results),
                    Err(CapabilityError::Cancelled) => return Err(self.cancelled()),
                    Err(e) => {
                        tracing::warn!("Benchmarks failed: {}", e);
                        warnings.push(format!("benchmarks failed: {}", e));
                    }
                }
            }
        }

        // Classifying
        self.enter_classifying()?;

        let (driver_capabilities, driver_warnings) = match (&self.drivers, config.enable_driver_integration) {
            (Some(registry), true) => collect_driver_capabilities(registry.as_ref()),
            _ => (BTreeMap::new(), Vec::new()),
        };
        warnings.extend(driver_warnings);
        let capability_mask =
            merge_driver_capabilities(capability_mask_from_features(&features), &driver_capabilities);

        let performance_tier = match benchmark_results.as_mut() {
            Some(bench) if bench.overall_score.is_some() => {
                let classification = self.classifier.annotate(bench);
                classification.tier
            }
            _ => estimate_tier_from_features(&features),
        };
        if let Some(bench) = &benchmark_results {
            warnings.extend(bench.warnings.iter().cloned());
        }

        let probes = Subsystem::ALL.len();
        let hardware_confidence = (probes - failed.len()) as f64 / probes as f64;
        let benchmark_confidence = benchmark_results
            .as_ref()
            .map(SystemBenchmarkResults::benchmark_confidence)
            .unwrap_or(0.0);

        let (bench_attempted, bench_successful) = benchmark_results
            .as_ref()
            .map(|bench| {
                bench.subsystems().iter().fold((0, 0), |(attempted, successful), s| {
                    (attempted + s.attempted(), successful + s.successful())
                })
            })
            .unwrap_or((0, 0));
        let attempted = probes + bench_attempted;
        let failures = failed.len() + (bench_attempted - bench_successful);
        let error_rate = failures as f64 / attempted as f64;
        if error_rate > config.acceptable_error_rate {
            warnings.push(format!(
                "error rate {:.0}% exceeds the acceptable {:.0}%",
                error_rate * 100.0,
                config.acceptable_error_rate * 100.0
            ));
        }

        let platform_info = platform_info_from_features(&identity, &features, performance_tier);
        let mut results = CapabilityDetectionResults::empty(timestamp, SOURCE_HARDWARE);
        results.detection_successful = true;
        results.capability_mask = capability_mask;
        results.performance_tier = performance_tier;
        results.platform_info = platform_info;
        results.fallback_availability = software_fallbacks();
        results.driver_capabilities = driver_capabilities;
        results.set_hardware_features(features);
        results.benchmark_results = benchmark_results;
        results.hardware_confidence = hardware_confidence;
        results.benchmark_confidence = benchmark_confidence;
        results.detection_confidence = combined_confidence(hardware_confidence, benchmark_confidence);
        results.warnings = warnings;
        results.detection_duration = started.elapsed();

        if !failed.is_empty() {
            self.fallback.update_from_partial_results(&results);
        }
        self.store_in_cache(&identity, &results, &config);

        tracing::info!(
            "Detection finished in {:?}: tier {}, {} capabilities, confidence {:.2}",
            results.detection_duration,
            results.performance_tier,
            results.capability_mask.count(),
            results.detection_confidence
        );
        self.publish(results, reason)
    }

    fn fail_with_fallback(
        &self,
        error: CapabilityError,
        warnings: Vec<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
        started: Instant,
    ) -> Result<CapabilityDetectionResults> {
        Counters::bump(&self.shared.stats.failed);
        tracing::warn!("{}", error);

        if !self.get_configuration().enable_fallback_detection {
            self.emit(&DetectionEvent::Failed {
                reason: error.to_string(),
                partial: None,
            });
            return Err(error);
        }

        let mut results = self.fallback.results(timestamp);
        results.warnings = warnings;
        results.errors.push(error.to_string());
        results.detection_duration = started.elapsed();
        Counters::bump(&self.shared.stats.fallback);

        let results = Arc::new(results);
        self.emit(&DetectionEvent::Failed {
            reason: error.to_string(),
            partial: Some(Arc::clone(&results)),
        });
        Ok((*results).clone())
    }

    /// Make `results` current, record changes and notify listeners
    fn publish(&self, results: CapabilityDetectionResults, reason: &str) -> Result<CapabilityDetectionResults> {
        let results = Arc::new(results);
        let previous = self.shared.current.write().replace(Arc::clone(&results));
        self.shared.record_changes(previous, &results, reason);

        Counters::bump(&self.shared.stats.completed);
        self.emit(&DetectionEvent::Completed(Arc::clone(&results)));
        Ok((*results).clone())
    }

    fn emit(&self, event: &DetectionEvent) {
        self.shared.emit(event);
    }

    fn store_in_cache(
        &self,
        identity: &HardwareIdentity,
        results: &CapabilityDetectionResults,
        config: &CapabilityDetectionConfig,
    ) {
        let Some(cache) = self.cache() else {
            return;
        };

        let info = CachedCapabilityInfo {
            capabilities: results.capability_mask,
            tier: results.performance_tier,
            platform: results.platform_info.clone(),
            fallback_availability: results.fallback_availability.clone(),
            driver_capabilities: results.driver_capabilities.clone(),
            hardware_confidence: results.hardware_confidence,
            benchmark_confidence: results.benchmark_confidence,
            detection_confidence: results.detection_confidence,
            warnings: results.warnings.clone(),
            detected_at: results.detection_timestamp,
            detection_duration: results.detection_duration,
        };

        // Capability info goes last so a hit on it implies the rest was stored
        let stored = cache
            .store_hardware_features(&hardware_cache_key(identity), results.hardware_features(), None)
            .and_then(|_| match &results.benchmark_results {
                Some(bench) => cache.store_benchmark_results(
                    &benchmark_cache_key(identity, &config.benchmark_config),
                    bench.clone(),
                    None,
                ),
                None => Ok(()),
            })
            .and_then(|_| cache.store_capability_info(&platform_cache_key(identity), info, None));

        if let Err(e) = stored {
            tracing::warn!("Failed to cache detection results: {}", e);
        }
    }

    fn cached_info_is_valid(cached: &Cached<CachedCapabilityInfo>) -> bool {
        let payload = CachePayload::CapabilityInfo(cached.value.clone());
        crate::hash::content_hash(&payload)
            .map(|hash| hash == cached.metadata.content_hash)
            .unwrap_or(false)
    }

    /// Rebuild results from cache entries, or `None` on a miss
    fn cached_results(&self) -> Option<CapabilityDetectionResults> {
        let cache = self.cache()?;
        let config = self.get_configuration();
        let started = Instant::now();
        let identity = self.identity();
        let info_key = platform_cache_key(&identity);

        let miss = || {
            Counters::bump(&self.shared.stats.cache_misses);
            None
        };

        let Some(info) = cache.get_capability_info(&info_key) else {
            return miss();
        };
        if config.validate_cached_results && !Self::cached_info_is_valid(&info) {
            tracing::warn!("Cached capability info '{}' failed validation", info_key);
            if let Err(e) = cache.invalidate_entry(&info_key, InvalidationReason::Manual) {
                tracing::warn!("Failed to invalidate '{}': {}", info_key, e);
            }
            return miss();
        }
        let Some(features) = cache.get_hardware_features(&hardware_cache_key(&identity)) else {
            return miss();
        };
        let benchmark_results = cache
            .get_benchmark_results(&benchmark_cache_key(&identity, &config.benchmark_config))
            .map(|cached| cached.value);
        let wants_benchmarks = config.enable_performance_benchmarks && !config.use_quick_detection_mode;
        if wants_benchmarks && benchmark_results.is_none() {
            return miss();
        }

        let stale = info.is_stale();
        let mut results = CapabilityDetectionResults::empty(info.value.detected_at, SOURCE_CACHE);
        results.detection_successful = true;
        apply_cached_info(&mut results, info.value);
        results.set_hardware_features(features.value);
        results.benchmark_results = benchmark_results;
        if stale {
            results
                .warnings
                .push("cached results are stale; a background refresh is pending".to_string());
        }
        results.detection_duration = started.elapsed();

        let fresh = Arc::new(results.clone());
        let replaced = {
            let mut slot = self.shared.current.write();
            let older = slot
                .as_ref()
                .is_some_and(|current| fresh.detection_timestamp <= current.detection_timestamp);
            if older {
                None
            } else {
                Some(slot.replace(Arc::clone(&fresh)))
            }
        };
        if let Some(previous) = replaced {
            self.shared.record_changes(previous, &fresh, "cache refresh");
        }
        Counters::bump(&self.shared.stats.cache_hits);
        tracing::debug!("Capabilities served from cache in {:?}", results.detection_duration);
        Some(results)
    }

    /// Last completed results, or fallback answers before any run completed
    pub fn get_current_results(&self) -> CapabilityDetectionResults {
        match self.current() {
            Some(results) => (*results).clone(),
            None => self.fallback.results(self.clock.now()),
        }
    }

    fn current(&self) -> Option<Arc<CapabilityDetectionResults>> {
        self.shared.current.read().clone()
    }

    /// Phase of the current or last run
    pub fn detection_phase(&self) -> DetectionPhase {
        self.run.lock().phase
    }

    /// Whether a run is executing
    pub fn is_detection_in_progress(&self) -> bool {
        self.detection_phase().is_in_flight()
    }

    /// Progress of the current run in `[0, 1]`
    pub fn get_detection_progress(&self) -> f64 {
        let progress = match self.detection_phase() {
            DetectionPhase::Idle => 0.0,
            DetectionPhase::Probing => {
                let done = self.probes_done.load(Ordering::SeqCst) as f64;
                PROBE_SHARE * done / Subsystem::ALL.len() as f64
            }
            DetectionPhase::Benchmarking => PROBE_SHARE + BENCHMARK_SHARE * self.runner.progress(),
            DetectionPhase::Classifying => PROBE_SHARE + BENCHMARK_SHARE,
            DetectionPhase::Completed | DetectionPhase::Failed => 1.0,
        };
        progress.clamp(0.0, 1.0)
    }

    /// Ask the in-flight run to stop
    ///
    /// Only probing and benchmarking can be cancelled; benchmarks stop at the
    /// next workload boundary.
    pub fn cancel_detection(&self) -> Result<()> {
        let run = self.run.lock();
        match run.phase {
            DetectionPhase::Probing | DetectionPhase::Benchmarking => {
                self.cancel_requested.store(true, Ordering::SeqCst);
                self.runner.cancel();
                tracing::info!("Cancellation requested while {}", run.phase.name());
                Ok(())
            }
            phase => Err(CapabilityError::NotCancellable(phase.name().to_string())),
        }
    }

    /// React to a driver install or update
    ///
    /// Drops this machine's cached capability entries and, when configured,
    /// runs a forced detection whose results are returned.
    pub fn update_for_driver_change(&self, driver_name: &str) -> Result<Option<CapabilityDetectionResults>> {
        self.ensure_initialized()?;
        let config = self.get_configuration();
        if !config.enable_driver_integration {
            tracing::debug!("Ignoring change of driver '{}': integration disabled", driver_name);
            return Ok(None);
        }

        Counters::bump(&self.shared.stats.driver_updates);
        tracing::info!("Driver '{}' changed", driver_name);

        if let Some(cache) = self.cache() {
            let identity = self.identity();
            for key in [platform_cache_key(&identity), hardware_cache_key(&identity)] {
                cache.invalidate_entry(&key, InvalidationReason::DriverUpdate)?;
            }
        }

        if config.auto_update_on_driver_change {
            let reason = format!("driver '{}' changed", driver_name);
            self.detect_with_reason(true, &reason).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Drop every cache entry; returns how many were removed
    pub fn invalidate_cache(&self, reason: InvalidationReason) -> Result<usize> {
        match self.cache() {
            Some(cache) => cache.invalidate_all(reason),
            None => Ok(0),
        }
    }

    /// Register an event callback
    pub fn register_event_listener<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&DetectionEvent) + Send + Sync + 'static,
    {
        self.shared.listeners.register(callback)
    }

    /// Remove an event callback
    pub fn unregister_event_listener(&self, id: ListenerId) -> bool {
        self.shared.listeners.unregister(id)
    }

    /// Replace the configuration; on error nothing changes
    pub fn configure(&self, config: CapabilityDetectionConfig) -> Result<Vec<String>> {
        let warnings = config.validate()?;
        self.classifier.set_epsilon(config.tier_discrepancy_epsilon)?;
        if let Some(cache) = self.cache() {
            cache.configure(config.cache_config.clone())?;
        }
        let previous = std::mem::replace(&mut *self.shared.config.write(), config.clone());

        if self.is_initialized() {
            if config.enable_capability_caching && self.cache().is_none() {
                let cache = CapabilityCache::with_clock(config.cache_config.clone(), Arc::clone(&self.clock))?;
                *self.cache.write() = Some(self.attach_cache(cache));
            } else if !config.enable_capability_caching {
                self.stop_background_updates();
                *self.cache.write() = None;
            }

            let interval_changed = previous.cache_update_interval != config.cache_update_interval;
            if config.enable_background_updates && (interval_changed || !self.is_background_updating()) {
                self.start_background_updates(config.cache_update_interval)?;
            } else if !config.enable_background_updates {
                self.stop_background_updates();
            }
        }

        tracing::info!("Detection configuration updated");
        Ok(warnings)
    }

    /// Current configuration
    pub fn get_configuration(&self) -> CapabilityDetectionConfig {
        self.shared.config.read().clone()
    }

    /// Counters since the last reset
    pub fn get_statistics(&self) -> DetectionStatistics {
        self.shared.stats.snapshot()
    }

    /// Detection counters plus cache counters prefixed with `cache.`
    pub fn get_statistics_map(&self) -> BTreeMap<String, u64> {
        let mut map = self.get_statistics().as_map();
        if let Some(cache) = self.cache() {
            let cache_stats = cache.get_statistics();
            map.insert("cache.total_requests".into(), cache_stats.total_requests);
            map.insert("cache.hits".into(), cache_stats.cache_hits);
            map.insert("cache.misses".into(), cache_stats.cache_misses);
            map.insert("cache.evictions".into(), cache_stats.evictions);
            map.insert("cache.invalidations".into(), cache_stats.invalidations);
            map.insert("cache.background_refreshes".into(), cache_stats.background_refreshes);
            map.insert("cache.entries".into(), cache_stats.current_entries as u64);
            map.insert("cache.memory_bytes".into(), cache_stats.memory_usage_bytes as u64);
        }
        map
    }

    /// Zero detection and cache counters
    pub fn reset_statistics(&self) {
        self.shared.stats.reset();
        if let Some(cache) = self.cache() {
            cache.reset_statistics();
        }
    }

    /// Support for one capability and how sure the answer is
    pub fn get_capability_with_confidence(&self, capability: Capability) -> (bool, f64) {
        match self.current() {
            Some(results) => (results.supports(capability), results.detection_confidence),
            None => (
                self.fallback.supports_capability(capability),
                self.fallback.get_fallback_confidence(),
            ),
        }
    }

    /// Tier for a subsystem (or "overall") with a human explanation
    pub fn get_performance_tier_with_reasoning(&self, subsystem: &str) -> Result<(PerformanceTier, String)> {
        let scope = Subsystem::parse_scope(subsystem)?;

        let Some(results) = self.current() else {
            let tier = self.fallback.performance_tier();
            return Ok((
                tier,
                format!(
                    "no detection has completed; conservative fallback estimate {} (confidence {:.0}%)",
                    tier,
                    self.fallback.get_fallback_confidence() * 100.0
                ),
            ));
        };

        let features_summary = || {
            format!(
                "estimated {} from hardware features ({} memory, {} cores)",
                results.performance_tier,
                humansize::format_size(results.platform_info.total_memory, humansize::BINARY),
                results.platform_info.cpu_cores
            )
        };

        let Some(bench) = results.benchmark_results.as_ref() else {
            let prefix = scope.map(|s| format!("no {} benchmark score; ", s)).unwrap_or_default();
            return Ok((
                results.performance_tier,
                format!("{}benchmarks were skipped; {}", prefix, features_summary()),
            ));
        };

        match scope {
            Some(subsystem) => {
                let scored = bench.subsystem(subsystem);
                match (scored.score, scored.tier) {
                    (Some(score), Some(tier)) => {
                        let thresholds = self.classifier.get_tier_thresholds(subsystem.name())?;
                        Ok((
                            tier,
                            format!(
                                "{} score {:.1} meets the {} threshold of {:.1}",
                                subsystem,
                                score,
                                tier,
                                thresholds.threshold(tier)
                            ),
                        ))
                    }
                    _ => Ok((
                        results.performance_tier,
                        format!("no {} benchmark score; overall tier applies", subsystem),
                    )),
                }
            }
            None => {
                let limiting = bench
                    .subsystems()
                    .into_iter()
                    .filter_map(|s| s.tier.map(|tier| (s, tier)))
                    .min_by_key(|(_, tier)| *tier);
                let mut reasoning = match limiting {
                    Some((scored, tier)) => format!(
                        "overall tier is the minimum across subsystems: {} limits it to {} with score {:.1}",
                        scored.subsystem,
                        tier,
                        scored.score.unwrap_or_default()
                    ),
                    None => format!("no subsystem produced a score; {}", features_summary()),
                };
                if let Some(score) = bench.overall_score {
                    reasoning.push_str(&format!("; weighted overall score {:.1}", score));
                }
                Ok((results.performance_tier, reasoning))
            }
        }
    }

    /// Changes of one capability within the last `within`
    pub fn get_capability_history(
        &self,
        capability: Capability,
        within: Duration,
    ) -> Vec<CapabilityChangeNotification> {
        let cutoff = chrono::Duration::from_std(within)
            .ok()
            .and_then(|span| self.clock.now().checked_sub_signed(span));
        self.shared.history
            .lock()
            .iter()
            .filter(|change| change.capability == Some(capability))
            .filter(|change| cutoff.map_or(true, |cutoff| change.timestamp >= cutoff))
            .cloned()
            .collect()
    }

    /// Capabilities a described machine would have; never probes
    pub fn predict_capabilities(&self, hardware_specs: &HashMap<String, String>) -> Result<CapabilityMask> {
        if !self.shared.config.read().enable_capability_prediction {
            return Err(CapabilityError::config("capability prediction is disabled"));
        }
        prediction::predict_capabilities(hardware_specs)
    }

    /// Recommendations for a use case, with rationale
    pub fn get_recommendations(&self, use_case: &str) -> Vec<SettingRecommendation> {
        let use_case: UseCase = use_case.parse().unwrap_or(UseCase::Balanced);
        let (platform, capabilities) = match self.current() {
            Some(results) => (results.platform_info.clone(), results.capability_mask),
            None => (self.fallback.platform_info(), self.fallback.capability_mask()),
        };
        SettingsAdvisor::new(platform, capabilities, use_case).analyze()
    }

    /// Recommended settings as `key -> value`
    pub fn get_recommended_settings(&self, use_case: &str) -> BTreeMap<String, String> {
        self.get_recommendations(use_case)
            .into_iter()
            .map(|r| (r.key, r.value))
            .collect()
    }

    /// Start (or restart) the background cache updater
    pub fn start_background_updates(&self, interval: Duration) -> Result<()> {
        self.ensure_initialized()?;
        let cache = self
            .cache()
            .ok_or_else(|| CapabilityError::config("background updates require capability caching"))?;

        let mut slot = self.updater.lock();
        if let Some(existing) = slot.take() {
            existing.stop();
        }
        let identity = self.identity();
        let updater = BackgroundCacheUpdater::new(cache, Arc::new(self.refresher()), interval);
        updater.set_update_priorities(HashMap::from([
            (platform_cache_key(&identity), 2),
            (hardware_cache_key(&identity), 1),
        ]));
        updater.start()?;
        *slot = Some(updater);
        tracing::info!("Background cache updates every {}", humantime::format_duration(interval));
        Ok(())
    }

    fn refresher(&self) -> ProbeRefresher {
        ProbeRefresher {
            probe: Arc::clone(&self.probe),
            identity: self.identity(),
            clock: Arc::clone(&self.clock),
        }
    }

    /// Stop the background cache updater; returns whether it was running
    pub fn stop_background_updates(&self) -> bool {
        match self.updater.lock().take() {
            Some(updater) => {
                updater.stop();
                true
            }
            None => false,
        }
    }

    /// Whether the background cache updater is running
    pub fn is_background_updating(&self) -> bool {
        self.updater.lock().as_ref().is_some_and(|u| u.is_running())
    }

    /// The cache, when caching is enabled and initialized
    pub fn cache(&self) -> Option<Arc<CapabilityCache>> {
        self.cache.read().clone()
    }

    /// Tier classifier; thresholds can be tuned through it
    pub fn classifier(&self) -> &TierClassifier {
        &self.classifier
    }

    /// Fallback provider; hints can be applied through it
    pub fn fallback(&self) -> &FallbackProvider {
        &self.fallback
    }

    /// Benchmark runner
    pub fn runner(&self) -> &Arc<BenchmarkRunner> {
        &self.runner
    }
}

impl Drop for DetectionOrchestrator {
    fn drop(&mut self) {
        self.stop_background_updates();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BenchmarkConfig, CacheStorage};
    use crate::detect::{StaticDriverRegistry, SOURCE_FALLBACK};
    use crate::system::{GpuFeatures, StaticProbe};
    use std::sync::Barrier;
    use tempfile::TempDir;

    fn quick_config() -> CapabilityDetectionConfig {
        CapabilityDetectionConfig {
            use_quick_detection_mode: true,
            enable_performance_benchmarks: false,
            cache_config: crate::config::CacheConfig::for_storage(CacheStorage::Memory),
            ..Default::default()
        }
    }

    fn bench_config() -> CapabilityDetectionConfig {
        let mut benchmark_config = BenchmarkConfig::quick();
        benchmark_config.enable_io_benchmarks = false;
        CapabilityDetectionConfig {
            benchmark_config,
            cache_config: crate::config::CacheConfig::for_storage(CacheStorage::Memory),
            ..Default::default()
        }
    }

    fn orchestrator(probe: &Arc<StaticProbe>, config: CapabilityDetectionConfig) -> DetectionOrchestrator {
        let orchestrator = DetectionOrchestrator::new(Arc::clone(probe) as Arc<dyn HardwareProbe>);
        orchestrator.initialize(config).unwrap();
        orchestrator
    }

    fn record(orchestrator: &DetectionOrchestrator) -> Arc<Mutex<Vec<DetectionEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        orchestrator.register_event_listener(move |event| sink.lock().push(event.clone()));
        events
    }

    #[test]
    fn test_not_initialized() {
        let orchestrator = DetectionOrchestrator::new(Arc::new(StaticProbe::desktop()));
        assert!(matches!(
            orchestrator.detect_capabilities(false),
            Err(CapabilityError::NotInitialized)
        ));
    }

    #[test]
    fn test_cache_hit_is_fast() {
        let probe = Arc::new(StaticProbe::desktop());
        probe.set_delay(Duration::from_millis(20));
        let orchestrator = orchestrator(&probe, bench_config());

        let first_started = Instant::now();
        let first = orchestrator.detect_capabilities(false).unwrap();
        let first_elapsed = first_started.elapsed();
        assert_eq!(first.detection_source, SOURCE_HARDWARE);
        assert!(first.benchmark_results.is_some());

        let second_started = Instant::now();
        let second = orchestrator.detect_capabilities(false).unwrap();
        let second_elapsed = second_started.elapsed();
        assert_eq!(second.detection_source, SOURCE_CACHE);
        assert!(second_elapsed < first_elapsed / 100);

        assert_eq!(second.capability_mask, first.capability_mask);
        assert_eq!(second.performance_tier, first.performance_tier);
        assert_eq!(second.gpu_features, first.gpu_features);
        assert_eq!(second.benchmark_results, first.benchmark_results);
        assert_eq!(probe.probe_count(Subsystem::Cpu), 1);

        let stats = orchestrator.get_statistics();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 1);
    }

    #[test]
    fn test_failed_gpu_probe_degrades() {
        let probe = Arc::new(StaticProbe::desktop());
        probe.fail(Subsystem::Gpu);
        let orchestrator = orchestrator(&probe, quick_config());

        let results = orchestrator.detect_capabilities(true).unwrap();
        assert!(results.detection_successful);
        let gpu_warnings = results
            .warnings
            .iter()
            .filter(|w| w.to_ascii_lowercase().contains("gpu"))
            .count();
        assert_eq!(gpu_warnings, 1);
        assert_eq!(results.gpu_features, GpuFeatures::default());
        assert!(results.capability_mask.intersection(CapabilityMask::GPU_GATED).is_empty());
        assert!(results.detection_confidence < 1.0);
        assert_eq!(results.hardware_confidence, 0.75);
    }

    #[test]
    fn test_all_probes_failing_uses_fallback() {
        let probe = Arc::new(StaticProbe::desktop());
        for subsystem in Subsystem::ALL {
            probe.fail(subsystem);
        }
        let orchestrator = orchestrator(&probe, quick_config());
        let events = record(&orchestrator);

        let results = orchestrator.detect_capabilities(true).unwrap();
        assert!(!results.detection_successful);
        assert_eq!(results.detection_source, SOURCE_FALLBACK);
        assert!(!results.errors.is_empty());
        assert_eq!(results.capability_mask, orchestrator.fallback().capability_mask());
        assert_eq!(orchestrator.detection_phase(), DetectionPhase::Failed);
        assert!(events
            .lock()
            .iter()
            .any(|e| matches!(e, DetectionEvent::Failed { partial: Some(_), .. })));
        assert!(orchestrator.cache().unwrap().is_empty());
    }

    #[test]
    fn test_all_probes_failing_without_fallback() {
        let probe = Arc::new(StaticProbe::desktop());
        for subsystem in Subsystem::ALL {
            probe.fail(subsystem);
        }
        let config = CapabilityDetectionConfig {
            enable_fallback_detection: false,
            ..quick_config()
        };
        let orchestrator = orchestrator(&probe, config);
        assert!(matches!(
            orchestrator.detect_capabilities(true),
            Err(CapabilityError::DetectionFailed(_))
        ));
    }

    #[test]
    fn test_lost_capability_notifies_once() {
        let probe = Arc::new(StaticProbe::desktop());
        let orchestrator = orchestrator(&probe, quick_config());
        let first = orchestrator.detect_capabilities(true).unwrap();
        assert!(first.supports(Capability::WiFi));

        let events = record(&orchestrator);
        let second_listener = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&second_listener);
        orchestrator.register_event_listener(move |event| {
            if matches!(event, DetectionEvent::CapabilityChanged(_)) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        probe.update_features(|f| f.io.supports_wifi = Some(false));
        let second = orchestrator.detect_capabilities(true).unwrap();
        assert!(!second.supports(Capability::WiFi));

        let changes: Vec<CapabilityChangeNotification> = events
            .lock()
            .iter()
            .filter_map(|e| match e {
                DetectionEvent::CapabilityChanged(change) => Some(change.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].capability, Some(Capability::WiFi));
        assert!(changes[0].was_supported);
        assert!(!changes[0].now_supported);
        assert_eq!(second_listener.load(Ordering::SeqCst), 1);

        let history = orchestrator.get_capability_history(Capability::WiFi, Duration::from_secs(3600));
        assert_eq!(history.len(), 1);
        assert!(orchestrator
            .get_capability_history(Capability::Bluetooth, Duration::from_secs(3600))
            .is_empty());
    }

    #[test]
    fn test_panicking_listener_does_not_abort_run() {
        let probe = Arc::new(StaticProbe::desktop());
        let orchestrator = orchestrator(&probe, quick_config());
        orchestrator.register_event_listener(|_| panic!("listener bug"));
        let events = record(&orchestrator);

        assert!(orchestrator.detect_capabilities(true).is_ok());
        assert!(events
            .lock()
            .iter()
            .any(|e| matches!(e, DetectionEvent::Completed(_))));
        assert!(orchestrator.get_statistics().listener_panics >= 2);
    }

    #[test]
    fn test_concurrent_detections_share_one_run() {
        let probe = Arc::new(StaticProbe::desktop());
        probe.set_delay(Duration::from_millis(100));
        let orchestrator = Arc::new(orchestrator(&probe, quick_config()));
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let orchestrator = Arc::clone(&orchestrator);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    orchestrator.detect_capabilities(true).unwrap()
                })
            })
            .collect();
        let results: Vec<CapabilityDetectionResults> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(probe.probe_count(Subsystem::Cpu), 1);
        assert_eq!(results[0], results[1]);
        assert_eq!(orchestrator.get_statistics().detections_started, 1);
    }

    #[test]
    fn test_cancel_during_probing() {
        let probe = Arc::new(StaticProbe::desktop());
        probe.set_delay(Duration::from_millis(100));
        let orchestrator = Arc::new(orchestrator(&probe, quick_config()));
        assert!(matches!(
            orchestrator.cancel_detection(),
            Err(CapabilityError::NotCancellable(_))
        ));

        let worker = {
            let orchestrator = Arc::clone(&orchestrator);
            std::thread::spawn(move || orchestrator.detect_capabilities(true))
        };
        while !orchestrator.is_detection_in_progress() {
            std::thread::sleep(Duration::from_millis(1));
        }
        orchestrator.cancel_detection().unwrap();

        assert!(matches!(worker.join().unwrap(), Err(CapabilityError::Cancelled)));
        assert_eq!(orchestrator.detection_phase(), DetectionPhase::Failed);
        assert_eq!(orchestrator.get_statistics().detections_cancelled, 1);
        assert!(probe.probe_count(Subsystem::Io) <= 1);
    }

    #[test]
    fn test_driver_capabilities_are_merged() {
        let probe = Arc::new(StaticProbe::desktop());
        let registry = Arc::new(StaticDriverRegistry::new());
        registry.register_driver("dsp", [Capability::AudioEffects].into_iter().collect());

        let orchestrator = DetectionOrchestrator::new(Arc::clone(&probe) as Arc<dyn HardwareProbe>)
            .with_driver_registry(Arc::clone(&registry) as Arc<dyn DriverRegistry>);
        orchestrator.initialize(quick_config()).unwrap();

        let results = orchestrator.detect_capabilities(true).unwrap();
        assert!(results.supports(Capability::AudioEffects));
        assert!(results.supports(Capability::ComputeShaders));
        assert!(results.driver_capabilities.contains_key("dsp"));

        registry.remove_driver("dsp");
        let updated = orchestrator.update_for_driver_change("dsp").unwrap().unwrap();
        assert!(!updated.supports(Capability::AudioEffects));
        assert_eq!(updated.detection_source, SOURCE_HARDWARE);
        assert_eq!(orchestrator.get_statistics().driver_updates, 1);
    }

    #[test]
    fn test_cached_info_validation() {
        let probe = Arc::new(StaticProbe::desktop());
        let orchestrator = orchestrator(&probe, quick_config());
        orchestrator.detect_capabilities(false).unwrap();

        let cache = orchestrator.cache().unwrap();
        let mut cached = cache.get_capability_info(&platform_cache_key(&probe.identify())).unwrap();
        assert!(DetectionOrchestrator::cached_info_is_valid(&cached));

        cached.value.tier = PerformanceTier::Minimal;
        assert!(!DetectionOrchestrator::cached_info_is_valid(&cached));
    }

    #[test]
    fn test_derived_views_before_detection() {
        let probe = Arc::new(StaticProbe::desktop());
        let orchestrator = orchestrator(&probe, quick_config());

        let (tier, reasoning) = orchestrator.get_performance_tier_with_reasoning("overall").unwrap();
        assert_eq!(tier, orchestrator.fallback().performance_tier());
        assert!(reasoning.contains("fallback"));
        assert!(!orchestrator.get_recommended_settings("gaming").is_empty());
        let (supported, confidence) = orchestrator.get_capability_with_confidence(Capability::ComputeShaders);
        assert!(!supported);
        assert!(confidence > 0.0 && confidence < 1.0);
        assert_eq!(orchestrator.get_current_results().detection_source, SOURCE_FALLBACK);
        assert!(orchestrator.get_performance_tier_with_reasoning("disk").is_err());
    }

    #[test]
    fn test_reasoning_after_benchmarks() {
        let probe = Arc::new(StaticProbe::desktop());
        let orchestrator = orchestrator(&probe, bench_config());
        let results = orchestrator.detect_capabilities(true).unwrap();

        let (tier, reasoning) = orchestrator.get_performance_tier_with_reasoning("overall").unwrap();
        assert_eq!(tier, results.performance_tier);
        assert!(reasoning.contains("minimum") || reasoning.contains("no subsystem"));

        let (_, gpu) = orchestrator.get_performance_tier_with_reasoning("gpu").unwrap();
        assert!(gpu.contains("no gpu benchmark score"));
        assert_eq!(
            orchestrator.get_detection_progress(),
            1.0,
            "progress is complete after a run"
        );
    }

    #[test]
    fn test_results_json_round_trip_after_run() {
        let probe = Arc::new(StaticProbe::desktop());
        let orchestrator = orchestrator(&probe, bench_config());
        let results = orchestrator.detect_capabilities(true).unwrap();
        let back = CapabilityDetectionResults::from_json(&results.to_json().unwrap()).unwrap();
        assert_eq!(back, results);
    }

    #[test]
    fn test_prediction_respects_config() {
        let probe = Arc::new(StaticProbe::desktop());
        let orchestrator = orchestrator(&probe, quick_config());
        let specs: HashMap<String, String> = [("platform".to_string(), "Dreamcast".to_string())].into();
        assert!(orchestrator.predict_capabilities(&specs).unwrap().contains(Capability::Gamepad));
        assert_eq!(probe.probe_count(Subsystem::Cpu), 0);

        let mut config = orchestrator.get_configuration();
        config.enable_capability_prediction = false;
        orchestrator.configure(config).unwrap();
        assert!(orchestrator.predict_capabilities(&specs).is_err());
    }

    #[test]
    fn test_configure_is_atomic() {
        let probe = Arc::new(StaticProbe::desktop());
        let orchestrator = orchestrator(&probe, quick_config());
        let before = orchestrator.get_configuration();

        let invalid = CapabilityDetectionConfig {
            acceptable_error_rate: 2.0,
            ..before.clone()
        };
        assert!(orchestrator.configure(invalid).is_err());
        assert_eq!(orchestrator.get_configuration(), before);
    }

    #[test]
    fn test_persistent_cache_survives_restart() {
        let dir = TempDir::new().unwrap();
        let mut config = quick_config();
        config.cache_config = crate::config::CacheConfig {
            storage_path: dir.path().join("caps.cache"),
            ..crate::config::CacheConfig::for_storage(CacheStorage::Hybrid)
        };

        let probe = Arc::new(StaticProbe::desktop());
        let first = orchestrator(&probe, config.clone());
        first.detect_capabilities(false).unwrap();
        first.shutdown();

        let second = orchestrator(&probe, config);
        let results = second.detect_capabilities(false).unwrap();
        assert_eq!(results.detection_source, SOURCE_CACHE);
        assert_eq!(probe.probe_count(Subsystem::Cpu), 1);
    }

    #[test]
    fn test_background_updates_lifecycle() {
        let probe = Arc::new(StaticProbe::desktop());
        let orchestrator = orchestrator(&probe, quick_config());
        orchestrator.start_background_updates(Duration::from_secs(60)).unwrap();
        assert!(orchestrator.is_background_updating());
        assert!(orchestrator.stop_background_updates());
        assert!(!orchestrator.is_background_updating());
    }

    #[test]
    fn test_refresher_reclassifies_capability_info() {
        let probe = Arc::new(StaticProbe::desktop());
        let orchestrator = orchestrator(&probe, quick_config());
        orchestrator.detect_capabilities(false).unwrap();

        let cache = orchestrator.cache().unwrap();
        let key = platform_cache_key(&probe.identify());
        probe.update_features(|f| f.io.supports_bluetooth = Some(false));
        probe.fail(Subsystem::Gpu);

        let current = cache.peek(&key).unwrap();
        match orchestrator.refresher().refresh(&key, &current).unwrap() {
            Some(CachePayload::CapabilityInfo(info)) => {
                assert!(!info.capabilities.contains(Capability::Bluetooth));
                assert!(info.capabilities.intersection(CapabilityMask::GPU_GATED).is_empty());
                assert_eq!(info.hardware_confidence, 0.75);
                assert_eq!(info.detection_confidence, combined_confidence(0.75, 0.0));
                assert_eq!(info.platform.tier, info.tier);
                assert!(info.warnings.iter().any(|w| w.contains("1 of 4 probes failed")));
            }
            other => panic!("unexpected refresh: {:?}", other),
        }

        for subsystem in Subsystem::ALL {
            probe.fail(subsystem);
        }
        assert!(orchestrator.refresher().refresh(&key, &current).is_err());
    }

    #[test]
    fn test_refresh_keeps_benchmark_tier() {
        let previous = CachedCapabilityInfo {
            capabilities: CapabilityMask::default(),
            tier: PerformanceTier::High,
            platform: Default::default(),
            fallback_availability: BTreeMap::new(),
            driver_capabilities: BTreeMap::new(),
            hardware_confidence: 1.0,
            benchmark_confidence: 1.0,
            detection_confidence: 1.0,
            warnings: Vec::new(),
            detected_at: chrono::Utc::now(),
            detection_duration: Duration::from_millis(5),
        };
        let features = HardwareFeatures::default();
        let info = refreshed_info(&previous, &HardwareIdentity::host(), &features, 0, chrono::Utc::now());
        assert_eq!(info.tier, PerformanceTier::High);
        assert_eq!(info.benchmark_confidence, 1.0);
        assert!(info.warnings.iter().any(|w| w.contains("carried over")));
    }

    #[test]
    fn test_background_refresh_updates_current_results() {
        let probe = Arc::new(StaticProbe::desktop());
        let orchestrator = orchestrator(&probe, quick_config());
        assert!(orchestrator.detect_capabilities(false).unwrap().supports(Capability::WiFi));
        let events = record(&orchestrator);

        probe.update_features(|f| f.io.supports_wifi = Some(false));
        let cache = orchestrator.cache().unwrap();
        assert!(cache.mark_dirty(&platform_cache_key(&probe.identify())));

        let updater = BackgroundCacheUpdater::new(
            Arc::clone(&cache),
            Arc::new(orchestrator.refresher()),
            Duration::from_secs(3600),
        );
        assert_eq!(updater.run_once().refreshed, 1);

        assert!(!orchestrator.get_current_results().supports(Capability::WiFi));
        let changes: Vec<CapabilityChangeNotification> = events
            .lock()
            .iter()
            .filter_map(|e| match e {
                DetectionEvent::CapabilityChanged(change) => Some(change.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].capability, Some(Capability::WiFi));
        assert_eq!(
            orchestrator
                .get_capability_history(Capability::WiFi, Duration::from_secs(3600))
                .len(),
            1
        );

        // The refreshed entry is served from now on without a second notification
        let cached = orchestrator.detect_capabilities(false).unwrap();
        assert_eq!(cached.detection_source, SOURCE_CACHE);
        assert!(!cached.supports(Capability::WiFi));
        let change_events = events
            .lock()
            .iter()
            .filter(|e| matches!(e, DetectionEvent::CapabilityChanged(_)))
            .count();
        assert_eq!(change_events, 1);
    }

    /// Probe without its own `identify`, whose GPU call can be made to panic
    struct FragileProbe {
        inner: StaticProbe,
        panic_gpu: AtomicBool,
    }

    impl FragileProbe {
        fn new() -> Self {
            Self {
                inner: StaticProbe::desktop(),
                panic_gpu: AtomicBool::new(false),
            }
        }
    }

    impl HardwareProbe for FragileProbe {
        fn probe_cpu(&self) -> Result<crate::system::CpuFeatures> {
            self.inner.probe_cpu()
        }
        fn probe_gpu(&self) -> Result<GpuFeatures> {
            if self.panic_gpu.load(Ordering::SeqCst) {
                panic!("gpu driver crashed");
            }
            self.inner.probe_gpu()
        }
        fn probe_memory(&self) -> Result<crate::system::MemoryFeatures> {
            self.inner.probe_memory()
        }
        fn probe_io(&self) -> Result<crate::system::IoFeatures> {
            self.inner.probe_io()
        }
    }

    #[test]
    fn test_panicking_probe_fails_run_and_releases_detection() {
        let probe = Arc::new(FragileProbe::new());
        let orchestrator = Arc::new(DetectionOrchestrator::new(Arc::clone(&probe) as Arc<dyn HardwareProbe>));
        orchestrator.initialize(quick_config()).unwrap();
        let events = record(&orchestrator);

        probe.panic_gpu.store(true, Ordering::SeqCst);
        match orchestrator.detect_capabilities(true) {
            Err(CapabilityError::DetectionFailed(message)) => assert!(message.contains("gpu driver crashed")),
            other => panic!("expected a failed run, got {:?}", other.map(|r| r.detection_source)),
        }
        assert_eq!(orchestrator.detection_phase(), DetectionPhase::Failed);
        assert!(!orchestrator.is_detection_in_progress());
        assert_eq!(orchestrator.get_statistics().detections_failed, 1);
        assert!(events
            .lock()
            .iter()
            .any(|e| matches!(e, DetectionEvent::Failed { partial: None, .. })));

        probe.panic_gpu.store(false, Ordering::SeqCst);
        let (tx, rx) = crossbeam::channel::bounded(1);
        let worker = {
            let orchestrator = Arc::clone(&orchestrator);
            std::thread::spawn(move || {
                let _ = tx.send(orchestrator.detect_capabilities(true));
            })
        };
        let second = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("detection after a panic returns");
        assert!(second.unwrap().detection_successful);
        worker.join().unwrap();
    }

    #[test]
    fn test_cache_hits_do_not_reprobe_identity() {
        let probe = Arc::new(FragileProbe::new());
        let orchestrator = DetectionOrchestrator::new(Arc::clone(&probe) as Arc<dyn HardwareProbe>);
        orchestrator.initialize(quick_config()).unwrap();
        orchestrator.detect_capabilities(false).unwrap();

        let cpu_probes = probe.inner.probe_count(Subsystem::Cpu);
        let gpu_probes = probe.inner.probe_count(Subsystem::Gpu);
        for _ in 0..3 {
            assert_eq!(orchestrator.detect_capabilities(false).unwrap().detection_source, SOURCE_CACHE);
        }
        assert_eq!(probe.inner.probe_count(Subsystem::Cpu), cpu_probes);
        assert_eq!(probe.inner.probe_count(Subsystem::Gpu), gpu_probes);
    }

    /// Benchmark workload that sleeps per iteration
    struct SlowWorkload {
        name: &'static str,
        subsystem: Subsystem,
        per_iteration: Duration,
    }

    impl crate::benchmark::Workload for SlowWorkload {
        fn name(&self) -> &str {
            self.name
        }
        fn subsystem(&self) -> Subsystem {
            self.subsystem
        }
        fn reference_throughput(&self) -> f64 {
            10.0
        }
        fn run_iteration(&self, _ctx: &crate::benchmark::WorkloadContext) -> Result<u64> {
            std::thread::sleep(self.per_iteration);
            Ok(1)
        }
    }

    fn slow_orchestrator(
        probe: &Arc<StaticProbe>,
        per_iteration: Duration,
        config: CapabilityDetectionConfig,
    ) -> DetectionOrchestrator {
        let runner = Arc::new(BenchmarkRunner::empty());
        for (name, subsystem) in [("slow-cpu", Subsystem::Cpu), ("slow-memory", Subsystem::Memory)] {
            runner.register(Arc::new(SlowWorkload {
                name,
                subsystem,
                per_iteration,
            }));
        }
        let orchestrator =
            DetectionOrchestrator::new(Arc::clone(probe) as Arc<dyn HardwareProbe>).with_runner(runner);
        orchestrator.initialize(config).unwrap();
        orchestrator
    }

    fn slow_bench_config(max_detection_time: Duration) -> CapabilityDetectionConfig {
        let mut config = bench_config();
        config.max_detection_time = max_detection_time;
        config.benchmark_config.max_duration = Duration::from_secs(5);
        config
    }

    #[test]
    fn test_deadline_returns_partial_results() {
        let probe = Arc::new(StaticProbe::desktop());
        let limit = Duration::from_millis(200);
        let orchestrator = slow_orchestrator(&probe, Duration::from_millis(50), slow_bench_config(limit));

        let started = Instant::now();
        let results = orchestrator.detect_capabilities(true).unwrap();
        assert!(started.elapsed() < limit + Duration::from_secs(1));

        assert!(results.detection_successful);
        assert_eq!(results.benchmark_results.as_ref().map(|b| b.completed), Some(false));
        assert!(results
            .warnings
            .iter()
            .any(|w| w.contains("detection deadline reached")));
        assert_eq!(results.hardware_confidence, 1.0);
        assert_eq!(orchestrator.detection_phase(), DetectionPhase::Completed);
    }

    #[test]
    fn test_cancel_during_benchmarking() {
        let probe = Arc::new(StaticProbe::desktop());
        let orchestrator = Arc::new(slow_orchestrator(
            &probe,
            Duration::from_millis(100),
            slow_bench_config(Duration::from_secs(30)),
        ));

        let worker = {
            let orchestrator = Arc::clone(&orchestrator);
            std::thread::spawn(move || orchestrator.detect_capabilities(true))
        };
        let deadline = Instant::now() + Duration::from_secs(5);
        while orchestrator.detection_phase() != DetectionPhase::Benchmarking && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(orchestrator.detection_phase(), DetectionPhase::Benchmarking);
        orchestrator.cancel_detection().unwrap();

        assert!(matches!(worker.join().unwrap(), Err(CapabilityError::Cancelled)));
        assert_eq!(orchestrator.detection_phase(), DetectionPhase::Failed);
        assert_eq!(orchestrator.get_statistics().detections_cancelled, 1);
        assert!(!orchestrator.runner().is_cancelled());

        // A later run is not affected by the earlier cancellation
        let mut config = orchestrator.get_configuration();
        config.enable_performance_benchmarks = false;
        orchestrator.configure(config).unwrap();
        assert!(orchestrator.detect_capabilities(true).is_ok());
    }
}
