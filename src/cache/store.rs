//! The capability cache
//!
//! A single `parking_lot::Mutex` guards the entry table and the active
//! configuration. Every operation holds it for its own duration only, never
//! across a probe or benchmark. Statistics are atomics readable without the
//! lock. Events are collected while locked and delivered after the lock is
//! released, so listeners may call back into the cache.
//!
//! Reads:
//! - absent key, or `now >= expires_at`: miss (an expired entry is removed)
//! - dirty entry: the stale payload is returned at once and the key is
//!   queued on the refresh channel; the caller never waits for the refresh

use super::persistence::{read_cache_file, write_cache_file};
use super::{
    add_duration, CacheEntry, CacheEntryMetadata, CacheEvent, CachePayload, CacheStatistics, Cached,
    CachedCapabilityInfo, Clock, InvalidationReason, MaintenanceReport, SystemClock,
};
use crate::benchmark::SystemBenchmarkResults;
use crate::config::{BenchmarkConfig, CacheConfig, CacheStorage};
use crate::core::{HardwareIdentity, ListenerId, ListenerRegistry};
use crate::error::{CapabilityError, Result};
use crate::system::HardwareFeatures;
use chrono::{DateTime, Utc};
use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use xxhash_rust::xxh3::xxh3_64;

/// Pending refresh requests held before new ones are dropped
const REFRESH_QUEUE_DEPTH: usize = 1024;

/// Key of the capability summary for a machine
pub fn platform_cache_key(identity: &HardwareIdentity) -> String {
    format!("caps:{}", identity.fingerprint())
}

/// Key of the raw probe output for a machine
pub fn hardware_cache_key(identity: &HardwareIdentity) -> String {
    format!("hw:{}", identity.fingerprint())
}

/// Key of a benchmark run for a machine and benchmark configuration
pub fn benchmark_cache_key(identity: &HardwareIdentity, config: &BenchmarkConfig) -> String {
    let settings = crate::hash::content_hash(config).unwrap_or_default();
    format!("bench:{}:{:016x}", identity.fingerprint(), settings)
}

fn default_source() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string());
    format!("{}:{}", host, std::process::id())
}

struct Slot {
    entry: CacheEntry,
    /// Access order, breaks ties between equal timestamps
    seq: u64,
}

const SLOT_OVERHEAD: usize = std::mem::size_of::<Slot>();

struct CacheState {
    entries: HashMap<String, Slot>,
    config: CacheConfig,
    next_seq: u64,
    memory_usage: usize,
    refresh_pending: HashSet<String>,
}

impl CacheState {
    fn bump_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn insert(&mut self, key: String, slot: Slot) {
        self.memory_usage += slot.entry.metadata.size_bytes;
        if let Some(old) = self.entries.insert(key, slot) {
            self.memory_usage = self.memory_usage.saturating_sub(old.entry.metadata.size_bytes);
        }
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        self.refresh_pending.remove(key);
        let slot = self.entries.remove(key)?;
        self.memory_usage = self.memory_usage.saturating_sub(slot.entry.metadata.size_bytes);
        Some(slot.entry)
    }

    fn over_capacity(&self) -> bool {
        self.entries.len() > self.config.max_entries || self.memory_usage > self.config.max_memory_usage
    }

    /// Least recently accessed entry; dirty ones go first at equal recency
    fn lru_victim(&self, protect: Option<&str>) -> Option<String> {
        self.entries
            .iter()
            .filter(|(key, _)| Some(key.as_str()) != protect)
            .min_by_key(|(_, slot)| {
                (
                    slot.entry.metadata.last_accessed,
                    !slot.entry.metadata.dirty,
                    slot.seq,
                )
            })
            .map(|(key, _)| key.clone())
    }

    fn expired_keys(&self, now: DateTime<Utc>) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, slot)| slot.entry.metadata.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect()
    }
}

#[derive(Default)]
struct Counters {
    total_requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
    background_refreshes: AtomicU64,
    access_nanos: AtomicU64,
}

impl Counters {
    fn reset(&self) {
        for counter in [
            &self.total_requests,
            &self.cache_hits,
            &self.cache_misses,
            &self.evictions,
            &self.invalidations,
            &self.background_refreshes,
            &self.access_nanos,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// TTL cache for capability info, hardware features and benchmark results
pub struct CapabilityCache {
    state: Mutex<CacheState>,
    counters: Counters,
    entry_count: AtomicUsize,
    memory_bytes: AtomicUsize,
    last_reset: Mutex<DateTime<Utc>>,
    clock: Arc<dyn Clock>,
    listeners: ListenerRegistry<CacheEvent>,
    refresh_tx: Sender<String>,
    refresh_rx: Receiver<String>,
    source: String,
}

impl CapabilityCache {
    /// Create a cache on the system clock
    ///
    /// Persistent and hybrid caches load their file; a file that cannot be
    /// read is logged and the cache starts empty.
    pub fn new(config: CacheConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a cache on an explicit clock
    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        for warning in config.validate()? {
            tracing::warn!("Cache configuration: {}", warning);
        }
        let persistent = config.is_persistent();
        let (refresh_tx, refresh_rx) = bounded(REFRESH_QUEUE_DEPTH);
        let now = clock.now();

        let cache = Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                config,
                next_seq: 0,
                memory_usage: 0,
                refresh_pending: HashSet::new(),
            }),
            counters: Counters::default(),
            entry_count: AtomicUsize::new(0),
            memory_bytes: AtomicUsize::new(0),
            last_reset: Mutex::new(now),
            clock,
            listeners: ListenerRegistry::new(),
            refresh_tx,
            refresh_rx,
            source: default_source(),
        };

        if persistent {
            if let Err(e) = cache.load_cache() {
                tracing::warn!("Could not load persisted cache, starting empty: {}", e);
            }
        }
        Ok(cache)
    }

    /// Identifier recorded in stored entries
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Current time on the cache's clock
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn sync_gauges(&self, state: &CacheState) {
        self.entry_count.store(state.entries.len(), Ordering::Relaxed);
        self.memory_bytes.store(state.memory_usage, Ordering::Relaxed);
    }

    fn emit(&self, events: Vec<CacheEvent>) {
        for event in &events {
            self.listeners.notify(event);
        }
    }

    fn persist(&self, state: &CacheState) -> Result<usize> {
        write_cache_file(
            &state.config.storage_path,
            state.entries.iter().map(|(key, slot)| (key, &slot.entry)),
            &self.source,
            state.config.enable_compression,
        )
    }

    /// Persistent mode writes every mutation through
    fn write_through(&self, state: &CacheState) -> Result<()> {
        if state.config.storage == CacheStorage::Persistent {
            self.persist(state)?;
        }
        Ok(())
    }

    fn enforce_capacity(
        &self,
        state: &mut CacheState,
        protect: Option<&str>,
        events: &mut Vec<CacheEvent>,
    ) -> usize {
        let mut evicted = 0;
        while state.over_capacity() {
            let Some(victim) = state.lru_victim(protect) else {
                break;
            };
            state.remove(&victim);
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Evicted cache entry '{}' (memory pressure)", victim);
            events.push(CacheEvent::Invalidated {
                key: victim,
                reason: InvalidationReason::MemoryPressure,
            });
            evicted += 1;
        }
        evicted
    }

    /// Store a payload; `ttl` defaults to `default_ttl` and is clamped into `[min_ttl, max_ttl]`
    pub fn store(&self, key: &str, payload: CachePayload, ttl: Option<Duration>) -> Result<()> {
        let encoded = serde_json::to_vec(&payload)?;
        let content_hash = xxh3_64(&encoded);
        let now = self.clock.now();
        let mut events = Vec::new();

        let result = {
            let mut state = self.state.lock();
            let ttl = state
                .config
                .clamp_ttl(ttl.unwrap_or(state.config.default_ttl));
            let metadata = CacheEntryMetadata {
                created_at: now,
                last_accessed: now,
                expires_at: add_duration(now, ttl),
                access_count: 0,
                dirty: false,
                source: self.source.clone(),
                content_hash,
                size_bytes: encoded.len() + key.len() + SLOT_OVERHEAD,
            };
            let seq = state.bump_seq();
            state.refresh_pending.remove(key);
            state.insert(
                key.to_string(),
                Slot {
                    entry: CacheEntry { payload, metadata },
                    seq,
                },
            );
            self.enforce_capacity(&mut state, Some(key), &mut events);
            self.sync_gauges(&state);
            tracing::trace!("Stored cache entry '{}' for {:?}", key, ttl);
            self.write_through(&state)
        };

        self.emit(events);
        result
    }

    /// Read an entry, updating recency and statistics
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let started = Instant::now();
        let now = self.clock.now();
        let mut events = Vec::new();

        let found = {
            let mut state = self.state.lock();
            let expired = state
                .entries
                .get(key)
                .map(|slot| slot.entry.metadata.is_expired(now));

            match expired {
                None => None,
                Some(true) => {
                    state.remove(key);
                    self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
                    events.push(CacheEvent::Invalidated {
                        key: key.to_string(),
                        reason: InvalidationReason::Expired,
                    });
                    self.sync_gauges(&state);
                    if let Err(e) = self.write_through(&state) {
                        tracing::warn!("Cache write-through failed: {}", e);
                    }
                    None
                }
                Some(false) => {
                    let seq = state.bump_seq();
                    let entry = state.entries.get_mut(key).map(|slot| {
                        slot.seq = seq;
                        slot.entry.metadata.last_accessed = now;
                        slot.entry.metadata.access_count += 1;
                        slot.entry.clone()
                    });

                    if entry.as_ref().is_some_and(|e| e.metadata.dirty) {
                        if state.refresh_pending.insert(key.to_string()) {
                            match self.refresh_tx.try_send(key.to_string()) {
                                Ok(()) => events.push(CacheEvent::RefreshRequested {
                                    key: key.to_string(),
                                }),
                                Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                                    tracing::debug!("Refresh queue full; '{}' stays dirty", key);
                                    state.refresh_pending.remove(key);
                                }
                            }
                        }
                    }
                    entry
                }
            }
        };

        let hit = found.is_some();
        self.counters.total_requests.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
        self.counters
            .access_nanos
            .fetch_add(started.elapsed().as_nanos() as u64, Ordering::Relaxed);

        events.insert(
            0,
            CacheEvent::Access {
                key: key.to_string(),
                hit,
            },
        );
        self.emit(events);
        found
    }

    /// Like `get`, but a miss is `Err(CacheMiss)`
    pub fn lookup(&self, key: &str) -> Result<CacheEntry> {
        self.get(key)
            .ok_or_else(|| CapabilityError::CacheMiss(key.to_string()))
    }

    /// Read a live entry without touching recency or statistics
    pub fn peek(&self, key: &str) -> Option<CacheEntry> {
        let now = self.clock.now();
        self.state
            .lock()
            .entries
            .get(key)
            .filter(|slot| !slot.entry.metadata.is_expired(now))
            .map(|slot| slot.entry.clone())
    }

    fn get_typed<T>(
        &self,
        key: &str,
        pick: impl FnOnce(CachePayload) -> std::result::Result<T, CachePayload>,
    ) -> Option<Cached<T>> {
        let entry = self.get(key)?;
        match pick(entry.payload) {
            Ok(value) => Some(Cached {
                value,
                metadata: entry.metadata,
            }),
            Err(other) => {
                tracing::debug!("Cache entry '{}' holds {}", key, other.kind());
                None
            }
        }
    }

    /// Store a capability summary
    pub fn store_capability_info(
        &self,
        key: &str,
        info: CachedCapabilityInfo,
        ttl: Option<Duration>,
    ) -> Result<()> {
        self.store(key, CachePayload::CapabilityInfo(info), ttl)
    }

    /// Read a capability summary
    pub fn get_capability_info(&self, key: &str) -> Option<Cached<CachedCapabilityInfo>> {
        self.get_typed(key, |payload| match payload {
            CachePayload::CapabilityInfo(info) => Ok(info),
            other => Err(other),
        })
    }

    /// Store raw probe output
    pub fn store_hardware_features(
        &self,
        key: &str,
        features: HardwareFeatures,
        ttl: Option<Duration>,
    ) -> Result<()> {
        self.store(key, CachePayload::HardwareFeatures(features), ttl)
    }

    /// Read raw probe output
    pub fn get_hardware_features(&self, key: &str) -> Option<Cached<HardwareFeatures>> {
        self.get_typed(key, |payload| match payload {
            CachePayload::HardwareFeatures(features) => Ok(features),
            other => Err(other),
        })
    }

    /// Store a benchmark run
    pub fn store_benchmark_results(
        &self,
        key: &str,
        results: SystemBenchmarkResults,
        ttl: Option<Duration>,
    ) -> Result<()> {
        self.store(key, CachePayload::BenchmarkResults(results), ttl)
    }

    /// Read a benchmark run
    pub fn get_benchmark_results(&self, key: &str) -> Option<Cached<SystemBenchmarkResults>> {
        self.get_typed(key, |payload| match payload {
            CachePayload::BenchmarkResults(results) => Ok(results),
            other => Err(other),
        })
    }

    /// Remove one entry; returns whether it existed
    pub fn invalidate_entry(&self, key: &str, reason: InvalidationReason) -> Result<bool> {
        let mut events = Vec::new();
        let result = {
            let mut state = self.state.lock();
            if state.remove(key).is_none() {
                return Ok(false);
            }
            self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
            events.push(CacheEvent::Invalidated {
                key: key.to_string(),
                reason,
            });
            self.sync_gauges(&state);
            self.write_through(&state)
        };
        tracing::info!("Invalidated cache entry '{}' ({})", key, reason);
        self.emit(events);
        result.map(|()| true)
    }

    /// Remove every entry; returns how many were removed
    pub fn invalidate_all(&self, reason: InvalidationReason) -> Result<usize> {
        let mut events = Vec::new();
        let result = {
            let mut state = self.state.lock();
            let mut keys: Vec<String> = state.entries.keys().cloned().collect();
            keys.sort();
            for key in keys {
                state.remove(&key);
                events.push(CacheEvent::Invalidated { key, reason });
            }
            self.counters
                .invalidations
                .fetch_add(events.len() as u64, Ordering::Relaxed);
            self.sync_gauges(&state);
            self.write_through(&state)
        };
        let removed = events.len();
        tracing::info!("Invalidated {} cache entries ({})", removed, reason);
        self.emit(events);
        result.map(|()| removed)
    }

    /// Flag an entry as stale; it keeps being served until refreshed
    pub fn mark_dirty(&self, key: &str) -> bool {
        let mut state = self.state.lock();
        match state.entries.get_mut(key) {
            Some(slot) => {
                slot.entry.metadata.dirty = true;
                true
            }
            None => false,
        }
    }

    /// Keys of dirty entries, sorted
    pub fn dirty_keys(&self) -> Vec<String> {
        let state = self.state.lock();
        let mut keys: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, slot)| slot.entry.metadata.dirty)
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Replace a payload in place, keeping its TTL length; returns false if the key is gone
    pub fn refresh_entry(&self, key: &str, payload: CachePayload) -> Result<bool> {
        let encoded = serde_json::to_vec(&payload)?;
        let now = self.clock.now();
        let mut events = Vec::new();

        let result = {
            let mut state = self.state.lock();
            let Some(slot) = state.entries.get_mut(key) else {
                return Ok(false);
            };
            let ttl = slot.entry.metadata.ttl();
            let old_size = slot.entry.metadata.size_bytes;
            let new_size = encoded.len() + key.len() + SLOT_OVERHEAD;

            slot.entry.payload = payload;
            let metadata = &mut slot.entry.metadata;
            metadata.created_at = now;
            metadata.expires_at = add_duration(now, ttl);
            metadata.dirty = false;
            metadata.content_hash = xxh3_64(&encoded);
            metadata.size_bytes = new_size;

            state.memory_usage = state.memory_usage.saturating_sub(old_size) + new_size;
            state.refresh_pending.remove(key);
            self.counters
                .background_refreshes
                .fetch_add(1, Ordering::Relaxed);
            events.push(CacheEvent::Invalidated {
                key: key.to_string(),
                reason: InvalidationReason::BackgroundRefresh,
            });
            self.sync_gauges(&state);
            self.write_through(&state)
        };

        tracing::debug!("Refreshed cache entry '{}'", key);
        self.emit(events);
        result.map(|()| true)
    }

    /// Remove expired entries, evict down to capacity, and save when persisted
    pub fn perform_maintenance(&self) -> Result<MaintenanceReport> {
        let now = self.clock.now();
        let mut events = Vec::new();

        let (mut report, persisted) = {
            let mut state = self.state.lock();
            let mut expired_keys = state.expired_keys(now);
            expired_keys.sort();
            let expired = expired_keys.len();
            for key in expired_keys {
                state.remove(&key);
                events.push(CacheEvent::Invalidated {
                    key,
                    reason: InvalidationReason::Expired,
                });
            }
            self.counters
                .invalidations
                .fetch_add(expired as u64, Ordering::Relaxed);

            let evicted = self.enforce_capacity(&mut state, None, &mut events);
            self.sync_gauges(&state);

            let persisted = if state.config.is_persistent() {
                Some(self.persist(&state))
            } else {
                None
            };
            (
                MaintenanceReport {
                    expired,
                    evicted,
                    persisted: None,
                },
                persisted,
            )
        };

        let outcome = match persisted {
            Some(Ok(count)) => {
                report.persisted = Some(count);
                Ok(())
            }
            Some(Err(e)) => Err(e),
            None => Ok(()),
        };

        if report.expired > 0 || report.evicted > 0 {
            tracing::info!(
                "Cache maintenance: {} expired, {} evicted",
                report.expired,
                report.evicted
            );
        }
        events.push(CacheEvent::Maintenance(report.clone()));
        self.emit(events);
        outcome.map(|()| report)
    }

    /// Counters since the last reset
    pub fn get_statistics(&self) -> CacheStatistics {
        let total_requests = self.counters.total_requests.load(Ordering::Relaxed);
        let cache_hits = self.counters.cache_hits.load(Ordering::Relaxed);
        let access_nanos = self.counters.access_nanos.load(Ordering::Relaxed);

        CacheStatistics {
            total_requests,
            cache_hits,
            cache_misses: self.counters.cache_misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
            background_refreshes: self.counters.background_refreshes.load(Ordering::Relaxed),
            current_entries: self.entry_count.load(Ordering::Relaxed),
            memory_usage_bytes: self.memory_bytes.load(Ordering::Relaxed),
            hit_ratio: if total_requests == 0 {
                0.0
            } else {
                cache_hits as f64 / total_requests as f64
            },
            avg_access_time: if total_requests == 0 {
                Duration::ZERO
            } else {
                Duration::from_nanos(access_nanos / total_requests)
            },
            last_reset: *self.last_reset.lock(),
        }
    }

    /// Zero the counters
    pub fn reset_statistics(&self) {
        self.counters.reset();
        *self.last_reset.lock() = self.clock.now();
    }

    /// Whether the hit ratio has fallen below the configured threshold
    ///
    /// False until at least one request was made.
    pub fn needs_aggressive_refresh(&self) -> bool {
        let stats = self.get_statistics();
        let threshold = self.state.lock().config.cache_hit_ratio_threshold;
        stats.total_requests > 0 && stats.hit_ratio < threshold
    }

    /// Replace the configuration; an invalid one is rejected and the old one kept
    pub fn configure(&self, config: CacheConfig) -> Result<Vec<String>> {
        let warnings = config.validate()?;
        self.state.lock().config = config;
        tracing::info!("Cache reconfigured");
        self.emit(vec![CacheEvent::Reconfigured]);
        Ok(warnings)
    }

    /// Active configuration
    pub fn get_configuration(&self) -> CacheConfig {
        self.state.lock().config.clone()
    }

    /// Write every entry to the cache file; returns the number written
    pub fn save_cache(&self) -> Result<usize> {
        let state = self.state.lock();
        let count = self.persist(&state)?;
        tracing::info!(
            "Saved {} cache entries to {}",
            count,
            state.config.storage_path.display()
        );
        Ok(count)
    }

    /// Merge the cache file into memory; expired entries are dropped
    pub fn load_cache(&self) -> Result<usize> {
        let now = self.clock.now();
        let mut events = Vec::new();

        let loaded = {
            let mut state = self.state.lock();
            let mut loaded = read_cache_file(&state.config.storage_path, now)?;
            loaded
                .entries
                .sort_by_key(|(_, entry)| entry.metadata.last_accessed);

            let count = loaded.entries.len();
            for (key, entry) in loaded.entries {
                let seq = state.bump_seq();
                state.insert(key, Slot { entry, seq });
            }
            self.enforce_capacity(&mut state, None, &mut events);
            self.sync_gauges(&state);

            if loaded.expired > 0 || loaded.corrupted > 0 {
                tracing::info!(
                    "Dropped {} expired and {} corrupted persisted entries",
                    loaded.expired,
                    loaded.corrupted
                );
            }
            count
        };

        tracing::debug!("Loaded {} cache entries", loaded);
        self.emit(events);
        Ok(loaded)
    }

    /// Whether the cache persists and its file location is writable
    pub fn is_storage_available(&self) -> bool {
        let config = self.get_configuration();
        if !config.is_persistent() {
            return false;
        }
        let path = config.storage_path.as_path();
        if path.exists() {
            return std::fs::metadata(path).is_ok_and(|m| m.is_file() && !m.permissions().readonly());
        }
        // Saving creates missing directories below the nearest existing ancestor
        let mut dir = path.parent();
        while let Some(candidate) = dir {
            if candidate.as_os_str().is_empty() {
                return true;
            }
            if candidate.exists() {
                return std::fs::metadata(candidate).is_ok_and(|m| m.is_dir() && !m.permissions().readonly());
            }
            dir = candidate.parent();
        }
        true
    }

    /// Location of the cache file
    pub fn get_storage_path(&self) -> PathBuf {
        self.state.lock().config.storage_path.clone()
    }

    /// Move the cache file location
    ///
    /// The old file is left in place. Persistent caches write their entries
    /// to the new location at once.
    pub fn set_storage_path(&self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(CapabilityError::config("cache storage path must not be empty"));
        }
        let mut state = self.state.lock();
        tracing::info!(
            "Cache storage moved from {} to {}",
            state.config.storage_path.display(),
            path.display()
        );
        state.config.storage_path = path;
        self.write_through(&state)
    }

    /// Delete the cache file; in-memory entries are kept
    ///
    /// Returns whether a file was removed.
    pub fn clear_storage(&self) -> Result<bool> {
        let path = self.get_storage_path();
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!("Removed cache file {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CapabilityError::io(path, e)),
        }
    }

    /// Size of the cache file in bytes, 0 when absent
    pub fn get_storage_size(&self) -> u64 {
        std::fs::metadata(self.get_storage_path())
            .map(|m| m.len())
            .unwrap_or(0)
    }

    /// Flag clean entries created at least `max_age` ago as dirty
    ///
    /// Returns how many were flagged.
    pub fn mark_stale_entries(&self, max_age: Duration) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| self.clock.now().checked_sub_signed(age))
        else {
            return 0;
        };
        let mut state = self.state.lock();
        let mut marked = 0;
        for slot in state.entries.values_mut() {
            let metadata = &mut slot.entry.metadata;
            if !metadata.dirty && metadata.created_at <= cutoff {
                metadata.dirty = true;
                marked += 1;
            }
        }
        if marked > 0 {
            tracing::debug!("Marked {} cache entries for refresh", marked);
        }
        marked
    }

    /// Every live entry, sorted by key
    pub fn snapshot(&self) -> Vec<(String, CacheEntry)> {
        let now = self.clock.now();
        let state = self.state.lock();
        let mut entries: Vec<(String, CacheEntry)> = state
            .entries
            .iter()
            .filter(|(_, slot)| !slot.entry.metadata.is_expired(now))
            .map(|(key, slot)| (key.clone(), slot.entry.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Number of entries held, expired ones included until maintenance
    pub fn len(&self) -> usize {
        self.entry_count.load(Ordering::Relaxed)
    }

    /// No entries held
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a cache-event callback
    pub fn register_listener<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.listeners.register(callback)
    }

    /// Remove a cache-event callback
    pub fn unregister_listener(&self, id: ListenerId) -> bool {
        self.listeners.unregister(id)
    }

    /// Keys whose dirty entries were served and now await a refresh
    pub fn refresh_requests(&self) -> Receiver<String> {
        self.refresh_rx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use tempfile::TempDir;

    fn features(threads: u32) -> HardwareFeatures {
        let mut features = HardwareFeatures::default();
        features.cpu.threads = Some(threads);
        features
    }

    fn cache_with(config: CacheConfig) -> (CapabilityCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let cache = CapabilityCache::with_clock(config, clock.clone()).unwrap();
        (cache, clock)
    }

    fn record_events(cache: &CapabilityCache) -> Arc<Mutex<Vec<CacheEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        cache.register_listener(move |event| sink.lock().push(event.clone()));
        seen
    }

    #[test]
    fn test_hit_until_ttl_then_miss() {
        let (cache, clock) = cache_with(CacheConfig::default());
        cache
            .store_hardware_features("hw:a", features(8), Some(Duration::from_secs(120)))
            .unwrap();

        clock.advance(Duration::from_secs(119));
        let hit = cache.get_hardware_features("hw:a").unwrap();
        assert_eq!(hit.value, features(8));
        assert!(!hit.is_stale());

        clock.advance(Duration::from_secs(1));
        assert!(cache.get_hardware_features("hw:a").is_none());
        assert!(matches!(cache.lookup("hw:a"), Err(CapabilityError::CacheMiss(_))));

        let stats = cache.get_statistics();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 2);
        assert_eq!(stats.invalidations, 1);
        assert_eq!(stats.current_entries, 0);
    }

    #[test]
    fn test_ttl_is_clamped() {
        let (cache, _clock) = cache_with(CacheConfig::default());
        cache.store_hardware_features("short", features(1), Some(Duration::from_secs(1))).unwrap();
        cache
            .store_hardware_features("long", features(1), Some(Duration::from_secs(90 * 24 * 3600)))
            .unwrap();
        cache.store_hardware_features("default", features(1), None).unwrap();

        assert_eq!(cache.peek("short").unwrap().metadata.ttl(), Duration::from_secs(60));
        assert_eq!(
            cache.peek("long").unwrap().metadata.ttl(),
            Duration::from_secs(7 * 24 * 3600)
        );
        assert_eq!(
            cache.peek("default").unwrap().metadata.ttl(),
            Duration::from_secs(24 * 3600)
        );
    }

    #[test]
    fn test_one_eviction_of_least_recently_used() {
        let config = CacheConfig {
            max_entries: 3,
            ..CacheConfig::default()
        };
        let (cache, _clock) = cache_with(config);
        let events = record_events(&cache);

        for key in ["a", "b", "c"] {
            cache.store_hardware_features(key, features(1), None).unwrap();
        }
        assert!(cache.get("a").is_some());
        cache.store_hardware_features("d", features(1), None).unwrap();

        assert_eq!(cache.get_statistics().evictions, 1);
        assert!(cache.peek("b").is_none());
        for key in ["a", "c", "d"] {
            assert!(cache.peek(key).is_some(), "{} should survive", key);
        }
        assert!(events.lock().contains(&CacheEvent::Invalidated {
            key: "b".into(),
            reason: InvalidationReason::MemoryPressure,
        }));
    }

    #[test]
    fn test_dirty_entries_evicted_first_at_equal_recency() {
        let config = CacheConfig {
            max_entries: 2,
            ..CacheConfig::default()
        };
        let (cache, _clock) = cache_with(config);
        cache.store_hardware_features("a", features(1), None).unwrap();
        cache.store_hardware_features("b", features(1), None).unwrap();
        assert!(cache.mark_dirty("b"));

        cache.store_hardware_features("c", features(1), None).unwrap();
        assert!(cache.peek("a").is_some());
        assert!(cache.peek("b").is_none());
    }

    #[test]
    fn test_recency_beats_dirtiness() {
        let config = CacheConfig {
            max_entries: 2,
            ..CacheConfig::default()
        };
        let (cache, clock) = cache_with(config);
        cache.store_hardware_features("old", features(1), None).unwrap();
        clock.advance(Duration::from_secs(5));
        cache.store_hardware_features("dirty", features(1), None).unwrap();
        cache.mark_dirty("dirty");

        cache.store_hardware_features("new", features(1), None).unwrap();
        assert!(cache.peek("old").is_none());
        assert!(cache.peek("dirty").is_some());
    }

    #[test]
    fn test_dirty_hit_serves_stale_and_requests_refresh() {
        let (cache, _clock) = cache_with(CacheConfig::default());
        let requests = cache.refresh_requests();
        cache.store_hardware_features("hw:x", features(4), None).unwrap();
        cache.mark_dirty("hw:x");
        assert_eq!(cache.dirty_keys(), vec!["hw:x".to_string()]);

        let stale = cache.get_hardware_features("hw:x").unwrap();
        assert!(stale.is_stale());
        assert_eq!(stale.value, features(4));
        assert_eq!(requests.try_recv().unwrap(), "hw:x");

        // Already queued; a second read does not queue again
        cache.get_hardware_features("hw:x").unwrap();
        assert!(requests.try_recv().is_err());

        assert!(cache
            .refresh_entry("hw:x", CachePayload::HardwareFeatures(features(16)))
            .unwrap());
        let fresh = cache.get_hardware_features("hw:x").unwrap();
        assert!(!fresh.is_stale());
        assert_eq!(fresh.value, features(16));
        assert_eq!(cache.get_statistics().background_refreshes, 1);
        assert!(cache.dirty_keys().is_empty());
    }

    #[test]
    fn test_refresh_of_missing_key() {
        let (cache, _clock) = cache_with(CacheConfig::default());
        assert!(!cache
            .refresh_entry("nope", CachePayload::HardwareFeatures(features(1)))
            .unwrap());
    }

    #[test]
    fn test_wrong_payload_kind_is_a_miss() {
        let (cache, _clock) = cache_with(CacheConfig::default());
        cache.store_hardware_features("k", features(2), None).unwrap();
        assert!(cache.get_benchmark_results("k").is_none());
        assert!(cache.get_hardware_features("k").is_some());
    }

    #[test]
    fn test_invalidation_events_and_counts() {
        let (cache, _clock) = cache_with(CacheConfig::default());
        let events = record_events(&cache);
        for key in ["x", "y", "z"] {
            cache.store_hardware_features(key, features(1), None).unwrap();
        }

        assert!(cache.invalidate_entry("x", InvalidationReason::Manual).unwrap());
        assert!(!cache.invalidate_entry("x", InvalidationReason::Manual).unwrap());
        assert_eq!(cache.invalidate_all(InvalidationReason::HardwareChange).unwrap(), 2);
        assert!(cache.is_empty());
        assert_eq!(cache.get_statistics().invalidations, 3);

        let reasons: Vec<_> = events
            .lock()
            .iter()
            .filter_map(|e| match e {
                CacheEvent::Invalidated { key, reason } => Some((key.clone(), *reason)),
                _ => None,
            })
            .collect();
        assert_eq!(
            reasons,
            vec![
                ("x".to_string(), InvalidationReason::Manual),
                ("y".to_string(), InvalidationReason::HardwareChange),
                ("z".to_string(), InvalidationReason::HardwareChange),
            ]
        );
    }

    #[test]
    fn test_maintenance_expires_and_evicts() {
        let (cache, clock) = cache_with(CacheConfig::default());
        cache.store_hardware_features("short", features(1), Some(Duration::from_secs(60))).unwrap();
        cache.store_hardware_features("long", features(1), Some(Duration::from_secs(3600))).unwrap();
        clock.advance(Duration::from_secs(61));

        let report = cache.perform_maintenance().unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(report.evicted, 0);
        assert_eq!(report.persisted, None);
        assert_eq!(cache.len(), 1);

        let mut smaller = cache.get_configuration();
        smaller.max_memory_usage = 1;
        cache.configure(smaller).unwrap();
        let report = cache.perform_maintenance().unwrap();
        assert_eq!(report.evicted, 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_statistics_and_reset() {
        let (cache, _clock) = cache_with(CacheConfig::default());
        cache.store_hardware_features("k", features(1), None).unwrap();
        cache.get("k");
        cache.get("k");
        cache.get("k");
        cache.get("missing");

        let stats = cache.get_statistics();
        assert_eq!(stats.total_requests, 4);
        assert!((stats.hit_ratio - 0.75).abs() < 1e-9);
        assert!(cache.needs_aggressive_refresh());
        assert!(stats.memory_usage_bytes > 0);

        cache.reset_statistics();
        let stats = cache.get_statistics();
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.hit_ratio, 0.0);
        assert_eq!(stats.current_entries, 1);
        assert!(!cache.needs_aggressive_refresh());
    }

    #[test]
    fn test_configure_is_atomic() {
        let (cache, _clock) = cache_with(CacheConfig::default());
        let before = cache.get_configuration();
        let invalid = CacheConfig {
            min_ttl: Duration::from_secs(3600),
            max_ttl: Duration::from_secs(60),
            ..CacheConfig::default()
        };
        assert!(cache.configure(invalid).unwrap_err().is_config_error());
        assert_eq!(cache.get_configuration(), before);
    }

    #[test]
    fn test_hybrid_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let config = CacheConfig {
            storage: CacheStorage::Hybrid,
            storage_path: dir.path().join("caps.cache"),
            enable_compression: true,
            ..CacheConfig::default()
        };

        let (cache, _clock) = cache_with(config.clone());
        cache.store_hardware_features("hw:a", features(12), None).unwrap();
        // Hybrid mode does not write through
        assert!(!config.storage_path.exists());
        assert_eq!(cache.save_cache().unwrap(), 1);

        let (reloaded, _clock) = cache_with(config);
        assert_eq!(reloaded.get_hardware_features("hw:a").unwrap().value, features(12));
    }

    #[test]
    fn test_reload_drops_expired_entries() {
        let dir = TempDir::new().unwrap();
        let config = CacheConfig {
            storage: CacheStorage::Hybrid,
            storage_path: dir.path().join("caps.cache"),
            ..CacheConfig::default()
        };

        let clock = Arc::new(ManualClock::default());
        let cache = CapabilityCache::with_clock(config.clone(), clock.clone()).unwrap();
        cache.store_hardware_features("short", features(1), Some(Duration::from_secs(60))).unwrap();
        cache.store_hardware_features("long", features(2), Some(Duration::from_secs(3600))).unwrap();
        cache.perform_maintenance().unwrap();

        clock.advance(Duration::from_secs(61));
        let reloaded = CapabilityCache::with_clock(config, clock).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.get("short").is_none());
        assert!(reloaded.get("long").is_some());
    }

    #[test]
    fn test_persistent_mode_writes_through() {
        let dir = TempDir::new().unwrap();
        let config = CacheConfig {
            storage: CacheStorage::Persistent,
            storage_path: dir.path().join("caps.cache"),
            ..CacheConfig::default()
        };
        let (cache, _clock) = cache_with(config.clone());
        cache.store_hardware_features("hw:a", features(3), None).unwrap();
        assert!(config.storage_path.exists());

        cache.invalidate_entry("hw:a", InvalidationReason::Manual).unwrap();
        let (reloaded, _clock) = cache_with(config);
        assert!(reloaded.is_empty());
    }

    #[test]
    fn test_unreadable_cache_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("caps.cache");
        std::fs::write(&path, b"{ not json").unwrap();
        let config = CacheConfig {
            storage: CacheStorage::Hybrid,
            storage_path: path,
            ..CacheConfig::default()
        };
        let (cache, _clock) = cache_with(config);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_storage_controls() {
        let dir = TempDir::new().unwrap();
        let config = CacheConfig {
            storage: CacheStorage::Hybrid,
            storage_path: dir.path().join("caps.cache"),
            ..CacheConfig::default()
        };
        let (cache, _clock) = cache_with(config.clone());
        cache.store_hardware_features("hw:a", features(4), None).unwrap();

        assert!(cache.is_storage_available());
        assert_eq!(cache.get_storage_path(), config.storage_path);
        assert_eq!(cache.get_storage_size(), 0);
        cache.save_cache().unwrap();
        assert!(cache.get_storage_size() > 0);

        let moved = dir.path().join("nested").join("moved.cache");
        cache.set_storage_path(&moved).unwrap();
        assert_eq!(cache.get_storage_path(), moved);
        assert!(cache.is_storage_available());
        cache.save_cache().unwrap();
        assert!(moved.exists());
        assert!(config.storage_path.exists());

        assert!(cache.clear_storage().unwrap());
        assert!(!moved.exists());
        assert_eq!(cache.get_storage_size(), 0);
        assert!(!cache.clear_storage().unwrap());
        assert_eq!(cache.len(), 1);
        assert!(cache.set_storage_path("").unwrap_err().is_config_error());
    }

    #[test]
    fn test_memory_cache_has_no_storage() {
        let (cache, _clock) = cache_with(CacheConfig::for_storage(CacheStorage::Memory));
        assert!(!cache.is_storage_available());
    }

    #[test]
    fn test_stale_entries_are_marked_dirty() {
        let (cache, clock) = cache_with(CacheConfig::default());
        cache.store_hardware_features("old", features(1), Some(Duration::from_secs(3600))).unwrap();
        clock.advance(Duration::from_secs(120));
        cache.store_hardware_features("new", features(2), Some(Duration::from_secs(3600))).unwrap();

        assert_eq!(cache.mark_stale_entries(Duration::from_secs(60)), 1);
        assert_eq!(cache.dirty_keys(), vec!["old".to_string()]);
        assert_eq!(cache.mark_stale_entries(Duration::from_secs(60)), 0);
    }

    #[test]
    fn test_keys_are_stable_per_identity() {
        let identity = HardwareIdentity::host();
        assert_eq!(platform_cache_key(&identity), platform_cache_key(&identity.clone()));
        assert!(hardware_cache_key(&identity).starts_with("hw:"));
        assert_ne!(
            benchmark_cache_key(&identity, &BenchmarkConfig::default()),
            benchmark_cache_key(&identity, &BenchmarkConfig::quick())
        );
    }
}
