//! Cache entries, events and statistics

use crate::benchmark::SystemBenchmarkResults;
use crate::core::{Capability, CapabilityMask, PerformanceTier, PlatformInfo};
use crate::system::HardwareFeatures;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Capability summary of one detection run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedCapabilityInfo {
    /// Capability mask, driver bits included
    pub capabilities: CapabilityMask,
    /// Overall performance tier
    pub tier: PerformanceTier,
    /// Platform snapshot
    pub platform: PlatformInfo,
    /// Software fallback availability
    pub fallback_availability: BTreeMap<Capability, bool>,
    /// Capabilities added by each driver
    pub driver_capabilities: BTreeMap<String, CapabilityMask>,
    /// Hardware confidence of the run
    pub hardware_confidence: f64,
    /// Benchmark confidence of the run
    pub benchmark_confidence: f64,
    /// Combined confidence of the run
    pub detection_confidence: f64,
    /// Warnings of the run
    pub warnings: Vec<String>,
    /// When the run happened
    pub detected_at: DateTime<Utc>,
    /// How long the run took
    pub detection_duration: Duration,
}

/// Cached value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CachePayload {
    /// Capability summary
    CapabilityInfo(CachedCapabilityInfo),
    /// Raw probe output
    HardwareFeatures(HardwareFeatures),
    /// Benchmark run
    BenchmarkResults(SystemBenchmarkResults),
}

impl CachePayload {
    /// Variant name
    pub fn kind(&self) -> &'static str {
        match self {
            CachePayload::CapabilityInfo(_) => "capability_info",
            CachePayload::HardwareFeatures(_) => "hardware_features",
            CachePayload::BenchmarkResults(_) => "benchmark_results",
        }
    }
}

/// Bookkeeping for an entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntryMetadata {
    /// When the payload was stored or last refreshed
    pub created_at: DateTime<Utc>,
    /// Last read
    pub last_accessed: DateTime<Utc>,
    /// First instant at which the entry is a miss
    pub expires_at: DateTime<Utc>,
    /// Reads since stored
    pub access_count: u64,
    /// Known stale; served while a refresh is pending
    pub dirty: bool,
    /// Identifier of the process/host that stored the entry
    pub source: String,
    /// XXH3 of the payload's JSON encoding
    pub content_hash: u64,
    /// Estimated in-memory size
    pub size_bytes: usize,
}

impl CacheEntryMetadata {
    /// Whether the entry is expired at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// TTL the entry was stored with
    pub fn ttl(&self) -> Duration {
        (self.expires_at - self.created_at).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Payload plus metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Cached value
    pub payload: CachePayload,
    /// Bookkeeping
    pub metadata: CacheEntryMetadata,
}

/// A typed cache hit
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
    /// Cached value
    pub value: T,
    /// Metadata at the time of the read
    pub metadata: CacheEntryMetadata,
}

impl<T> Cached<T> {
    /// Whether a refresh was pending when read
    pub fn is_stale(&self) -> bool {
        self.metadata.dirty
    }
}

/// Why an entry left the cache (or was replaced)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidationReason {
    /// TTL elapsed
    Expired,
    /// Explicit request
    Manual,
    /// Hardware configuration changed
    HardwareChange,
    /// A driver was updated
    DriverUpdate,
    /// Configuration changed
    ConfigChange,
    /// Evicted by capacity limits
    MemoryPressure,
    /// Replaced by the background updater
    BackgroundRefresh,
}

impl fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InvalidationReason::Expired => "expired",
            InvalidationReason::Manual => "manual",
            InvalidationReason::HardwareChange => "hardware change",
            InvalidationReason::DriverUpdate => "driver update",
            InvalidationReason::ConfigChange => "config change",
            InvalidationReason::MemoryPressure => "memory pressure",
            InvalidationReason::BackgroundRefresh => "background refresh",
        };
        f.write_str(name)
    }
}

/// Notification delivered to cache listeners
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    /// A read
    Access {
        /// Key read
        key: String,
        /// Whether it was a hit
        hit: bool,
    },
    /// An entry was removed or replaced
    Invalidated {
        /// Key affected
        key: String,
        /// Why
        reason: InvalidationReason,
    },
    /// A maintenance pass finished
    Maintenance(MaintenanceReport),
    /// Configuration replaced
    Reconfigured,
    /// A dirty entry was served and a refresh was queued
    RefreshRequested {
        /// Key to refresh
        key: String,
    },
}

/// What a maintenance pass did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    /// Expired entries removed
    pub expired: usize,
    /// Entries evicted for capacity
    pub evicted: usize,
    /// Entries written to disk, when persisted
    pub persisted: Option<usize>,
}

/// Cache counters since the last reset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStatistics {
    /// Reads
    pub total_requests: u64,
    /// Reads that found a live entry
    pub cache_hits: u64,
    /// Reads that found nothing or an expired entry
    pub cache_misses: u64,
    /// Capacity evictions
    pub evictions: u64,
    /// Removals for any other reason
    pub invalidations: u64,
    /// Entries replaced by background refresh
    pub background_refreshes: u64,
    /// Entries currently held
    pub current_entries: usize,
    /// Estimated bytes held
    pub memory_usage_bytes: usize,
    /// `cache_hits / total_requests`, 0 with no requests
    pub hit_ratio: f64,
    /// Mean read latency
    pub avg_access_time: Duration,
    /// When counters were last reset
    pub last_reset: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_is_inclusive() {
        let now = Utc::now();
        let metadata = CacheEntryMetadata {
            created_at: now,
            last_accessed: now,
            expires_at: now + chrono::Duration::seconds(60),
            access_count: 0,
            dirty: false,
            source: "test".into(),
            content_hash: 0,
            size_bytes: 0,
        };
        assert!(!metadata.is_expired(now + chrono::Duration::seconds(59)));
        assert!(metadata.is_expired(now + chrono::Duration::seconds(60)));
        assert_eq!(metadata.ttl(), Duration::from_secs(60));
    }

    #[test]
    fn test_payload_tagging() {
        let payload = CachePayload::HardwareFeatures(HardwareFeatures::default());
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.starts_with(r#"{"kind":"hardware_features""#));
        let back: CachePayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back, payload);
    }
}
