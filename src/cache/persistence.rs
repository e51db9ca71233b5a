//! On-disk cache file
//!
//! The file is the JSON encoding of every entry, optionally LZ4-compressed
//! behind a 4-byte magic. Writes go to a sibling temp file that is renamed
//! over the target, so readers never observe a half-written cache.

use super::CacheEntry;
use crate::error::{CapabilityError, IoResultExt, Result};
use chrono::{DateTime, Utc};
use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Current on-disk format version
pub const CACHE_FORMAT_VERSION: u32 = 1;

/// Prefix of LZ4-compressed cache files
const COMPRESSED_MAGIC: &[u8; 4] = b"CTZ1";

#[derive(Serialize)]
struct PersistedCacheRef<'a> {
    version: u32,
    saved_at: DateTime<Utc>,
    source: &'a str,
    entries: BTreeMap<&'a str, &'a CacheEntry>,
}

#[derive(Deserialize)]
struct PersistedCache {
    version: u32,
    saved_at: DateTime<Utc>,
    source: String,
    entries: BTreeMap<String, CacheEntry>,
}

/// Entries recovered from a cache file
#[derive(Debug, Default)]
pub struct LoadedCache {
    /// Live entries
    pub entries: Vec<(String, CacheEntry)>,
    /// Entries dropped because they had expired
    pub expired: usize,
    /// Entries dropped because their content hash no longer matched
    pub corrupted: usize,
    /// When the file was written, if it existed
    pub saved_at: Option<DateTime<Utc>>,
    /// Writer recorded in the file
    pub source: Option<String>,
}

/// Write `entries` to `path`; returns the number written
pub fn write_cache_file<'a, I>(path: &Path, entries: I, source: &str, compress: bool) -> Result<usize>
where
    I: IntoIterator<Item = (&'a String, &'a CacheEntry)>,
{
    let snapshot = PersistedCacheRef {
        version: CACHE_FORMAT_VERSION,
        saved_at: Utc::now(),
        source,
        entries: entries.into_iter().map(|(k, v)| (k.as_str(), v)).collect(),
    };
    let count = snapshot.entries.len();

    let json = serde_json::to_vec(&snapshot)?;
    let bytes = if compress {
        let mut out = COMPRESSED_MAGIC.to_vec();
        out.extend_from_slice(&compress_prepend_size(&json));
        out
    } else {
        json
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_path(parent)?;
    }

    let temp_path = path.with_extension("tmp");
    {
        let file = File::create(&temp_path).with_path(&temp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&bytes).with_path(&temp_path)?;
        let file = writer
            .into_inner()
            .map_err(|e| CapabilityError::io(&temp_path, e.into_error()))?;
        file.sync_all().with_path(&temp_path)?;
    }
    std::fs::rename(&temp_path, path).with_path(path)?;

    tracing::debug!(
        "Saved {} cache entries to {} ({})",
        count,
        path.display(),
        humansize::format_size(bytes.len() as u64, humansize::BINARY)
    );
    Ok(count)
}

/// Read `path`, dropping entries that expired by `now` or fail hash validation
///
/// A missing file is an empty cache, not an error.
pub fn read_cache_file(path: &Path, now: DateTime<Utc>) -> Result<LoadedCache> {
    if !path.exists() {
        return Ok(LoadedCache::default());
    }

    let raw = std::fs::read(path).with_path(path)?;
    let json = if raw.starts_with(COMPRESSED_MAGIC) {
        decompress_size_prepended(&raw[COMPRESSED_MAGIC.len()..])
            .map_err(|e| CapabilityError::Compression(format!("LZ4 decompression failed: {}", e)))?
    } else {
        raw
    };

    let persisted: PersistedCache = serde_json::from_slice(&json)?;
    if persisted.version != CACHE_FORMAT_VERSION {
        return Err(CapabilityError::Serialization(format!(
            "unsupported cache format version {} (expected {})",
            persisted.version, CACHE_FORMAT_VERSION
        )));
    }

    let mut loaded = LoadedCache {
        saved_at: Some(persisted.saved_at),
        source: Some(persisted.source),
        ..Default::default()
    };

    for (key, entry) in persisted.entries {
        if entry.metadata.is_expired(now) {
            loaded.expired += 1;
            continue;
        }
        if crate::hash::content_hash(&entry.payload)? != entry.metadata.content_hash {
            tracing::warn!("Dropping cache entry '{}': content hash mismatch", key);
            loaded.corrupted += 1;
            continue;
        }
        loaded.entries.push((key, entry));
    }

    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheEntryMetadata, CachePayload};
    use crate::system::HardwareFeatures;
    use tempfile::TempDir;

    fn entry(now: DateTime<Utc>, ttl_secs: i64, threads: u32) -> CacheEntry {
        let mut features = HardwareFeatures::default();
        features.cpu.threads = Some(threads);
        let payload = CachePayload::HardwareFeatures(features);
        let content_hash = crate::hash::content_hash(&payload).unwrap();
        CacheEntry {
            payload,
            metadata: CacheEntryMetadata {
                created_at: now,
                last_accessed: now,
                expires_at: now + chrono::Duration::seconds(ttl_secs),
                access_count: 0,
                dirty: false,
                source: "test".into(),
                content_hash,
                size_bytes: 64,
            },
        }
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let loaded = read_cache_file(&dir.path().join("absent.cache"), Utc::now()).unwrap();
        assert!(loaded.entries.is_empty());
        assert!(loaded.saved_at.is_none());
    }

    #[test]
    fn test_expired_entries_are_dropped_on_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("caps.cache");
        let now = Utc::now();

        let mut entries = BTreeMap::new();
        entries.insert("live".to_string(), entry(now, 3600, 8));
        entries.insert("stale".to_string(), entry(now, 60, 4));
        assert_eq!(write_cache_file(&path, &entries, "test", false).unwrap(), 2);

        let later = now + chrono::Duration::seconds(120);
        let loaded = read_cache_file(&path, later).unwrap();
        assert_eq!(loaded.expired, 1);
        assert_eq!(loaded.entries.len(), 1);
        assert_eq!(loaded.entries[0].0, "live");
        assert_eq!(loaded.entries[0].1, entries["live"]);
    }

    #[test]
    fn test_compressed_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("caps.cache");
        let now = Utc::now();

        let mut entries = BTreeMap::new();
        entries.insert("hw:abc".to_string(), entry(now, 3600, 16));
        write_cache_file(&path, &entries, "test", true).unwrap();

        let raw = std::fs::read(&path).unwrap();
        assert!(raw.starts_with(COMPRESSED_MAGIC));
        assert!(!path.with_extension("tmp").exists());

        let loaded = read_cache_file(&path, now).unwrap();
        assert_eq!(loaded.entries, vec![("hw:abc".to_string(), entries["hw:abc"].clone())]);
        assert_eq!(loaded.source.as_deref(), Some("test"));
    }

    #[test]
    fn test_tampered_entry_is_dropped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("caps.cache");
        let now = Utc::now();

        let mut tampered = entry(now, 3600, 8);
        tampered.metadata.content_hash ^= 1;
        let mut entries = BTreeMap::new();
        entries.insert("k".to_string(), tampered);
        write_cache_file(&path, &entries, "test", false).unwrap();

        let loaded = read_cache_file(&path, now).unwrap();
        assert_eq!(loaded.corrupted, 1);
        assert!(loaded.entries.is_empty());
    }

    #[test]
    fn test_garbage_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("caps.cache");
        std::fs::write(&path, b"CTZ1not lz4 at all").unwrap();
        assert!(matches!(
            read_cache_file(&path, Utc::now()),
            Err(CapabilityError::Compression(_))
        ));
    }
}
