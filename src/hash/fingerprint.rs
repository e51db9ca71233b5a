//! Fingerprints and content hashes

use crate::error::Result;
use serde::Serialize;
use xxhash_rust::xxh3::{xxh3_64, Xxh3};

/// Separator fed between fields so ("ab", "c") and ("a", "bc") differ
const FIELD_SEPARATOR: [u8; 1] = [0x1f];

/// Streaming fingerprint builder over a sequence of string fields
pub struct FingerprintHasher {
    inner: Xxh3,
    fields: usize,
}

impl FingerprintHasher {
    /// Create an empty builder
    pub fn new() -> Self {
        Self {
            inner: Xxh3::new(),
            fields: 0,
        }
    }

    /// Feed one field; fields are normalised to trimmed lowercase
    pub fn field(&mut self, value: &str) -> &mut Self {
        if self.fields > 0 {
            self.inner.update(&FIELD_SEPARATOR);
        }
        self.inner.update(value.trim().to_lowercase().as_bytes());
        self.fields += 1;
        self
    }

    /// Finish as a 16-character lowercase hex string
    pub fn finish_hex(&self) -> String {
        format!("{:016x}", self.inner.digest())
    }
}

impl Default for FingerprintHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Fingerprint an ordered list of fields
pub fn fingerprint_fields(fields: &[&str]) -> String {
    let mut hasher = FingerprintHasher::new();
    for field in fields {
        hasher.field(field);
    }
    hasher.finish_hex()
}

/// Hash of a value's canonical JSON encoding
///
/// Used as the content hash stored in cache metadata; a mismatch on read
/// means the entry was altered after it was stored.
pub fn content_hash<T: Serialize + ?Sized>(value: &T) -> Result<u64> {
    let bytes = serde_json::to_vec(value)?;
    Ok(xxh3_64(&bytes))
}
