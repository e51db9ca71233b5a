//! Stable hashing for cache keys and content validation
//!
//! Uses XXHash3: fingerprints only need to be stable and well distributed,
//! not cryptographically strong.

mod fingerprint;

pub use fingerprint::*;
