//! Error types for captier
//!
//! Subsystem-level failures (a probe that did not answer, a benchmark that ran
//! over budget) are normally absorbed by the detection pipeline and turned into
//! warnings. Only configuration errors and total detection failure reach the
//! caller as `Err`.

use crate::core::Subsystem;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for capability detection operations
#[derive(Error, Debug)]
pub enum CapabilityError {
    /// A hardware probe for one subsystem failed
    #[error("{subsystem} probe unavailable: {reason}")]
    ProbeUnavailable {
        /// Subsystem whose probe failed
        subsystem: Subsystem,
        /// Probe-provided reason
        reason: String,
    },

    /// A single micro-benchmark exceeded its duration budget
    #[error("benchmark '{name}' exceeded its {limit:?} budget")]
    BenchmarkTimeout {
        /// Benchmark name
        name: String,
        /// Budget that was exceeded
        limit: Duration,
    },

    /// The overall detection ceiling was hit
    #[error("detection exceeded its ceiling of {0:?}")]
    DetectionTimedOut(Duration),

    /// Every hardware probe failed
    #[error("capability detection failed: {0}")]
    DetectionFailed(String),

    /// Tier thresholds are not monotonic or not finite
    #[error("invalid tier thresholds for '{subsystem}': {reason}")]
    InvalidThresholds {
        /// Threshold scope ("cpu", "gpu", "memory", "io" or "overall")
        subsystem: String,
        /// Why the thresholds were rejected
        reason: String,
    },

    /// Configuration value or combination rejected
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Key absent or expired
    #[error("cache miss for '{0}'")]
    CacheMiss(String),

    /// No prediction rule and no architecture family matched
    #[error("no hardware profile matches {0}")]
    UnknownHardwareProfile(String),

    /// Operation cancelled by the caller
    #[error("operation cancelled")]
    Cancelled,

    /// `initialize` has not been called (or `shutdown` already ran)
    #[error("detection system is not initialized")]
    NotInitialized,

    /// Cancellation requested outside the probing/benchmarking phases
    #[error("detection cannot be cancelled while {0}")]
    NotCancellable(String),

    /// Capability name not in the capability table
    #[error("unknown capability '{0}'")]
    UnknownCapability(String),

    /// Subsystem name not recognised
    #[error("unknown subsystem '{0}'")]
    UnknownSubsystem(String),

    /// I/O error during cache persistence or storage benchmarks
    #[error("I/O error at '{path}': {source}")]
    Io {
        /// Path involved in the failed operation
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// JSON encoding or decoding failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Persisted cache could not be decompressed
    #[error("compression error: {0}")]
    Compression(String),

    /// A worker thread could not be spawned or joined
    #[error("worker thread error: {0}")]
    ThreadError(String),
}

impl CapabilityError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Create a probe failure for a subsystem
    pub fn probe_unavailable(subsystem: Subsystem, reason: impl Into<String>) -> Self {
        Self::ProbeUnavailable {
            subsystem,
            reason: reason.into(),
        }
    }

    /// Check if the pipeline can absorb this error and keep going
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ProbeUnavailable { .. }
                | Self::BenchmarkTimeout { .. }
                | Self::DetectionTimedOut(_)
                | Self::DetectionFailed(_)
                | Self::CacheMiss(_)
                | Self::UnknownHardwareProfile(_)
        )
    }

    /// Check if this error is a caller programming error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::InvalidConfig(_) | Self::InvalidThresholds { .. })
    }
}

/// Result type alias for captier operations
pub type Result<T> = std::result::Result<T, CapabilityError>;

impl From<serde_json::Error> for CapabilityError {
    fn from(err: serde_json::Error) -> Self {
        CapabilityError::Serialization(err.to_string())
    }
}

/// Extension trait for adding path context to std::io::Result
pub trait IoResultExt<T> {
    /// Add path context to an I/O error
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| CapabilityError::io(path, e))
    }
}
