//! Performance tiers and hardware subsystems

use crate::error::{CapabilityError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Coarse performance classification, ordered from weakest to strongest
///
/// Tiers are always derived from probe or benchmark data; clients read them
/// but never assign them.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum PerformanceTier {
    /// Dreamcast-class: ~16MB RAM, single slow core
    #[default]
    Minimal = 0,
    /// PSP-class: 32-64MB RAM, modest CPU
    Limited = 1,
    /// Modern mobile/web
    Standard = 2,
    /// Desktop PC
    High = 3,
}

impl PerformanceTier {
    /// All tiers, lowest first
    pub const ALL: [PerformanceTier; 4] = [
        PerformanceTier::Minimal,
        PerformanceTier::Limited,
        PerformanceTier::Standard,
        PerformanceTier::High,
    ];

    /// Ordinal value used for comparisons
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    /// Tier for an ordinal, saturating at `High`
    pub fn from_ordinal(ordinal: u8) -> Self {
        match ordinal {
            0 => PerformanceTier::Minimal,
            1 => PerformanceTier::Limited,
            2 => PerformanceTier::Standard,
            _ => PerformanceTier::High,
        }
    }

    /// One tier down; `Minimal` is the floor
    pub fn lowered(self) -> Self {
        Self::from_ordinal(self.ordinal().saturating_sub(1))
    }

    /// Stable display name
    pub fn name(self) -> &'static str {
        match self {
            PerformanceTier::Minimal => "Minimal",
            PerformanceTier::Limited => "Limited",
            PerformanceTier::Standard => "Standard",
            PerformanceTier::High => "High",
        }
    }
}

impl fmt::Display for PerformanceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PerformanceTier {
    type Err = CapabilityError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CapabilityError::config(format!("unknown performance tier '{}'", s)))
    }
}

/// Hardware subsystem probed and benchmarked independently
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subsystem {
    /// Central processor
    Cpu,
    /// Graphics processor
    Gpu,
    /// Main memory
    Memory,
    /// Storage, network, input and audio devices
    Io,
}

impl Subsystem {
    /// All subsystems in probe order
    pub const ALL: [Subsystem; 4] = [
        Subsystem::Cpu,
        Subsystem::Gpu,
        Subsystem::Memory,
        Subsystem::Io,
    ];

    /// Lowercase name used in threshold and reasoning queries
    pub fn name(self) -> &'static str {
        match self {
            Subsystem::Cpu => "cpu",
            Subsystem::Gpu => "gpu",
            Subsystem::Memory => "memory",
            Subsystem::Io => "io",
        }
    }

    /// Parse a scope name; `"overall"` maps to `None`
    pub fn parse_scope(scope: &str) -> Result<Option<Subsystem>> {
        if scope.trim().eq_ignore_ascii_case("overall") {
            Ok(None)
        } else {
            scope.parse().map(Some)
        }
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Subsystem {
    type Err = CapabilityError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Subsystem::Cpu),
            "gpu" => Ok(Subsystem::Gpu),
            "memory" | "mem" => Ok(Subsystem::Memory),
            "io" | "i/o" => Ok(Subsystem::Io),
            _ => Err(CapabilityError::UnknownSubsystem(s.to_string())),
        }
    }
}
