//! Tier thresholds

use crate::core::PerformanceTier;
use crate::error::{CapabilityError, Result};
use serde::{Deserialize, Serialize};

/// Minimum scores for each tier
///
/// Must satisfy `minimal <= limited <= standard <= high`, all finite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierThresholds {
    /// Minimal tier threshold
    pub minimal: f64,
    /// Limited tier threshold
    pub limited: f64,
    /// Standard tier threshold
    pub standard: f64,
    /// High tier threshold
    pub high: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            minimal: 0.0,
            limited: 150.0,
            standard: 400.0,
            high: 750.0,
        }
    }
}

impl TierThresholds {
    /// Create thresholds (unvalidated)
    pub fn new(minimal: f64, limited: f64, standard: f64, high: f64) -> Self {
        Self {
            minimal,
            limited,
            standard,
            high,
        }
    }

    /// Threshold for one tier
    pub fn threshold(&self, tier: PerformanceTier) -> f64 {
        match tier {
            PerformanceTier::Minimal => self.minimal,
            PerformanceTier::Limited => self.limited,
            PerformanceTier::Standard => self.standard,
            PerformanceTier::High => self.high,
        }
    }

    /// Check monotonicity and finiteness; `scope` names the thresholds in errors
    pub fn validate(&self, scope: &str) -> Result<()> {
        let values = [self.minimal, self.limited, self.standard, self.high];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(CapabilityError::InvalidThresholds {
                subsystem: scope.to_string(),
                reason: "thresholds must be finite".to_string(),
            });
        }
        for (pair, tiers) in values.windows(2).zip(PerformanceTier::ALL.windows(2)) {
            if pair[0] > pair[1] {
                return Err(CapabilityError::InvalidThresholds {
                    subsystem: scope.to_string(),
                    reason: format!(
                        "{} threshold {} exceeds {} threshold {}",
                        tiers[0], pair[0], tiers[1], pair[1]
                    ),
                });
            }
        }
        Ok(())
    }

    /// Highest tier whose threshold `score` meets; never below `Minimal`
    pub fn classify(&self, score: f64) -> PerformanceTier {
        PerformanceTier::ALL
            .iter()
            .rev()
            .copied()
            .find(|tier| score >= self.threshold(*tier))
            .unwrap_or(PerformanceTier::Minimal)
    }
}
