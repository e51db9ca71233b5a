//! Performance tier classification
//!
//! Subsystem scores map to tiers through per-subsystem thresholds. The
//! overall tier is the minimum of the available subsystem tiers; the
//! weighted overall score is only used as a cross-check.

use super::TierThresholds;
use crate::benchmark::{SubsystemBenchmarkResults, SystemBenchmarkResults};
use crate::core::{PerformanceTier, Subsystem};
use crate::error::{CapabilityError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Scope name for the aggregate thresholds
pub const OVERALL_SCOPE: &str = "overall";

/// Outcome of classifying one benchmark run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// Overall tier
    pub tier: PerformanceTier,
    /// Tier per subsystem that produced a score
    pub subsystem_tiers: BTreeMap<Subsystem, PerformanceTier>,
    /// Subsystem that determined the overall tier
    pub limiting_subsystem: Option<Subsystem>,
    /// Overall score vs. minimum tier disagreement, if any
    pub warnings: Vec<String>,
}

/// Maps benchmark scores to tiers
pub struct TierClassifier {
    thresholds: RwLock<BTreeMap<String, TierThresholds>>,
    epsilon: RwLock<f64>,
}

impl TierClassifier {
    /// Classifier with default thresholds for every scope
    pub fn new(epsilon: f64) -> Self {
        let thresholds = Subsystem::ALL
            .iter()
            .map(|s| s.name())
            .chain(std::iter::once(OVERALL_SCOPE))
            .map(|scope| (scope.to_string(), TierThresholds::default()))
            .collect();
        Self {
            thresholds: RwLock::new(thresholds),
            epsilon: RwLock::new(epsilon),
        }
    }

    /// Canonical scope key ("cpu", "gpu", "memory", "io" or "overall")
    fn scope_key(scope: &str) -> Result<String> {
        Ok(match Subsystem::parse_scope(scope)? {
            Some(subsystem) => subsystem.name().to_string(),
            None => OVERALL_SCOPE.to_string(),
        })
    }

    /// Current thresholds for a scope
    pub fn get_tier_thresholds(&self, scope: &str) -> Result<TierThresholds> {
        let key = Self::scope_key(scope)?;
        Ok(self.thresholds.read().get(&key).copied().unwrap_or_default())
    }

    /// Replace a scope's thresholds; on error the previous ones are kept
    pub fn update_tier_thresholds(&self, scope: &str, thresholds: TierThresholds) -> Result<()> {
        let key = Self::scope_key(scope)?;
        thresholds.validate(&key)?;
        self.thresholds.write().insert(key.clone(), thresholds);
        tracing::info!("Updated {} tier thresholds: {:?}", key, thresholds);
        Ok(())
    }

    /// Every scope's thresholds
    pub fn all_thresholds(&self) -> BTreeMap<String, TierThresholds> {
        self.thresholds.read().clone()
    }

    /// Relative tolerance of the overall-score cross-check
    pub fn epsilon(&self) -> f64 {
        *self.epsilon.read()
    }

    /// Change the cross-check tolerance
    pub fn set_epsilon(&self, epsilon: f64) -> Result<()> {
        if !epsilon.is_finite() || !(0.0..1.0).contains(&epsilon) {
            return Err(CapabilityError::config("tier_discrepancy_epsilon must be within [0, 1)"));
        }
        *self.epsilon.write() = epsilon;
        Ok(())
    }

    /// Classify a raw score against a scope's thresholds
    pub fn classify_score(&self, scope: &str, score: f64) -> Result<PerformanceTier> {
        Ok(self.get_tier_thresholds(scope)?.classify(score))
    }

    /// Tier for one subsystem; `None` when its score is unavailable
    pub fn classify_subsystem(&self, results: &SubsystemBenchmarkResults) -> Option<PerformanceTier> {
        let thresholds = self.thresholds.read();
        let scope = thresholds
            .get(results.subsystem.name())
            .copied()
            .unwrap_or_default();
        results.score.map(|score| scope.classify(score))
    }

    /// Overall tier of a benchmark run
    pub fn classify_tier(&self, results: &SystemBenchmarkResults) -> PerformanceTier {
        self.classify(results).tier
    }

    /// Full classification with subsystem tiers and cross-check warnings
    pub fn classify(&self, results: &SystemBenchmarkResults) -> Classification {
        let mut subsystem_tiers = BTreeMap::new();
        for subsystem in results.subsystems() {
            if let Some(tier) = self.classify_subsystem(subsystem) {
                subsystem_tiers.insert(subsystem.subsystem, tier);
            }
        }

        let limiting = subsystem_tiers
            .iter()
            .min_by_key(|(_, tier)| **tier)
            .map(|(subsystem, tier)| (*subsystem, *tier));

        let overall_thresholds = self
            .thresholds
            .read()
            .get(OVERALL_SCOPE)
            .copied()
            .unwrap_or_default();

        let tier = match (limiting, results.overall_score) {
            (Some((_, tier)), _) => tier,
            (None, Some(score)) => overall_thresholds.classify(score),
            (None, None) => PerformanceTier::Minimal,
        };

        let mut warnings = Vec::new();
        if let (Some((subsystem, min_tier)), Some(score)) = (limiting, results.overall_score) {
            let epsilon = self.epsilon();
            let upper = overall_thresholds.classify(score * (1.0 + epsilon));
            let lower = overall_thresholds.classify(score * (1.0 - epsilon));
            if upper < min_tier || lower > min_tier {
                let by_score = overall_thresholds.classify(score);
                warnings.push(format!(
                    "overall score {:.1} suggests {} but {} limits the tier to {}",
                    score, by_score, subsystem, min_tier
                ));
                tracing::debug!("{}", warnings[warnings.len() - 1]);
            }
        }

        Classification {
            tier,
            subsystem_tiers,
            limiting_subsystem: limiting.map(|(s, _)| s),
            warnings,
        }
    }

    /// Classify and write the tiers back into `results`; returns the classification
    pub fn annotate(&self, results: &mut SystemBenchmarkResults) -> Classification {
        let classification = self.classify(results);
        for subsystem in Subsystem::ALL {
            results.subsystem_mut(subsystem).tier = classification.subsystem_tiers.get(&subsystem).copied();
        }
        results.overall_tier = Some(classification.tier);
        for warning in &classification.warnings {
            if !results.warnings.contains(warning) {
                results.warnings.push(warning.clone());
            }
        }
        classification
    }
}

impl Default for TierClassifier {
    fn default() -> Self {
        Self::new(0.10)
    }
}
