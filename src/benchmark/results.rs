//! Benchmark result types and score aggregation

use crate::core::{PerformanceTier, Subsystem};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fixed weights combining subsystem scores into the overall score
///
/// Weights are renormalised over the subsystems that produced a score, so a
/// missing GPU does not drag the overall score towards zero.
pub const SUBSYSTEM_WEIGHTS: [(Subsystem, f64); 4] = [
    (Subsystem::Cpu, 0.35),
    (Subsystem::Gpu, 0.25),
    (Subsystem::Memory, 0.25),
    (Subsystem::Io, 0.15),
];

/// Weight of one subsystem in the overall score
pub fn subsystem_weight(subsystem: Subsystem) -> f64 {
    SUBSYSTEM_WEIGHTS
        .iter()
        .find(|(s, _)| *s == subsystem)
        .map(|(_, w)| *w)
        .unwrap_or(0.0)
}

/// Outcome of one micro-benchmark
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    /// Benchmark name, unique within its subsystem
    pub name: String,
    /// Subsystem benchmarked
    pub subsystem: Subsystem,
    /// Wall time spent measuring
    pub duration: Duration,
    /// Unit-less score, higher is better, 0 when unsuccessful
    pub score: f64,
    /// Work units per second
    pub throughput: f64,
    /// Unit of `throughput`
    pub unit: String,
    /// Measured iterations completed
    pub iterations: u32,
    /// Coefficient of variation across iterations
    pub variation: f64,
    /// Whether the benchmark completed within its budget
    pub success: bool,
    /// Failure description when `success` is false
    pub error: Option<String>,
}

impl BenchmarkResult {
    /// Unsuccessful result carrying an error
    pub fn failed(
        name: impl Into<String>,
        subsystem: Subsystem,
        duration: Duration,
        error: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            subsystem,
            duration,
            score: 0.0,
            throughput: 0.0,
            unit: String::new(),
            iterations: 0,
            variation: 0.0,
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Results for one subsystem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubsystemBenchmarkResults {
    /// Subsystem benchmarked
    pub subsystem: Subsystem,
    /// Individual benchmark results
    pub results: Vec<BenchmarkResult>,
    /// Mean score of successful benchmarks; `None` means unavailable
    pub score: Option<f64>,
    /// Tier assigned by the classifier
    pub tier: Option<PerformanceTier>,
}

impl SubsystemBenchmarkResults {
    /// Results with no benchmarks run
    pub fn unavailable(subsystem: Subsystem) -> Self {
        Self {
            subsystem,
            results: Vec::new(),
            score: None,
            tier: None,
        }
    }

    /// Build from individual results, computing the subsystem score
    pub fn from_results(subsystem: Subsystem, results: Vec<BenchmarkResult>) -> Self {
        let scores: Vec<f64> = results.iter().filter(|r| r.success).map(|r| r.score).collect();
        let score = (!scores.is_empty()).then(|| scores.iter().sum::<f64>() / scores.len() as f64);
        Self {
            subsystem,
            results,
            score,
            tier: None,
        }
    }

    /// Whether a score is available
    pub fn is_available(&self) -> bool {
        self.score.is_some()
    }

    /// Benchmarks that were attempted
    pub fn attempted(&self) -> usize {
        self.results.len()
    }

    /// Benchmarks that succeeded
    pub fn successful(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    /// Look up a benchmark by name
    pub fn result(&self, name: &str) -> Option<&BenchmarkResult> {
        self.results.iter().find(|r| r.name == name)
    }
}

/// Results for a whole system benchmark run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemBenchmarkResults {
    /// CPU results
    pub cpu: SubsystemBenchmarkResults,
    /// GPU results
    pub gpu: SubsystemBenchmarkResults,
    /// Memory results
    pub memory: SubsystemBenchmarkResults,
    /// I/O results
    pub io: SubsystemBenchmarkResults,
    /// Weighted overall score; `None` when no subsystem produced a score
    pub overall_score: Option<f64>,
    /// Overall tier assigned by the classifier
    pub overall_tier: Option<PerformanceTier>,
    /// When the run started
    pub timestamp: DateTime<Utc>,
    /// Wall time of the whole run
    pub total_duration: Duration,
    /// Unstable measurements, failures, skipped subsystems
    pub warnings: Vec<String>,
    /// False when the run stopped early at a deadline
    pub completed: bool,
}

impl Default for SystemBenchmarkResults {
    fn default() -> Self {
        Self::empty(Utc::now())
    }
}

impl SystemBenchmarkResults {
    /// Results with every subsystem unavailable
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            cpu: SubsystemBenchmarkResults::unavailable(Subsystem::Cpu),
            gpu: SubsystemBenchmarkResults::unavailable(Subsystem::Gpu),
            memory: SubsystemBenchmarkResults::unavailable(Subsystem::Memory),
            io: SubsystemBenchmarkResults::unavailable(Subsystem::Io),
            overall_score: None,
            overall_tier: None,
            timestamp,
            total_duration: Duration::ZERO,
            warnings: Vec::new(),
            completed: true,
        }
    }

    /// Results for one subsystem
    pub fn subsystem(&self, subsystem: Subsystem) -> &SubsystemBenchmarkResults {
        match subsystem {
            Subsystem::Cpu => &self.cpu,
            Subsystem::Gpu => &self.gpu,
            Subsystem::Memory => &self.memory,
            Subsystem::Io => &self.io,
        }
    }

    /// Mutable results for one subsystem
    pub fn subsystem_mut(&mut self, subsystem: Subsystem) -> &mut SubsystemBenchmarkResults {
        match subsystem {
            Subsystem::Cpu => &mut self.cpu,
            Subsystem::Gpu => &mut self.gpu,
            Subsystem::Memory => &mut self.memory,
            Subsystem::Io => &mut self.io,
        }
    }

    /// All four subsystems in fixed order
    pub fn subsystems(&self) -> [&SubsystemBenchmarkResults; 4] {
        [&self.cpu, &self.gpu, &self.memory, &self.io]
    }

    /// Recompute `overall_score` from the subsystem scores
    pub fn update_overall_score(&mut self) {
        self.overall_score = weighted_overall_score(self.subsystems().map(|s| (s.subsystem, s.score)));
    }

    /// Fraction of attempted benchmarks that succeeded (0 when none ran)
    pub fn benchmark_confidence(&self) -> f64 {
        let attempted: usize = self.subsystems().iter().map(|s| s.attempted()).sum();
        if attempted == 0 {
            return 0.0;
        }
        let successful: usize = self.subsystems().iter().map(|s| s.successful()).sum();
        successful as f64 / attempted as f64
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Weighted combination of subsystem scores
pub fn weighted_overall_score(
    scores: impl IntoIterator<Item = (Subsystem, Option<f64>)>,
) -> Option<f64> {
    let mut weighted = 0.0;
    let mut total_weight = 0.0;
    for (subsystem, score) in scores {
        if let Some(score) = score {
            let weight = subsystem_weight(subsystem);
            weighted += weight * score;
            total_weight += weight;
        }
    }
    (total_weight > 0.0).then(|| weighted / total_weight)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(name: &str, score: f64) -> BenchmarkResult {
        BenchmarkResult {
            name: name.into(),
            subsystem: Subsystem::Cpu,
            duration: Duration::from_millis(12),
            score,
            throughput: score * 1000.0,
            unit: "ops".into(),
            iterations: 5,
            variation: 0.02,
            success: true,
            error: None,
        }
    }

    #[test]
    fn test_weights_sum_to_one() {
        let total: f64 = SUBSYSTEM_WEIGHTS.iter().map(|(_, w)| w).sum();
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_subsystem_score_ignores_failures() {
        let results = vec![
            ok("a", 400.0),
            ok("b", 600.0),
            BenchmarkResult::failed("c", Subsystem::Cpu, Duration::ZERO, "timeout"),
        ];
        let subsystem = SubsystemBenchmarkResults::from_results(Subsystem::Cpu, results);
        assert_eq!(subsystem.score, Some(500.0));
        assert_eq!(subsystem.attempted(), 3);
        assert_eq!(subsystem.successful(), 2);
    }

    #[test]
    fn test_all_failed_is_unavailable() {
        let subsystem = SubsystemBenchmarkResults::from_results(
            Subsystem::Io,
            vec![BenchmarkResult::failed("w", Subsystem::Io, Duration::ZERO, "disk full")],
        );
        assert!(!subsystem.is_available());
    }

    #[test]
    fn test_overall_score_renormalises() {
        let score = weighted_overall_score([
            (Subsystem::Cpu, Some(800.0)),
            (Subsystem::Gpu, None),
            (Subsystem::Memory, Some(400.0)),
            (Subsystem::Io, None),
        ])
        .unwrap();
        let expected = (0.35 * 800.0 + 0.25 * 400.0) / 0.60;
        assert!((score - expected).abs() < 1e-9);

        assert_eq!(weighted_overall_score([(Subsystem::Gpu, None)]), None);
    }

    #[test]
    fn test_overall_score_is_not_plain_average() {
        let score = weighted_overall_score([
            (Subsystem::Cpu, Some(1000.0)),
            (Subsystem::Io, Some(0.0)),
        ])
        .unwrap();
        assert!((score - 700.0).abs() < 1e-9);
    }

    #[test]
    fn test_json_round_trip() {
        let mut results = SystemBenchmarkResults::default();
        results.cpu = SubsystemBenchmarkResults::from_results(
            Subsystem::Cpu,
            vec![ok("integer_arithmetic", 812.345_678_9), ok("float_arithmetic", 0.1 + 0.2)],
        );
        results.cpu.tier = Some(PerformanceTier::High);
        results.update_overall_score();
        results.overall_tier = Some(PerformanceTier::High);
        results.warnings.push("memory: unstable".into());
        results.total_duration = Duration::new(1, 234_567_891);

        let restored = SystemBenchmarkResults::from_json(&results.to_json().unwrap()).unwrap();
        assert_eq!(restored, results);
    }

    #[test]
    fn test_benchmark_confidence() {
        let mut results = SystemBenchmarkResults::default();
        assert_eq!(results.benchmark_confidence(), 0.0);
        results.cpu = SubsystemBenchmarkResults::from_results(
            Subsystem::Cpu,
            vec![
                ok("a", 1.0),
                BenchmarkResult::failed("b", Subsystem::Cpu, Duration::ZERO, "x"),
            ],
        );
        assert_eq!(results.benchmark_confidence(), 0.5);
    }
}
