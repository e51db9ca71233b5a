//! Bounded benchmark execution
//!
//! Every workload runs under its own `max_duration` budget, checked after
//! each iteration, so a slow workload aborts with `success = false` instead
//! of stalling detection. Cancellation and the caller's deadline are checked
//! at the same points.

use super::{
    builtin_workloads, BenchmarkResult, SubsystemBenchmarkResults, SystemBenchmarkResults,
    Workload, WorkloadContext,
};
use crate::config::BenchmarkConfig;
use crate::core::Subsystem;
use crate::error::{CapabilityError, Result};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Why a workload stopped before measuring every iteration
enum Interrupt {
    Cancelled,
    Deadline,
    Budget(Duration),
}

/// Runs registered workloads per subsystem
pub struct BenchmarkRunner {
    suites: RwLock<BTreeMap<Subsystem, Vec<Arc<dyn Workload>>>>,
    cancelled: AtomicBool,
    total: AtomicUsize,
    completed: AtomicUsize,
}

impl BenchmarkRunner {
    /// Runner with the built-in workloads registered
    pub fn new() -> Self {
        let runner = Self::empty();
        for subsystem in Subsystem::ALL {
            for workload in builtin_workloads(subsystem) {
                runner.register(workload);
            }
        }
        runner
    }

    /// Runner with no workloads
    pub fn empty() -> Self {
        Self {
            suites: RwLock::new(BTreeMap::new()),
            cancelled: AtomicBool::new(false),
            total: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        }
    }

    /// Register a workload, replacing one with the same name and subsystem
    pub fn register(&self, workload: Arc<dyn Workload>) {
        let mut suites = self.suites.write();
        let suite = suites.entry(workload.subsystem()).or_default();
        suite.retain(|existing| existing.name() != workload.name());
        suite.push(workload);
    }

    /// Names of the workloads registered for a subsystem
    pub fn workload_names(&self, subsystem: Subsystem) -> Vec<String> {
        self.suite(subsystem).iter().map(|w| w.name().to_string()).collect()
    }

    fn suite(&self, subsystem: Subsystem) -> Vec<Arc<dyn Workload>> {
        self.suites.read().get(&subsystem).cloned().unwrap_or_default()
    }

    /// Request that the current run stop at the next iteration boundary
    ///
    /// A request made while no run is in progress stops the next run. The
    /// run that observes it consumes it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fraction of the current run's workloads finished, in `[0, 1]`
    pub fn progress(&self) -> f64 {
        let total = self.total.load(Ordering::SeqCst);
        if total == 0 {
            return 0.0;
        }
        (self.completed.load(Ordering::SeqCst) as f64 / total as f64).min(1.0)
    }

    /// Drop a pending cancellation request
    pub fn clear_cancel(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    fn take_cancel(&self) -> bool {
        self.cancelled.swap(false, Ordering::SeqCst)
    }

    fn begin(&self, total: usize) {
        self.total.store(total, Ordering::SeqCst);
        self.completed.store(0, Ordering::SeqCst);
    }

    /// Benchmark the CPU
    pub fn benchmark_cpu(&self, config: &BenchmarkConfig) -> Result<SubsystemBenchmarkResults> {
        self.benchmark_subsystem(Subsystem::Cpu, config)
    }

    /// Benchmark the GPU
    pub fn benchmark_gpu(&self, config: &BenchmarkConfig) -> Result<SubsystemBenchmarkResults> {
        self.benchmark_subsystem(Subsystem::Gpu, config)
    }

    /// Benchmark memory
    pub fn benchmark_memory(&self, config: &BenchmarkConfig) -> Result<SubsystemBenchmarkResults> {
        self.benchmark_subsystem(Subsystem::Memory, config)
    }

    /// Benchmark I/O
    pub fn benchmark_io(&self, config: &BenchmarkConfig) -> Result<SubsystemBenchmarkResults> {
        self.benchmark_subsystem(Subsystem::Io, config)
    }

    /// Benchmark one subsystem as a standalone run
    pub fn benchmark_subsystem(
        &self,
        subsystem: Subsystem,
        config: &BenchmarkConfig,
    ) -> Result<SubsystemBenchmarkResults> {
        config.validate()?;
        if !config.is_enabled(subsystem) {
            return Ok(SubsystemBenchmarkResults::unavailable(subsystem));
        }
        let suite = self.suite(subsystem);
        self.begin(suite.len());
        let results = self.run_suite(&suite, config, None);
        if self.take_cancel() {
            return Err(CapabilityError::Cancelled);
        }
        Ok(SubsystemBenchmarkResults::from_results(subsystem, results))
    }

    /// Benchmark every enabled subsystem sequentially
    pub fn benchmark_system(&self, config: &BenchmarkConfig) -> Result<SystemBenchmarkResults> {
        self.benchmark_system_until(config, None, 1)
    }

    /// Benchmark every enabled subsystem, stopping at `deadline`
    ///
    /// With `concurrency > 1` subsystems run in parallel on a dedicated pool.
    /// Workloads not started before the deadline are recorded as failed and
    /// `completed` is false. Returns `Cancelled` if `cancel` was called.
    pub fn benchmark_system_until(
        &self,
        config: &BenchmarkConfig,
        deadline: Option<Instant>,
        concurrency: usize,
    ) -> Result<SystemBenchmarkResults> {
        config.validate()?;

        let started = Instant::now();
        let mut system = SystemBenchmarkResults::empty(Utc::now());

        let enabled: Vec<(Subsystem, Vec<Arc<dyn Workload>>)> = Subsystem::ALL
            .into_iter()
            .filter(|s| config.is_enabled(*s))
            .map(|s| (s, self.suite(s)))
            .collect();
        self.begin(enabled.iter().map(|(_, suite)| suite.len()).sum());

        tracing::debug!(
            "Benchmarking {} subsystem(s), concurrency {}",
            enabled.len(),
            concurrency.max(1)
        );

        let outcomes: Vec<(Subsystem, Vec<BenchmarkResult>)> = if concurrency > 1 && enabled.len() > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(concurrency.min(enabled.len()))
                .thread_name(|i| format!("captier-bench-{}", i))
                .build()
                .map_err(|e| CapabilityError::ThreadError(e.to_string()))?;
            let collected = Mutex::new(Vec::with_capacity(enabled.len()));
            pool.scope(|scope| {
                for (subsystem, suite) in &enabled {
                    let collected = &collected;
                    scope.spawn(move |_| {
                        let results = self.run_suite(suite, config, deadline);
                        collected.lock().push((*subsystem, results));
                    });
                }
            });
            let mut outcomes = collected.into_inner();
            outcomes.sort_by_key(|(s, _)| *s);
            outcomes
        } else {
            enabled
                .iter()
                .map(|(subsystem, suite)| (*subsystem, self.run_suite(suite, config, deadline)))
                .collect()
        };

        if self.take_cancel() {
            tracing::info!("Benchmark run cancelled");
            return Err(CapabilityError::Cancelled);
        }

        for (subsystem, results) in outcomes {
            for result in results.iter().filter(|r| !r.success) {
                let error = result.error.as_deref().unwrap_or("failed");
                if error.starts_with(DEADLINE_SKIP) {
                    system.completed = false;
                } else {
                    system
                        .warnings
                        .push(format!("{} benchmark '{}': {}", subsystem, result.name, error));
                }
            }
            for result in results.iter().filter(|r| r.success) {
                if result.variation > config.accuracy_threshold {
                    system.warnings.push(format!(
                        "{} benchmark '{}' is unstable (variation {:.1}% > {:.1}%)",
                        subsystem,
                        result.name,
                        result.variation * 100.0,
                        config.accuracy_threshold * 100.0
                    ));
                }
            }
            let subsystem_results = SubsystemBenchmarkResults::from_results(subsystem, results);
            if subsystem_results.attempted() > 0 && !subsystem_results.is_available() {
                system
                    .warnings
                    .push(format!("{} benchmark score unavailable", subsystem));
            }
            *system.subsystem_mut(subsystem) = subsystem_results;
        }

        if !system.completed {
            system.warnings.push(
                "detection deadline reached; remaining benchmarks skipped".to_string(),
            );
        }

        system.update_overall_score();
        system.total_duration = started.elapsed();

        tracing::info!(
            "Benchmarks finished in {:?}, overall score {}",
            system.total_duration,
            system
                .overall_score
                .map(|s| format!("{:.1}", s))
                .unwrap_or_else(|| "unavailable".to_string())
        );

        Ok(system)
    }

    fn run_suite(
        &self,
        suite: &[Arc<dyn Workload>],
        config: &BenchmarkConfig,
        deadline: Option<Instant>,
    ) -> Vec<BenchmarkResult> {
        let ctx = WorkloadContext {
            quick: config.quick_benchmark,
            working_dir: config.working_dir(),
        };

        let mut results = Vec::with_capacity(suite.len());
        for workload in suite {
            if self.is_cancelled() {
                break;
            }
            let result = if deadline.map(|d| Instant::now() >= d).unwrap_or(false) {
                BenchmarkResult::failed(
                    workload.name(),
                    workload.subsystem(),
                    Duration::ZERO,
                    format!("{} before start", DEADLINE_SKIP),
                )
            } else {
                self.run_workload(workload.as_ref(), config, &ctx, deadline)
            };
            self.completed.fetch_add(1, Ordering::SeqCst);
            results.push(result);
        }
        results
    }

    /// Run one workload within its budget
    pub fn run_workload(
        &self,
        workload: &dyn Workload,
        config: &BenchmarkConfig,
        ctx: &WorkloadContext,
        deadline: Option<Instant>,
    ) -> BenchmarkResult {
        let name = workload.name().to_string();
        let subsystem = workload.subsystem();
        let budget = config.max_duration;
        let started = Instant::now();

        if let Err(e) = workload.prepare(ctx) {
            workload.cleanup(ctx);
            return BenchmarkResult::failed(name, subsystem, started.elapsed(), e.to_string());
        }

        let interrupted = |now: Instant| -> Option<Interrupt> {
            if self.is_cancelled() {
                Some(Interrupt::Cancelled)
            } else if now.duration_since(started) > budget {
                Some(Interrupt::Budget(budget))
            } else if deadline.map(|d| now >= d).unwrap_or(false) {
                Some(Interrupt::Deadline)
            } else {
                None
            }
        };

        let iterations = if config.quick_benchmark {
            config.measurement_iterations.min(3)
        } else {
            config.measurement_iterations
        };

        let mut outcome: std::result::Result<(), String> = Ok(());
        let mut samples: Vec<(u64, Duration)> = Vec::with_capacity(iterations as usize);

        'run: {
            for _ in 0..config.warmup_iterations {
                if let Err(e) = workload.run_iteration(ctx) {
                    outcome = Err(e.to_string());
                    break 'run;
                }
                if let Some(reason) = interrupted(Instant::now()) {
                    outcome = Err(describe(&name, reason));
                    break 'run;
                }
            }

            for _ in 0..iterations {
                let iteration_start = Instant::now();
                match workload.run_iteration(ctx) {
                    Ok(units) => samples.push((units, iteration_start.elapsed())),
                    Err(e) => {
                        outcome = Err(e.to_string());
                        break 'run;
                    }
                }
                if let Some(reason) = interrupted(Instant::now()) {
                    outcome = Err(describe(&name, reason));
                    break 'run;
                }
            }
        }

        workload.cleanup(ctx);
        let elapsed = started.elapsed();

        if let Err(error) = outcome {
            tracing::debug!("Benchmark {}/{} failed: {}", subsystem, name, error);
            let mut result = BenchmarkResult::failed(name, subsystem, elapsed, error);
            result.iterations = samples.len() as u32;
            return result;
        }

        let units: u64 = samples.iter().map(|(u, _)| *u).sum();
        let measured: f64 = samples.iter().map(|(_, d)| d.as_secs_f64()).sum();
        let throughput = if measured > 0.0 { units as f64 / measured } else { 0.0 };
        let reference = workload.reference_throughput();
        let score = if reference > 0.0 { 1000.0 * throughput / reference } else { 0.0 };

        BenchmarkResult {
            name,
            subsystem,
            duration: elapsed,
            score,
            throughput,
            unit: workload.unit().to_string(),
            iterations: samples.len() as u32,
            variation: coefficient_of_variation(&samples),
            success: true,
            error: None,
        }
    }
}

impl Default for BenchmarkRunner {
    fn default() -> Self {
        Self::new()
    }
}

const DEADLINE_SKIP: &str = "skipped: detection deadline reached";

fn describe(name: &str, reason: Interrupt) -> String {
    match reason {
        Interrupt::Cancelled => CapabilityError::Cancelled.to_string(),
        Interrupt::Deadline => format!("{} while running", DEADLINE_SKIP),
        Interrupt::Budget(limit) => CapabilityError::BenchmarkTimeout {
            name: name.to_string(),
            limit,
        }
        .to_string(),
    }
}

/// Standard deviation over mean of per-iteration throughput
fn coefficient_of_variation(samples: &[(u64, Duration)]) -> f64 {
    let rates: Vec<f64> = samples
        .iter()
        .filter(|(_, d)| !d.is_zero())
        .map(|(units, d)| *units as f64 / d.as_secs_f64())
        .collect();
    if rates.len() < 2 {
        return 0.0;
    }
    let mean = rates.iter().sum::<f64>() / rates.len() as f64;
    if mean <= 0.0 {
        return 0.0;
    }
    let variance = rates.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (rates.len() - 1) as f64;
    variance.sqrt() / mean
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    /// Workload that sleeps a fixed time per iteration
    struct Sleeper {
        name: &'static str,
        subsystem: Subsystem,
        per_iteration: Duration,
        runs: AtomicU32,
    }

    impl Sleeper {
        fn new(name: &'static str, subsystem: Subsystem, per_iteration: Duration) -> Arc<Self> {
            Arc::new(Self {
                name,
                subsystem,
                per_iteration,
                runs: AtomicU32::new(0),
            })
        }
    }

    impl Workload for Sleeper {
        fn name(&self) -> &str {
            self.name
        }
        fn subsystem(&self) -> Subsystem {
            self.subsystem
        }
        fn reference_throughput(&self) -> f64 {
            100.0
        }
        fn run_iteration(&self, _ctx: &WorkloadContext) -> Result<u64> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.per_iteration);
            Ok(1)
        }
    }

    /// Workload that always errors
    struct Broken;

    impl Workload for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        fn subsystem(&self) -> Subsystem {
            Subsystem::Io
        }
        fn reference_throughput(&self) -> f64 {
            1.0
        }
        fn run_iteration(&self, _ctx: &WorkloadContext) -> Result<u64> {
            Err(CapabilityError::probe_unavailable(Subsystem::Io, "device gone"))
        }
    }

    fn config() -> BenchmarkConfig {
        BenchmarkConfig {
            max_duration: Duration::from_secs(5),
            warmup_iterations: 0,
            measurement_iterations: 3,
            ..BenchmarkConfig::default()
        }
    }

    #[test]
    fn test_score_from_throughput() {
        let runner = BenchmarkRunner::empty();
        runner.register(Sleeper::new("tick", Subsystem::Cpu, Duration::from_millis(5)));
        let results = runner.benchmark_cpu(&config()).unwrap();
        let result = results.result("tick").unwrap();
        assert!(result.success);
        assert_eq!(result.iterations, 3);
        // ~200 iterations/s against a reference of 100/s
        assert!(result.score > 100.0 && result.score < 2100.0, "score {}", result.score);
        assert_eq!(results.score, Some(result.score));
    }

    #[test]
    fn test_budget_exceeded_reports_failure() {
        let runner = BenchmarkRunner::empty();
        let slow = Sleeper::new("slow", Subsystem::Cpu, Duration::from_millis(30));
        runner.register(slow.clone());

        let config = BenchmarkConfig {
            max_duration: Duration::from_millis(40),
            measurement_iterations: 50,
            ..config()
        };
        let started = Instant::now();
        let results = runner.benchmark_cpu(&config).unwrap();
        assert!(started.elapsed() < Duration::from_millis(500));

        let result = results.result("slow").unwrap();
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("exceeded"));
        assert!(slow.runs.load(Ordering::SeqCst) < 50);
        assert!(!results.is_available());
    }

    #[test]
    fn test_workload_error_is_contained() {
        let runner = BenchmarkRunner::empty();
        runner.register(Arc::new(Broken));
        runner.register(Sleeper::new("ok", Subsystem::Io, Duration::from_millis(1)));

        let system = runner.benchmark_system(&config()).unwrap();
        assert_eq!(system.io.attempted(), 2);
        assert_eq!(system.io.successful(), 1);
        assert!(system.io.is_available());
        assert!(system.warnings.iter().any(|w| w.contains("broken")));
    }

    #[test]
    fn test_disabled_and_empty_subsystems_are_unavailable() {
        let runner = BenchmarkRunner::empty();
        runner.register(Sleeper::new("cpu", Subsystem::Cpu, Duration::from_millis(1)));
        let mut config = config();
        config.enable_memory_benchmarks = false;

        let system = runner.benchmark_system(&config).unwrap();
        assert!(system.cpu.is_available());
        assert!(!system.gpu.is_available());
        assert!(system.memory.results.is_empty());
        assert_eq!(system.overall_score, system.cpu.score);
        assert!(system.completed);
    }

    #[test]
    fn test_deadline_skips_remaining() {
        let runner = BenchmarkRunner::empty();
        runner.register(Sleeper::new("a", Subsystem::Cpu, Duration::from_millis(20)));
        runner.register(Sleeper::new("b", Subsystem::Memory, Duration::from_millis(20)));

        let deadline = Instant::now() + Duration::from_millis(30);
        let system = runner.benchmark_system_until(&config(), Some(deadline), 1).unwrap();
        assert!(!system.completed);
        assert!(!system.memory.is_available());
        assert!(system.warnings.iter().any(|w| w.contains("deadline")));
        assert_eq!(runner.progress(), 1.0);
    }

    #[test]
    fn test_cancel_stops_run() {
        let runner = Arc::new(BenchmarkRunner::empty());
        let slow = Sleeper::new("slow", Subsystem::Cpu, Duration::from_millis(20));
        runner.register(slow.clone());
        let config = BenchmarkConfig {
            measurement_iterations: 1000,
            ..config()
        };

        let worker = {
            let runner = Arc::clone(&runner);
            std::thread::spawn(move || runner.benchmark_system(&config))
        };
        std::thread::sleep(Duration::from_millis(60));
        runner.cancel();

        let outcome = worker.join().unwrap();
        assert!(matches!(outcome, Err(CapabilityError::Cancelled)));
        assert!(slow.runs.load(Ordering::SeqCst) < 100);
    }

    #[test]
    fn test_cancel_before_start_stops_next_run_only() {
        let runner = BenchmarkRunner::empty();
        let tick = Sleeper::new("tick", Subsystem::Cpu, Duration::from_millis(1));
        runner.register(tick.clone());

        runner.cancel();
        assert!(matches!(runner.benchmark_system(&config()), Err(CapabilityError::Cancelled)));
        assert_eq!(tick.runs.load(Ordering::SeqCst), 0);
        assert!(!runner.is_cancelled());
        assert!(runner.benchmark_system(&config()).is_ok());

        runner.cancel();
        runner.clear_cancel();
        assert!(runner.benchmark_cpu(&config()).is_ok());
    }

    #[test]
    fn test_concurrent_matches_sequential_shape() {
        let runner = BenchmarkRunner::empty();
        for subsystem in [Subsystem::Cpu, Subsystem::Memory, Subsystem::Io] {
            runner.register(Sleeper::new("s", subsystem, Duration::from_millis(2)));
        }
        let system = runner.benchmark_system_until(&config(), None, 3).unwrap();
        assert!(system.cpu.is_available());
        assert!(system.memory.is_available());
        assert!(system.io.is_available());
        assert!(system.overall_score.is_some());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let runner = BenchmarkRunner::new();
        let config = BenchmarkConfig {
            measurement_iterations: 0,
            ..BenchmarkConfig::default()
        };
        assert!(runner.benchmark_system(&config).unwrap_err().is_config_error());
    }

    #[test]
    fn test_builtin_quick_run() {
        let dir = tempfile::tempdir().unwrap();
        let runner = BenchmarkRunner::new();
        let config = BenchmarkConfig {
            working_dir: Some(dir.path().to_path_buf()),
            max_duration: Duration::from_secs(10),
            ..BenchmarkConfig::quick()
        };
        let system = runner.benchmark_system(&config).unwrap();
        assert!(system.cpu.is_available());
        assert!(system.memory.is_available());
        assert!(!system.gpu.is_available());
        assert!(system.overall_score.unwrap() > 0.0);
    }

    #[test]
    fn test_variation() {
        let steady = [(10, Duration::from_millis(10)); 4];
        assert!(coefficient_of_variation(&steady) < 1e-9);
        let noisy = [
            (10, Duration::from_millis(10)),
            (10, Duration::from_millis(40)),
        ];
        assert!(coefficient_of_variation(&noisy) > 0.5);
    }
}
