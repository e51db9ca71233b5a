//! captier CLI - capability detection and performance tiering
//!
//! Probes the host, classifies its tier, and manages the capability cache.

use captier::benchmark::{BenchmarkRunner, SubsystemBenchmarkResults};
use captier::cache::InvalidationReason;
use captier::config::{
    parse_key_values, CacheAction, CacheConfig, CacheStorage, CapabilityDetectionConfig, CliArgs,
    Commands, OutputFormat,
};
use captier::core::{Capability, Subsystem};
use captier::detect::{predict_hardware, CapabilityDetectionResults, DetectionOrchestrator};
use captier::error::{CapabilityError, Result};
use captier::progress::ProgressReporter;
use captier::system::{HardwareProbe, SystemProbe};
use clap::Parser;
use serde::Serialize;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() {
    // Parse CLI arguments
    let args = CliArgs::parse();

    init_logging(&args);

    // Handle result
    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(args: &CliArgs) {
    let default_level = match (args.quiet, args.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if args.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn run(args: CliArgs) -> Result<()> {
    let config = build_config(&args)?;
    let command = args.command.clone().unwrap_or(Commands::Detect {
        force: false,
        quick: false,
    });

    match command {
        Commands::Detect { force, quick } => cmd_detect(&args, config, force, quick),
        Commands::Bench {
            subsystem,
            quick,
            concurrency,
        } => cmd_bench(&args, config, subsystem.as_deref(), quick, concurrency),
        Commands::Predict { specs } => cmd_predict(&args, &specs),
        Commands::Recommend { use_case } => cmd_recommend(&args, config, &use_case),
        Commands::Tier { scope } => cmd_tier(config, &scope),
        Commands::Thresholds => cmd_thresholds(&args, config),
        Commands::ShowConfig => print_output(&args, &config, |config| print_config(config)),
        Commands::Cache { action } => cmd_cache(&args, config, action),
    }
}

/// Configuration file or profile, with command-line overrides applied
fn build_config(args: &CliArgs) -> Result<CapabilityDetectionConfig> {
    let mut config = match &args.config {
        Some(path) => CapabilityDetectionConfig::load(path)?,
        None => CapabilityDetectionConfig::for_profile(args.profile),
    };

    if let Some(path) = &args.cache_path {
        config.cache_config = CacheConfig {
            storage_path: path.clone(),
            ..CacheConfig::for_storage(CacheStorage::Hybrid)
        };
    }
    if let Some(bytes) = args.cache_memory {
        config.cache_config.max_memory_usage = usize::try_from(bytes)
            .map_err(|_| CapabilityError::config("cache memory limit does not fit in memory"))?;
    }
    if let Some(max_time) = args.max_time {
        config.max_detection_time = max_time;
    }

    for warning in config.validate()? {
        tracing::warn!("Configuration: {}", warning);
    }
    Ok(config)
}

fn orchestrator(config: CapabilityDetectionConfig) -> Result<Arc<DetectionOrchestrator>> {
    let probe: Arc<dyn HardwareProbe> = Arc::new(SystemProbe::new());
    let orchestrator = Arc::new(DetectionOrchestrator::new(probe));
    orchestrator.initialize(config)?;
    Ok(orchestrator)
}

fn print_output<T: Serialize>(args: &CliArgs, value: &T, text: impl FnOnce(&T)) -> Result<()> {
    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Text => text(value),
    }
    Ok(())
}

fn cmd_detect(args: &CliArgs, mut config: CapabilityDetectionConfig, force: bool, quick: bool) -> Result<()> {
    if quick {
        config.use_quick_detection_mode = true;
    }
    let orchestrator = orchestrator(config)?;

    let show_progress = !args.quiet && args.format == OutputFormat::Text;
    let reporter = Arc::new(if show_progress {
        ProgressReporter::new()
    } else {
        ProgressReporter::disabled()
    });
    let watcher = reporter.watch(Arc::clone(&orchestrator))?;

    let outcome = orchestrator.detect_capabilities(force);
    watcher.stop();
    match &outcome {
        Ok(results) => reporter.finish_success(&format!(
            "Detection finished ({}) in {:.2?}",
            results.detection_source, results.detection_duration
        )),
        Err(e) => reporter.finish_error(&e.to_string()),
    }
    let results = outcome?;

    print_output(args, &results, print_results)?;
    orchestrator.shutdown();
    Ok(())
}

fn print_results(results: &CapabilityDetectionResults) {
    let platform = &results.platform_info;

    println!("\n=== Capability Detection ===");
    println!("Source:      {}", results.detection_source);
    println!("Detected at: {}", results.detection_timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("Duration:    {:.2?}", results.detection_duration);
    println!("Successful:  {}", results.detection_successful);

    println!("\n=== Platform ===");
    println!("Name:         {}", platform.name);
    println!("Architecture: {}", platform.architecture);
    println!("CPU cores:    {}", platform.cpu_cores);
    println!(
        "Memory:       {}",
        humansize::format_size(platform.total_memory, humansize::BINARY)
    );
    println!("FPU / SIMD:   {} / {}", platform.has_fpu, platform.has_simd);

    println!("\n=== Performance ===");
    println!("Tier:       {}", results.performance_tier);
    println!(
        "Confidence: {:.0}% (hardware {:.0}%, benchmarks {:.0}%)",
        results.detection_confidence * 100.0,
        results.hardware_confidence * 100.0,
        results.benchmark_confidence * 100.0
    );
    if let Some(bench) = &results.benchmark_results {
        for subsystem in bench.subsystems() {
            print_subsystem_score(subsystem);
        }
        if let Some(score) = bench.overall_score {
            println!("  {:8} {:>8.1}", "overall", score);
        }
    }

    println!("\n=== Capabilities ({}) ===", results.capability_mask.count());
    for capability in Capability::ALL {
        let mark = if results.supports(capability) { "✓" } else { " " };
        println!("  [{}] {}", mark, capability.name());
    }

    if !results.driver_capabilities.is_empty() {
        println!("\n=== Drivers ===");
        for (driver, mask) in &results.driver_capabilities {
            println!("  {:16} {}", driver, mask.names().join(", "));
        }
    }

    if !results.warnings.is_empty() {
        println!("\n=== Warnings ===");
        for warning in &results.warnings {
            println!("  - {}", warning);
        }
    }
    if !results.errors.is_empty() {
        println!("\n=== Errors ===");
        for error in &results.errors {
            println!("  - {}", error);
        }
    }
}

fn print_subsystem_score(subsystem: &SubsystemBenchmarkResults) {
    match (subsystem.score, subsystem.tier) {
        (Some(score), Some(tier)) => println!("  {:8} {:>8.1}  {}", subsystem.subsystem.name(), score, tier),
        (Some(score), None) => println!("  {:8} {:>8.1}", subsystem.subsystem.name(), score),
        _ => println!("  {:8} {:>8}", subsystem.subsystem.name(), "n/a"),
    }
}

fn cmd_bench(
    args: &CliArgs,
    config: CapabilityDetectionConfig,
    subsystem: Option<&str>,
    quick: bool,
    concurrency: usize,
) -> Result<()> {
    let mut bench_config = if quick {
        captier::config::BenchmarkConfig::quick()
    } else {
        config.benchmark_config.clone()
    };
    if let Some(only) = subsystem.map(Subsystem::parse_scope).transpose()?.flatten() {
        for other in Subsystem::ALL {
            bench_config.set_enabled(other, other == only);
        }
    }

    if args.format == OutputFormat::Text {
        println!("=== captier Benchmarks ===");
        println!("Iterations: {} (+{} warmup)", bench_config.measurement_iterations, bench_config.warmup_iterations);
        println!("Budget:     {} per benchmark\n", humantime::format_duration(bench_config.max_duration));
    }

    let runner = BenchmarkRunner::new();
    let mut results = runner.benchmark_system_until(&bench_config, None, concurrency.max(1))?;
    let classifier = captier::classify::TierClassifier::new(config.tier_discrepancy_epsilon);
    classifier.annotate(&mut results);

    print_output(args, &results, |results| {
        for subsystem in results.subsystems() {
            if subsystem.results.is_empty() {
                continue;
            }
            println!("{}:", subsystem.subsystem.name());
            for bench in &subsystem.results {
                if bench.success {
                    println!(
                        "  {:20} {:>8.1}  {:>12.1} {}/s  ±{:.1}%",
                        bench.name,
                        bench.score,
                        bench.throughput,
                        bench.unit,
                        bench.variation * 100.0
                    );
                } else {
                    println!("  {:20} failed: {}", bench.name, bench.error.as_deref().unwrap_or("unknown"));
                }
            }
        }
        println!();
        for subsystem in results.subsystems() {
            print_subsystem_score(subsystem);
        }
        if let (Some(score), Some(tier)) = (results.overall_score, results.overall_tier) {
            println!("\nOverall: {:.1} ({})", score, tier);
        }
        println!("Total time: {:.2?}", results.total_duration);
        for warning in &results.warnings {
            println!("warning: {}", warning);
        }
    })
}

fn cmd_predict(args: &CliArgs, specs: &[String]) -> Result<()> {
    let specs = parse_key_values(specs).map_err(CapabilityError::InvalidConfig)?;
    let prediction = predict_hardware(&specs)?;

    print_output(args, &prediction, |prediction| {
        println!("=== Predicted Capabilities ===");
        if prediction.generic {
            println!("(generic architecture-family profile)");
        }
        println!("Matched: {}", prediction.matched.join(", "));
        println!("Tier:    {}", prediction.tier);
        for name in prediction.capabilities.names() {
            println!("  - {}", name);
        }
    })
}

fn cmd_recommend(args: &CliArgs, config: CapabilityDetectionConfig, use_case: &str) -> Result<()> {
    let orchestrator = orchestrator(config)?;
    orchestrator.detect_capabilities(false)?;
    let recommendations = orchestrator.get_recommendations(use_case);

    print_output(args, &recommendations, |recommendations| {
        println!("=== Recommended Settings ({}) ===\n", use_case);
        for rec in recommendations {
            println!("{:24} = {}", rec.key, rec.value);
            println!("{:24}   {}", "", rec.rationale);
        }
    })?;
    orchestrator.shutdown();
    Ok(())
}

fn cmd_tier(config: CapabilityDetectionConfig, scope: &str) -> Result<()> {
    let orchestrator = orchestrator(config)?;
    orchestrator.detect_capabilities(false)?;
    let (tier, reasoning) = orchestrator.get_performance_tier_with_reasoning(scope)?;
    println!("{}: {}", scope, tier);
    println!("{}", reasoning);
    orchestrator.shutdown();
    Ok(())
}

fn cmd_thresholds(args: &CliArgs, config: CapabilityDetectionConfig) -> Result<()> {
    let classifier = captier::classify::TierClassifier::new(config.tier_discrepancy_epsilon);
    let thresholds = classifier.all_thresholds();

    print_output(args, &thresholds, |thresholds| {
        println!("{:10} {:>9} {:>9} {:>9} {:>9}", "scope", "minimal", "limited", "standard", "high");
        for (scope, t) in thresholds {
            println!(
                "{:10} {:>9.1} {:>9.1} {:>9.1} {:>9.1}",
                scope, t.minimal, t.limited, t.standard, t.high
            );
        }
        println!("\nDiscrepancy epsilon: {:.2}", classifier.epsilon());
    })
}

fn cmd_cache(args: &CliArgs, config: CapabilityDetectionConfig, action: CacheAction) -> Result<()> {
    if !config.enable_capability_caching {
        return Err(CapabilityError::config("capability caching is disabled"));
    }
    let orchestrator = orchestrator(config)?;
    let cache = orchestrator
        .cache()
        .ok_or_else(|| CapabilityError::config("capability cache unavailable"))?;

    match action {
        CacheAction::Stats => {
            let stats = cache.get_statistics();
            print_output(args, &stats, |stats| {
                println!("=== Cache Statistics ===");
                println!("Entries:     {}", stats.current_entries);
                println!(
                    "Memory:      {}",
                    humansize::format_size(stats.memory_usage_bytes as u64, humansize::BINARY)
                );
                println!("Requests:    {}", stats.total_requests);
                println!("Hit ratio:   {:.1}%", stats.hit_ratio * 100.0);
                println!("Evictions:   {}", stats.evictions);
                println!("Invalidated: {}", stats.invalidations);
            })?;
            if matches!(args.format, OutputFormat::Text) && cache.is_storage_available() {
                println!(
                    "Storage:     {} ({})",
                    cache.get_storage_path().display(),
                    humansize::format_size(cache.get_storage_size(), humansize::BINARY)
                );
            }
        }
        CacheAction::Inspect => {
            let entries = cache.snapshot();
            print_output(args, &entries, |entries| {
                println!("{:40} {:20} {:>10} {}", "key", "kind", "size", "expires");
                for (key, entry) in entries {
                    println!(
                        "{:40} {:20} {:>10} {}",
                        key,
                        entry.payload.kind(),
                        humansize::format_size(entry.metadata.size_bytes as u64, humansize::BINARY),
                        entry.metadata.expires_at.format("%Y-%m-%d %H:%M:%S")
                    );
                }
            })?;
        }
        CacheAction::Clear => {
            let removed = orchestrator.invalidate_cache(InvalidationReason::Manual)?;
            orchestrator.shutdown();
            let deleted = cache.clear_storage()?;
            println!("Removed {} cache entries", removed);
            if deleted {
                println!("Deleted {}", cache.get_storage_path().display());
            }
            return Ok(());
        }
    }

    orchestrator.shutdown();
    Ok(())
}

fn print_config(config: &CapabilityDetectionConfig) {
    println!("=== Configuration ===");
    println!("Hardware detection:  {}", config.enable_hardware_detection);
    println!("Benchmarks:          {}", config.enable_performance_benchmarks);
    println!("Quick mode:          {}", config.use_quick_detection_mode);
    println!("Caching:             {} ({:?})", config.enable_capability_caching, config.cache_config.storage);
    println!("Cache file:          {}", config.cache_config.storage_path.display());
    println!("Driver integration:  {}", config.enable_driver_integration);
    println!("Background updates:  {}", config.enable_background_updates);
    println!("Max detection time:  {}", humantime::format_duration(config.max_detection_time));
    println!("Acceptable errors:   {:.0}%", config.acceptable_error_rate * 100.0);
    println!("Tier epsilon:        {:.2}", config.tier_discrepancy_epsilon);
    println!("History limit:       {}", config.history_limit);
}
