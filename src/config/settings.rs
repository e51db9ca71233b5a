//! Command-line settings for the captier binary
//!
//! Defines the CLI arguments and the small parsers they share with the
//! configuration file format.

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// captier - capability detection and adaptive performance tiering
#[derive(Parser, Debug, Clone)]
#[command(name = "captier")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Detect hardware capabilities and classify performance tiers")]
#[command(long_about = r#"
captier probes the host's CPU, GPU, memory and I/O, runs bounded
micro-benchmarks, and classifies the platform into one of four performance
tiers (Minimal, Limited, Standard, High). Results are cached per hardware
fingerprint so later runs answer without re-benchmarking.

Examples:
  captier detect                      # Cached detection, full run on miss
  captier detect --force --quick      # Fresh feature-only detection
  captier bench --subsystem memory    # Run the memory benchmarks
  captier predict cpu_vendor=Intel cpu_model=i7-12700K gpu_vendor=NVIDIA
  captier recommend gaming            # Settings for a use case
  captier cache stats                 # Cache statistics
"#)]
pub struct CliArgs {
    /// Configuration file (JSON)
    #[arg(short = 'c', long, value_name = "PATH", env = "CAPTIER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Configuration profile
    #[arg(long, value_enum, default_value = "default")]
    pub profile: Profile,

    /// Cache file location (enables hybrid storage)
    #[arg(long, value_name = "PATH", env = "CAPTIER_CACHE")]
    pub cache_path: Option<PathBuf>,

    /// Maximum cache memory (e.g., 512K, 4M)
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub cache_memory: Option<u64>,

    /// Overall detection ceiling (e.g., 5s, 1500ms)
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub max_time: Option<Duration>,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress progress output)
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Emit logs as JSON
    #[arg(long)]
    pub log_json: bool,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Detect capabilities and performance tier
    #[command(name = "detect")]
    Detect {
        /// Ignore cached results
        #[arg(short, long)]
        force: bool,
        /// Skip benchmarks and estimate the tier from features
        #[arg(long)]
        quick: bool,
    },

    /// Run micro-benchmarks
    #[command(name = "bench")]
    Bench {
        /// Only benchmark one subsystem (cpu, gpu, memory, io)
        #[arg(short, long)]
        subsystem: Option<String>,
        /// Fewer iterations
        #[arg(long)]
        quick: bool,
        /// Subsystems benchmarked in parallel
        #[arg(long, default_value = "1")]
        concurrency: usize,
    },

    /// Predict capabilities for hypothetical hardware
    #[command(name = "predict")]
    Predict {
        /// Hardware specs as key=value (cpu_vendor, cpu_model, gpu_vendor, gpu_model, platform, architecture)
        #[arg(value_name = "KEY=VALUE", required = true)]
        specs: Vec<String>,
    },

    /// Show recommended settings for a use case
    #[command(name = "recommend")]
    Recommend {
        /// Use case (gaming, productivity, power_saving, development)
        #[arg(default_value = "gaming")]
        use_case: String,
    },

    /// Explain the tier of one subsystem or overall
    #[command(name = "tier")]
    Tier {
        /// cpu, gpu, memory, io or overall
        #[arg(default_value = "overall")]
        scope: String,
    },

    /// Show classifier thresholds
    #[command(name = "thresholds")]
    Thresholds,

    /// Print the effective configuration
    #[command(name = "config")]
    ShowConfig,

    /// Inspect or clear the capability cache
    #[command(name = "cache")]
    Cache {
        /// Cache action
        #[command(subcommand)]
        action: CacheAction,
    },
}

/// Cache subcommands
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheAction {
    /// Show cache statistics
    Stats,
    /// List cache entries
    Inspect,
    /// Invalidate every entry
    Clear,
}

/// Named configuration profiles
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// Balanced defaults
    #[default]
    Default,
    /// Fast startup, no benchmarks
    Quick,
    /// Every benchmark, long ceilings
    Comprehensive,
    /// Small memory footprint, short TTLs
    Embedded,
}

impl Profile {
    /// Profile name
    pub fn name(&self) -> &'static str {
        match self {
            Profile::Default => "default",
            Profile::Quick => "quick",
            Profile::Comprehensive => "comprehensive",
            Profile::Embedded => "embedded",
        }
    }
}

/// Output format for reports
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON
    Json,
}

/// Parse human-readable size string to bytes
pub fn parse_size(size: &str) -> Result<u64, String> {
    let size = size.trim().to_uppercase();

    if size.is_empty() {
        return Err("Empty size string".to_string());
    }

    let (num_str, multiplier) = if size.ends_with("GB") || size.ends_with('G') {
        (size.trim_end_matches(['G', 'B']), 1024u64 * 1024 * 1024)
    } else if size.ends_with("MB") || size.ends_with('M') {
        (size.trim_end_matches(['M', 'B']), 1024u64 * 1024)
    } else if size.ends_with("KB") || size.ends_with('K') {
        (size.trim_end_matches(['K', 'B']), 1024u64)
    } else if size.ends_with('B') {
        (size.trim_end_matches('B'), 1u64)
    } else {
        // Assume bytes if no suffix
        (size.as_str(), 1u64)
    };

    let num: f64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("Invalid number: {}", num_str))?;
    if !num.is_finite() || num < 0.0 {
        return Err(format!("Invalid size: {}", size));
    }

    Ok((num * multiplier as f64) as u64)
}

/// Parse a human-readable duration ("250ms", "5s", "1h 30m")
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value.trim()).map_err(|e| format!("Invalid duration '{}': {}", value, e))
}

/// Parse "key=value" pairs into a map
pub fn parse_key_values(pairs: &[String]) -> Result<std::collections::HashMap<String, String>, String> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .filter(|(k, _)| !k.is_empty())
                .ok_or_else(|| format!("Expected KEY=VALUE, got '{}'", pair))
        })
        .collect()
}

/// Serde adapter writing durations as humantime strings
pub mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serialize as e.g. "1h 30m"
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    /// Deserialize from e.g. "90m"
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1024").unwrap(), 1024);
        assert_eq!(parse_size("1K").unwrap(), 1024);
        assert_eq!(parse_size("1KB").unwrap(), 1024);
        assert_eq!(parse_size("4M").unwrap(), 4 * 1024 * 1024);
        assert_eq!(parse_size("1.5G").unwrap(), (1.5 * 1024.0 * 1024.0 * 1024.0) as u64);
        assert!(parse_size("").is_err());
        assert!(parse_size("lots").is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration(" 5s ").unwrap(), Duration::from_secs(5));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_parse_key_values() {
        let specs = parse_key_values(&["cpu_vendor=Intel".into(), "gpu_model = RTX 4070".into()])
            .unwrap();
        assert_eq!(specs["cpu_vendor"], "Intel");
        assert_eq!(specs["gpu_model"], "RTX 4070");
        assert!(parse_key_values(&["novalue".into()]).is_err());
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let args = CliArgs::parse_from(["captier", "--max-time", "2s", "detect", "--force"]);
        assert_eq!(args.max_time, Some(Duration::from_secs(2)));
        assert!(matches!(args.command, Some(Commands::Detect { force: true, quick: false })));

        let args = CliArgs::parse_from(["captier", "cache", "stats"]);
        assert!(matches!(
            args.command,
            Some(Commands::Cache { action: CacheAction::Stats })
        ));
    }
}
