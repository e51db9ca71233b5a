//! Progress reporter implementation
//!
//! Uses indicatif for the detection progress display:
//! - Phase spinner with the current phase name
//! - Percentage bar driven by the orchestrator's progress estimate
//! - A watcher thread that polls a running orchestrator

use crate::detect::{DetectionOrchestrator, DetectionPhase};
use crate::error::{CapabilityError, Result};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Bar resolution; progress fractions are mapped onto this many steps
const BAR_STEPS: u64 = 1000;

/// How often the watcher polls the orchestrator
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Progress reporter for detection runs
pub struct ProgressReporter {
    /// Multi-progress container
    multi: MultiProgress,
    /// Phase spinner
    status: ProgressBar,
    /// Percentage bar
    bar: ProgressBar,
    /// Start time
    start_time: Instant,
    /// Last fraction shown, as f64 bits
    fraction_bits: AtomicU64,
    /// Is progress enabled
    enabled: AtomicBool,
}

impl ProgressReporter {
    /// Create a new progress reporter
    pub fn new() -> Self {
        let multi = MultiProgress::new();

        let status = multi.add(ProgressBar::new_spinner());
        status.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        status.enable_steady_tick(Duration::from_millis(100));

        let bar = multi.add(ProgressBar::new(BAR_STEPS));
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {percent}% ({elapsed})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.set_prefix("Detect");

        Self {
            multi,
            status,
            bar,
            start_time: Instant::now(),
            fraction_bits: AtomicU64::new(0.0f64.to_bits()),
            enabled: AtomicBool::new(true),
        }
    }

    /// Create a disabled progress reporter (for quiet mode)
    pub fn disabled() -> Self {
        let reporter = Self::new();
        reporter.enabled.store(false, Ordering::SeqCst);
        reporter.status.disable_steady_tick();
        reporter.multi.set_draw_target(ProgressDrawTarget::hidden());
        reporter
    }

    /// Show `fraction` (clamped to `[0, 1]`) and the phase name
    pub fn update(&self, fraction: f64, phase: DetectionPhase) {
        let fraction = if fraction.is_finite() { fraction.clamp(0.0, 1.0) } else { 0.0 };
        self.fraction_bits.store(fraction.to_bits(), Ordering::Relaxed);
        self.bar.set_position((fraction * BAR_STEPS as f64).round() as u64);
        self.status.set_message(phase.name().to_string());
    }

    /// Set current status message
    pub fn set_status(&self, msg: &str) {
        self.status.set_message(msg.to_string());
    }

    /// Last fraction shown
    pub fn fraction(&self) -> f64 {
        f64::from_bits(self.fraction_bits.load(Ordering::Relaxed))
    }

    /// Get elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Finish progress with success message
    pub fn finish_success(&self, message: &str) {
        self.bar.set_position(BAR_STEPS);
        self.status.finish_with_message(format!("✓ {}", message));
        self.bar.finish();
    }

    /// Finish progress with error message
    pub fn finish_error(&self, message: &str) {
        self.status.finish_with_message(format!("✗ {}", message));
        self.bar.abandon();
    }

    /// Check if progress is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Poll `orchestrator` on a background thread until the watcher is stopped
    pub fn watch(self: &Arc<Self>, orchestrator: Arc<DetectionOrchestrator>) -> Result<ProgressWatcher> {
        let stop = Arc::new(AtomicBool::new(false));
        let reporter = Arc::clone(self);
        let flag = Arc::clone(&stop);

        let handle = std::thread::Builder::new()
            .name("captier-progress".to_string())
            .spawn(move || {
                while !flag.load(Ordering::Relaxed) {
                    reporter.update(orchestrator.get_detection_progress(), orchestrator.detection_phase());
                    std::thread::sleep(POLL_INTERVAL);
                }
            })
            .map_err(|e| CapabilityError::ThreadError(format!("progress watcher: {}", e)))?;

        Ok(ProgressWatcher {
            stop,
            handle: Some(handle),
        })
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a running progress watcher; stops it on drop
pub struct ProgressWatcher {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressWatcher {
    /// Stop polling and wait for the thread
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ProgressWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Simple text-based progress for non-TTY environments
///
/// Prints a line on each phase change.
pub struct SimpleProgress {
    /// Start time
    start_time: Instant,
    /// Last phase printed
    last_phase: parking_lot::Mutex<Option<DetectionPhase>>,
}

impl SimpleProgress {
    /// Create a new simple progress reporter
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            last_phase: parking_lot::Mutex::new(None),
        }
    }

    /// Record progress; returns whether a line was printed
    pub fn update(&self, fraction: f64, phase: DetectionPhase) -> bool {
        let mut last = self.last_phase.lock();
        if *last == Some(phase) {
            return false;
        }
        *last = Some(phase);
        println!(
            "[{:>5.1}%] {} ({:.1?})",
            fraction.clamp(0.0, 1.0) * 100.0,
            phase.name(),
            self.start_time.elapsed()
        );
        true
    }
}

impl Default for SimpleProgress {
    fn default() -> Self {
        Self::new()
    }
}
