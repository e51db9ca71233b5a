//! Background cache maintenance
//!
//! The updater owns a handle to the cache, never the reverse. Its thread
//! waits on four sources at once: stop, an explicit trigger, the cache's
//! refresh queue and the next periodic deadline.
//!
//! Each cycle flags entries older than the interval as dirty, then refreshes
//! dirty entries in priority order (highest first, then by key).

use super::{CacheEntry, CachePayload, CapabilityCache, MaintenanceReport};
use crate::core::{ListenerId, ListenerRegistry};
use crate::error::{CapabilityError, Result};
use crossbeam::channel::{after, bounded, select, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Shortest period the updater will run at
const MIN_PERIOD: Duration = Duration::from_millis(10);

/// Produces a fresh payload for a dirty entry
pub trait CacheRefresher: Send + Sync {
    /// New payload for `key`, or `None` to leave it dirty
    fn refresh(&self, key: &str, current: &CacheEntry) -> Result<Option<CachePayload>>;
}

/// Outcome of one update cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    /// Cycle number, starting at 1
    pub cycle: u64,
    /// Maintenance pass result
    pub maintenance: MaintenanceReport,
    /// Dirty entries refreshed
    pub refreshed: usize,
    /// Refresh attempts that failed
    pub failed: usize,
    /// Whether the cycle ran at the shortened period
    pub aggressive: bool,
}

/// Period until the next cycle: a quarter of `interval` while the hit ratio is low
pub fn refresh_period(cache: &CapabilityCache, interval: Duration) -> Duration {
    let period = if cache.needs_aggressive_refresh() {
        interval / 4
    } else {
        interval
    };
    period.max(MIN_PERIOD)
}

struct Shared {
    cache: Arc<CapabilityCache>,
    refresher: Arc<dyn CacheRefresher>,
    interval: Duration,
    callbacks: ListenerRegistry<UpdateReport>,
    priorities: RwLock<HashMap<String, u32>>,
    cycles: AtomicU64,
    refreshed: AtomicU64,
    failures: AtomicU64,
    progress_bits: AtomicU64,
}

impl Shared {
    fn set_progress(&self, value: f64) {
        self.progress_bits
            .store(value.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    fn refresh_one(&self, key: &str) -> Result<bool> {
        let Some(current) = self.cache.peek(key) else {
            return Ok(false);
        };
        match self.refresher.refresh(key, &current)? {
            Some(payload) => self.cache.refresh_entry(key, payload),
            None => Ok(false),
        }
    }

    fn refresh_and_count(&self, key: &str) -> Option<bool> {
        match self.refresh_one(key) {
            Ok(done) => {
                if done {
                    self.refreshed.fetch_add(1, Ordering::Relaxed);
                }
                Some(done)
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Background refresh of '{}' failed: {}", key, e);
                None
            }
        }
    }

    fn refresh_order(&self, mut keys: Vec<String>) -> Vec<String> {
        let priorities = self.priorities.read();
        keys.sort_by(|a, b| {
            let rank = |key: &String| priorities.get(key).copied().unwrap_or(0);
            rank(b).cmp(&rank(a)).then_with(|| a.cmp(b))
        });
        keys
    }

    fn run_cycle(&self, aggressive: bool) -> UpdateReport {
        self.set_progress(0.0);
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!("Cache update cycle {} starting", cycle);

        let maintenance = self.cache.perform_maintenance().unwrap_or_else(|e| {
            tracing::warn!("Cache maintenance failed: {}", e);
            MaintenanceReport::default()
        });

        let mut report = UpdateReport {
            cycle,
            maintenance,
            aggressive,
            ..Default::default()
        };

        if self.cache.get_configuration().enable_background_refresh {
            self.cache.mark_stale_entries(self.interval);
            let keys = self.refresh_order(self.cache.dirty_keys());
            let total = keys.len().max(1) as f64;
            for (done, key) in keys.iter().enumerate() {
                match self.refresh_and_count(key) {
                    Some(true) => report.refreshed += 1,
                    Some(false) => {}
                    None => report.failed += 1,
                }
                self.set_progress((done + 1) as f64 / total);
            }
        }

        self.set_progress(1.0);
        self.callbacks.notify(&report);
        report
    }

    fn run(&self, stop_rx: Receiver<()>, trigger_rx: Receiver<()>) {
        let refresh_rx = self.cache.refresh_requests();
        let mut period = refresh_period(&self.cache, self.interval);
        let mut timer = after(period);

        loop {
            let mut due = false;
            select! {
                recv(stop_rx) -> _ => break,
                recv(trigger_rx) -> msg => {
                    if msg.is_err() {
                        break;
                    }
                    due = true;
                }
                recv(refresh_rx) -> key => {
                    if let Ok(key) = key {
                        self.refresh_and_count(&key);
                    }
                }
                recv(timer) -> _ => due = true,
            }

            if due {
                self.run_cycle(period < self.interval);
                period = refresh_period(&self.cache, self.interval);
                timer = after(period);
            }
        }
        tracing::debug!("Cache updater stopped");
    }
}

struct Running {
    stop_tx: Sender<()>,
    trigger_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Periodic maintenance and dirty-entry refresh on a dedicated thread
pub struct BackgroundCacheUpdater {
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
}

impl BackgroundCacheUpdater {
    /// Create a stopped updater
    pub fn new(
        cache: Arc<CapabilityCache>,
        refresher: Arc<dyn CacheRefresher>,
        interval: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                cache,
                refresher,
                interval: interval.max(MIN_PERIOD),
                callbacks: ListenerRegistry::new(),
                priorities: RwLock::new(HashMap::new()),
                cycles: AtomicU64::new(0),
                refreshed: AtomicU64::new(0),
                failures: AtomicU64::new(0),
                progress_bits: AtomicU64::new(0.0f64.to_bits()),
            }),
            running: Mutex::new(None),
        }
    }

    /// Start the thread; a no-op when already running
    pub fn start(&self) -> Result<()> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Ok(());
        }

        let (stop_tx, stop_rx) = bounded(1);
        let (trigger_tx, trigger_rx) = bounded(1);
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("captier-cache-updater".to_string())
            .spawn(move || shared.run(stop_rx, trigger_rx))
            .map_err(|e| CapabilityError::ThreadError(e.to_string()))?;

        tracing::info!(
            "Background cache updates every {}",
            humantime::format_duration(self.shared.interval)
        );
        *running = Some(Running {
            stop_tx,
            trigger_tx,
            handle,
        });
        Ok(())
    }

    /// Stop the thread and wait for it; a no-op when stopped
    pub fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        let _ = running.stop_tx.send(());
        if running.handle.join().is_err() {
            tracing::warn!("Cache updater thread panicked");
        }
    }

    /// Whether the thread is running
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Run a cycle now; returns false when stopped or a trigger is already pending
    pub fn trigger_update(&self) -> bool {
        match self.running.lock().as_ref() {
            Some(running) => running.trigger_tx.try_send(()).is_ok(),
            None => false,
        }
    }

    /// Run one cycle on the calling thread
    pub fn run_once(&self) -> UpdateReport {
        self.shared.run_cycle(false)
    }

    /// Callback invoked after every cycle
    pub fn register_update_callback<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&UpdateReport) + Send + Sync + 'static,
    {
        self.shared.callbacks.register(callback)
    }

    /// Remove an update callback
    pub fn unregister_update_callback(&self, id: ListenerId) -> bool {
        self.shared.callbacks.unregister(id)
    }

    /// Refresh order for dirty keys; unlisted keys rank 0
    ///
    /// Replaces any earlier priorities.
    pub fn set_update_priorities(&self, priorities: HashMap<String, u32>) {
        tracing::debug!("Cache refresh priorities set for {} key(s)", priorities.len());
        *self.shared.priorities.write() = priorities;
    }

    /// Progress of the current or last cycle in `[0, 1]`
    pub fn progress(&self) -> f64 {
        f64::from_bits(self.shared.progress_bits.load(Ordering::Relaxed))
    }

    /// Cycles completed
    pub fn cycles(&self) -> u64 {
        self.shared.cycles.load(Ordering::Relaxed)
    }

    /// Entries refreshed
    pub fn refreshed_count(&self) -> u64 {
        self.shared.refreshed.load(Ordering::Relaxed)
    }

    /// Refresh attempts that failed
    pub fn failure_count(&self) -> u64 {
        self.shared.failures.load(Ordering::Relaxed)
    }

    /// Configured base interval
    pub fn interval(&self) -> Duration {
        self.shared.interval
    }
}

impl Drop for BackgroundCacheUpdater {
    fn drop(&mut self) {
        self.stop();
    }
}
