//! Driver-reported capabilities

use crate::core::CapabilityMask;
use crate::error::{CapabilityError, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Source of capabilities that installed drivers expose
pub trait DriverRegistry: Send + Sync {
    /// Installed drivers
    fn driver_names(&self) -> Vec<String>;

    /// Capabilities one driver adds
    fn query_driver_capabilities(&self, driver_name: &str) -> Result<CapabilityMask>;
}

/// In-memory registry, for hosts that register drivers explicitly
#[derive(Default)]
pub struct StaticDriverRegistry {
    drivers: RwLock<BTreeMap<String, CapabilityMask>>,
}

impl StaticDriverRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a driver
    pub fn register_driver(&self, name: &str, capabilities: CapabilityMask) {
        self.drivers.write().insert(name.to_string(), capabilities);
    }

    /// Remove a driver; returns whether it was present
    pub fn remove_driver(&self, name: &str) -> bool {
        self.drivers.write().remove(name).is_some()
    }
}

impl DriverRegistry for StaticDriverRegistry {
    fn driver_names(&self) -> Vec<String> {
        self.drivers.read().keys().cloned().collect()
    }

    fn query_driver_capabilities(&self, driver_name: &str) -> Result<CapabilityMask> {
        self.drivers
            .read()
            .get(driver_name)
            .copied()
            .ok_or_else(|| CapabilityError::config(format!("unknown driver '{}'", driver_name)))
    }
}

/// Query every driver; failures become warnings
pub fn collect_driver_capabilities(
    registry: &dyn DriverRegistry,
) -> (BTreeMap<String, CapabilityMask>, Vec<String>) {
    let mut drivers = BTreeMap::new();
    let mut warnings = Vec::new();
    for name in registry.driver_names() {
        match registry.query_driver_capabilities(&name) {
            Ok(mask) => {
                drivers.insert(name, mask);
            }
            Err(e) => {
                tracing::warn!("Driver '{}' did not report capabilities: {}", name, e);
                warnings.push(format!("driver '{}' query failed: {}", name, e));
            }
        }
    }
    (drivers, warnings)
}

/// Add driver capabilities to the probed mask
///
/// Drivers only add bits; a bit the probes confirmed is never cleared.
pub fn merge_driver_capabilities(
    hardware: CapabilityMask,
    drivers: &BTreeMap<String, CapabilityMask>,
) -> CapabilityMask {
    drivers.values().fold(hardware, |mask, driver| mask.union(*driver))
}
