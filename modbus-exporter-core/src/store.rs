//! Shared, reloadable set of device profiles.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::profile::{DeviceProfile, DeviceProfiles};

/// Thread-safe holder of the current profile set.
///
/// Readers get an `Arc` snapshot, so a scrape keeps working on the profiles
/// it started with even if a reload replaces them halfway through.
#[derive(Debug, Default)]
pub struct SafeConfig {
    current: RwLock<Arc<DeviceProfiles>>,
}

impl SafeConfig {
    pub fn new(profiles: DeviceProfiles) -> Self {
        Self {
            current: RwLock::new(Arc::new(profiles)),
        }
    }

    /// Snapshot of the current profile set.
    pub fn read(&self) -> Arc<DeviceProfiles> {
        Arc::clone(&self.current.read())
    }

    /// Look up a single profile by name.
    pub fn profile(&self, name: &str) -> Option<DeviceProfile> {
        self.current.read().get(name).cloned()
    }

    /// Atomically install a new profile set, returning the previous one.
    pub fn replace(&self, profiles: DeviceProfiles) -> Arc<DeviceProfiles> {
        let next = Arc::new(profiles);
        std::mem::replace(&mut *self.current.write(), next)
    }
}
