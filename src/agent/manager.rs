//! Agent manager: keeps deployed instances in line with the device source.

use crate::agent::cache::LogicalDeviceCache;
use crate::agent::source::{DeviceSource, SourceError};
use crate::supervisor::{DeviceDriver, SupervisorError};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// Errors from a single device operation.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Driver(#[from] SupervisorError),
}

/// Drives a [`DeviceDriver`] from a [`DeviceSource`].
///
/// Failures never abort a sync; they are logged and flag the manager for a
/// full resync on the next periodic tick.
pub struct AgentManager {
    driver: Arc<dyn DeviceDriver>,
    source: Arc<dyn DeviceSource>,
    cache: Mutex<LogicalDeviceCache>,
    needs_resync: AtomicBool,
    admin_state_up: AtomicBool,
}

impl AgentManager {
    pub fn new(driver: Arc<dyn DeviceDriver>, source: Arc<dyn DeviceSource>) -> Self {
        Self {
            driver,
            source,
            cache: Mutex::new(LogicalDeviceCache::new()),
            needs_resync: AtomicBool::new(false),
            admin_state_up: AtomicBool::new(true),
        }
    }

    pub fn needs_resync(&self) -> bool {
        self.needs_resync.load(Ordering::SeqCst)
    }

    /// Request a full sync on the next periodic tick.
    pub fn request_resync(&self) {
        self.needs_resync.store(true, Ordering::SeqCst);
    }

    pub fn admin_state_up(&self) -> bool {
        self.admin_state_up.load(Ordering::SeqCst)
    }

    /// Pool ids of deployed devices, sorted.
    pub fn known_pool_ids(&self) -> Vec<String> {
        self.cache.lock().pool_ids()
    }

    pub fn device_count(&self) -> usize {
        self.cache.lock().len()
    }

    /// Reconcile deployed instances with the source.
    ///
    /// Known devices that are no longer ready are destroyed, every ready
    /// device is refreshed, then orphans are removed.
    pub fn sync_state(&self) {
        let known: BTreeSet<String> = self.known_pool_ids().into_iter().collect();

        match self.source.ready_devices() {
            Ok(ready) => {
                let ready: BTreeSet<String> = ready.into_iter().collect();
                info!(known = known.len(), ready = ready.len(), "syncing device state");

                for pool_id in known.difference(&ready) {
                    self.destroy_device(pool_id);
                }
                for pool_id in &ready {
                    self.refresh_device(pool_id);
                }
            }
            Err(e) => {
                error!(error = %e, "unable to retrieve ready devices");
                self.request_resync();
            }
        }

        self.remove_orphans();
    }

    /// Create the device if it is not running, otherwise reload it.
    pub fn refresh_device(&self, pool_id: &str) {
        if let Err(e) = self.try_refresh(pool_id) {
            error!(pool_id, error = %e, "unable to refresh device");
            self.request_resync();
        }
    }

    fn try_refresh(&self, pool_id: &str) -> Result<(), AgentError> {
        let config = self.source.logical_device(pool_id)?;

        if self.driver.exists(pool_id) {
            self.driver.update(&config)?;
        } else {
            self.driver.create(&config)?;
        }

        self.cache.lock().put(&config);
        Ok(())
    }

    /// Destroy a known device. Unknown pools are ignored.
    ///
    /// The device leaves the cache even when teardown fails.
    pub fn destroy_device(&self, pool_id: &str) {
        if self.cache.lock().get_by_pool_id(pool_id).is_none() {
            return;
        }

        if let Err(e) = self.try_destroy(pool_id) {
            error!(pool_id, error = %e, "unable to destroy device");
            self.request_resync();
        }

        self.cache.lock().remove_by_pool_id(pool_id);
    }

    fn try_destroy(&self, pool_id: &str) -> Result<(), AgentError> {
        let report = self.driver.destroy(pool_id)?;
        for failure in &report.failed {
            warn!(pool_id, pid = %failure.pid, reason = %failure.reason, "process not signalled");
        }
        self.source.pool_destroyed(pool_id)?;
        Ok(())
    }

    /// Ask the driver to drop instances it no longer knows about.
    pub fn remove_orphans(&self) {
        let known = self.known_pool_ids();
        match self.driver.remove_orphans(&known) {
            Ok(()) | Err(SupervisorError::Unsupported(_)) => {}
            Err(e) => warn!(error = %e, "unable to remove orphaned instances"),
        }
    }

    /// Run a full sync if one was requested. Returns whether it ran.
    pub fn periodic_resync(&self) -> bool {
        if self.needs_resync.swap(false, Ordering::SeqCst) {
            self.sync_state();
            return true;
        }
        false
    }

    /// Gather statistics for every known pool and forward non-empty ones.
    pub fn collect_stats(&self) {
        for pool_id in self.known_pool_ids() {
            let result = self
                .driver
                .get_stats(&pool_id)
                .map_err(AgentError::from)
                .and_then(|stats| {
                    if !stats.is_empty() {
                        self.source.update_pool_stats(&pool_id, &stats)?;
                    }
                    Ok(())
                });

            if let Err(e) = result {
                error!(pool_id = %pool_id, error = %e, "error updating stats");
                self.request_resync();
            }
        }
    }

    /// Refresh a pool on request, whether or not it is known.
    pub fn reload_pool(&self, pool_id: &str) {
        self.refresh_device(pool_id);
    }

    /// Refresh a pool only if it is already deployed.
    pub fn modify_pool(&self, pool_id: &str) {
        let known = self.cache.lock().get_by_pool_id(pool_id).is_some();
        if known {
            self.refresh_device(pool_id);
        }
    }

    /// Destroy a pool only if it is already deployed.
    pub fn destroy_pool(&self, pool_id: &str) {
        self.destroy_device(pool_id);
    }

    /// Apply an administrative state change for the whole agent.
    ///
    /// Going down destroys every deployed device; coming back up schedules a
    /// resync.
    pub fn set_admin_state(&self, up: bool) {
        if self.admin_state_up.swap(up, Ordering::SeqCst) == up {
            return;
        }

        info!(admin_state_up = up, "agent admin state changed");
        if up {
            self.request_resync();
        } else {
            for pool_id in self.known_pool_ids() {
                self.destroy_device(&pool_id);
            }
        }
    }
}
