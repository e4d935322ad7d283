//! Where the agent learns which devices should exist.

use crate::model::LogicalConfig;
use crate::namespace::{PlugAction, PlugCallback};
use crate::supervisor::PoolStats;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// File extensions recognized as device descriptions.
pub const DEVICE_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Errors from reading device descriptions.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse device '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("no device description for pool '{0}'")]
    NotFound(String),

    #[error("device '{}' describes pool '{found}', expected '{expected}'", path.display())]
    PoolIdMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },
}

/// Desired state of the devices hosted by this agent.
pub trait DeviceSource: Send + Sync {
    /// Pool ids that should be deployed.
    fn ready_devices(&self) -> Result<Vec<String>, SourceError>;

    /// Full logical configuration of one pool.
    fn logical_device(&self, pool_id: &str) -> Result<LogicalConfig, SourceError>;

    /// Acknowledge that a pool's instance was torn down.
    fn pool_destroyed(&self, pool_id: &str) -> Result<(), SourceError>;

    /// Receive statistics collected for a pool.
    fn update_pool_stats(&self, _pool_id: &str, _stats: &PoolStats) -> Result<(), SourceError> {
        Ok(())
    }

    /// A VIP port is about to be plugged into an instance namespace.
    fn port_plugged(&self, _port_id: &str) -> Result<(), SourceError> {
        Ok(())
    }

    /// A VIP port is about to be unplugged.
    fn port_unplugged(&self, _port_id: &str) -> Result<(), SourceError> {
        Ok(())
    }
}

/// Forwards VIP port binding changes to a [`DeviceSource`].
pub struct SourcePlugCallback {
    source: Arc<dyn DeviceSource>,
}

impl SourcePlugCallback {
    pub fn new(source: Arc<dyn DeviceSource>) -> Self {
        Self { source }
    }
}

impl PlugCallback for SourcePlugCallback {
    fn notify(&self, action: PlugAction, port_id: &str) {
        info!(port_id, action = ?action, "VIP port binding changed");
        let result = match action {
            PlugAction::Plug => self.source.port_plugged(port_id),
            PlugAction::Unplug => self.source.port_unplugged(port_id),
        };
        if let Err(e) = result {
            warn!(port_id, action = ?action, error = %e, "failed to report port binding");
        }
    }
}

/// Reads `<dir>/<pool_id>.{yaml,yml,json}` device files.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn device_path(&self, pool_id: &str) -> Option<PathBuf> {
        DEVICE_EXTENSIONS
            .iter()
            .map(|ext| self.dir.join(format!("{}.{}", pool_id, ext)))
            .find(|p| p.is_file())
    }
}

/// Whether a path names a device description file.
pub fn is_device_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| DEVICE_EXTENSIONS.contains(&e))
}

/// Parse a device description from YAML or JSON text.
pub fn parse_device(path: &Path, contents: &str) -> Result<LogicalConfig, SourceError> {
    serde_yaml::from_str(contents).map_err(|source| SourceError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

impl DeviceSource for DirectorySource {
    fn ready_devices(&self) -> Result<Vec<String>, SourceError> {
        let io_err = |source| SourceError::Io {
            path: self.dir.clone(),
            source,
        };

        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if !path.is_file() || !is_device_file(&path) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }

        ids.sort();
        ids.dedup();
        debug!(dir = %self.dir.display(), count = ids.len(), "listed ready devices");
        Ok(ids)
    }

    fn logical_device(&self, pool_id: &str) -> Result<LogicalConfig, SourceError> {
        let path = self
            .device_path(pool_id)
            .ok_or_else(|| SourceError::NotFound(pool_id.to_string()))?;

        let contents = std::fs::read_to_string(&path).map_err(|source| SourceError::Io {
            path: path.clone(),
            source,
        })?;
        let config = parse_device(&path, &contents)?;

        if config.pool_id() != pool_id {
            return Err(SourceError::PoolIdMismatch {
                path,
                expected: pool_id.to_string(),
                found: config.pool_id().to_string(),
            });
        }

        Ok(config)
    }

    fn pool_destroyed(&self, pool_id: &str) -> Result<(), SourceError> {
        info!(pool_id, "pool instance destroyed");
        Ok(())
    }

    fn update_pool_stats(&self, pool_id: &str, stats: &PoolStats) -> Result<(), SourceError> {
        info!(pool_id, stats = ?stats, "pool statistics");
        Ok(())
    }
}
