//! On-disk state layout.
//!
//! Every instance owns `<state_path>/<pool_id>/`, holding the rendered `conf`,
//! the proxy's `nginx.pid`, the bound VIP `port` id and its logs.

use crate::supervisor::SupervisorError;
use std::fs::DirBuilder;
use std::path::{Path, PathBuf};

const CONF_FILE: &str = "conf";
const PID_FILE: &str = "nginx.pid";
const PORT_FILE: &str = "port";

/// Reject pool ids that would escape the state directory.
pub fn validate_pool_id(pool_id: &str) -> Result<(), SupervisorError> {
    let bad = pool_id.is_empty()
        || pool_id == "."
        || pool_id == ".."
        || pool_id.contains(['/', '\\', '\0']);
    if bad {
        return Err(SupervisorError::InvalidPoolId(pool_id.to_string()));
    }
    Ok(())
}

/// Computes per-instance paths under the state root.
#[derive(Debug, Clone)]
pub struct StatePaths {
    root: PathBuf,
}

impl StatePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory owned by the instance. Does not touch the filesystem.
    pub fn instance_dir(&self, pool_id: &str) -> Result<PathBuf, SupervisorError> {
        validate_pool_id(pool_id)?;
        Ok(self.root.join(pool_id))
    }

    /// Create the instance directory (mode 0755) if missing and return it.
    pub fn ensure_instance_dir(&self, pool_id: &str) -> Result<PathBuf, SupervisorError> {
        let dir = self.instance_dir(pool_id)?;

        let mut builder = DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o755);
        }
        builder.create(&dir).map_err(|source| SupervisorError::Io {
            path: dir.clone(),
            source,
        })?;

        Ok(dir)
    }

    pub fn config_path(&self, pool_id: &str) -> Result<PathBuf, SupervisorError> {
        Ok(self.instance_dir(pool_id)?.join(CONF_FILE))
    }

    pub fn pid_path(&self, pool_id: &str) -> Result<PathBuf, SupervisorError> {
        Ok(self.instance_dir(pool_id)?.join(PID_FILE))
    }

    /// Holds the id of the VIP port plugged for the instance.
    pub fn port_path(&self, pool_id: &str) -> Result<PathBuf, SupervisorError> {
        Ok(self.instance_dir(pool_id)?.join(PORT_FILE))
    }

    /// Prefix passed to the proxy's `-p`, with a trailing separator.
    pub fn base_path(&self, pool_id: &str) -> Result<String, SupervisorError> {
        let dir = self.instance_dir(pool_id)?;
        Ok(format!("{}/", dir.display()))
    }
}
