//! Per-instance proxy process supervision.

mod instance;
mod paths;

pub use instance::InstanceSupervisor;
pub use paths::{validate_pool_id, StatePaths};

use crate::model::LogicalConfig;
use crate::namespace::{BindingError, ExecError};
use crate::render::CompileError;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from managing an instance.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to compile configuration for pool '{pool_id}': {source}")]
    Compile {
        pool_id: String,
        #[source]
        source: CompileError,
    },

    #[error("port binding failed: {0}")]
    Binding(#[from] BindingError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid pool id '{0}'")]
    InvalidPoolId(String),

    #[error("{0} is not supported by this driver")]
    Unsupported(&'static str),
}

/// Per-pool statistics; always empty for now.
pub type PoolStats = BTreeMap<String, u64>;

/// A PID that could not be signalled during destroy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalFailure {
    /// PID as it appeared in the PID file
    pub pid: String,
    pub reason: String,
}

/// Outcome of a best-effort instance teardown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DestroyReport {
    /// PIDs sent `SIGQUIT`
    pub signalled: Vec<u32>,
    pub failed: Vec<SignalFailure>,
    /// Whether a VIP port was unplugged
    pub unplugged: bool,
    /// Whether the namespace was deleted
    pub namespace_removed: bool,
}

impl DestroyReport {
    /// True when every recorded PID was signalled.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Lifecycle operations on load balancer instances, keyed by pool id.
pub trait DeviceDriver: Send + Sync {
    /// Plug the VIP port and start the proxy.
    fn create(&self, config: &LogicalConfig) -> Result<(), SupervisorError>;

    /// Rewrite the configuration and reload the running proxy.
    fn update(&self, config: &LogicalConfig) -> Result<(), SupervisorError>;

    /// Stop the proxy and remove everything the instance owns.
    fn destroy(&self, pool_id: &str) -> Result<DestroyReport, SupervisorError>;

    /// Whether the instance is running. Never fails; problems read as `false`.
    fn exists(&self, pool_id: &str) -> bool;

    fn get_stats(&self, pool_id: &str) -> Result<PoolStats, SupervisorError>;

    /// Tear down instances not in `known_pool_ids`.
    fn remove_orphans(&self, known_pool_ids: &[String]) -> Result<(), SupervisorError>;
}
