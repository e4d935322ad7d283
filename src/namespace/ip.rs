//! `ip netns` helpers.

use crate::namespace::exec::{command, CommandExecutor, ExecError};
use std::sync::Arc;
use tracing::{debug, info};

/// Namespace operations built on the `ip` tool.
#[derive(Clone)]
pub struct IpNetns {
    executor: Arc<dyn CommandExecutor>,
}

impl IpNetns {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }

    /// Names of all network namespaces on the host.
    pub fn list_namespaces(&self) -> Result<Vec<String>, ExecError> {
        let out = self
            .executor
            .execute(&command(&["ip", "netns", "list"]), true)?;

        // Newer iproute2 appends "(id: N)" after the name
        Ok(out
            .lines()
            .filter_map(|line| line.split_whitespace().next())
            .map(str::to_string)
            .collect())
    }

    pub fn namespace_exists(&self, namespace: &str) -> Result<bool, ExecError> {
        Ok(self.list_namespaces()?.iter().any(|ns| ns == namespace))
    }

    /// Create the namespace if missing and bring up its loopback.
    pub fn ensure_namespace(&self, namespace: &str) -> Result<(), ExecError> {
        if !self.namespace_exists(namespace)? {
            info!(namespace, "creating network namespace");
            self.executor
                .execute(&command(&["ip", "netns", "add", namespace]), true)?;
            self.execute_in(namespace, &command(&["ip", "link", "set", "lo", "up"]), true)?;
        }
        Ok(())
    }

    /// Run a command inside a namespace.
    pub fn execute_in(
        &self,
        namespace: &str,
        cmd: &[String],
        check_exit_code: bool,
    ) -> Result<String, ExecError> {
        let mut full = command(&["ip", "netns", "exec", namespace]);
        full.extend_from_slice(cmd);
        self.executor.execute(&full, check_exit_code)
    }

    /// Whether a link device exists in the namespace.
    pub fn device_exists(&self, device: &str, namespace: &str) -> Result<bool, ExecError> {
        match self.execute_in(namespace, &command(&["ip", "link", "show", "dev", device]), true) {
            Ok(_) => Ok(true),
            Err(ExecError::Failed { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Link device names inside the namespace.
    pub fn devices(&self, namespace: &str) -> Result<Vec<String>, ExecError> {
        let out = self.execute_in(namespace, &command(&["ip", "-o", "link", "list"]), true)?;
        Ok(parse_link_names(&out))
    }

    /// Delete the namespace once only loopback is left in it.
    ///
    /// Returns whether the namespace was removed.
    pub fn garbage_collect_namespace(&self, namespace: &str) -> Result<bool, ExecError> {
        if !self.namespace_exists(namespace)? {
            return Ok(false);
        }

        let remaining: Vec<String> = self
            .devices(namespace)?
            .into_iter()
            .filter(|d| d != "lo")
            .collect();

        if !remaining.is_empty() {
            debug!(namespace, devices = ?remaining, "namespace still has devices, keeping it");
            return Ok(false);
        }

        info!(namespace, "deleting network namespace");
        self.executor
            .execute(&command(&["ip", "netns", "delete", namespace]), true)?;
        Ok(true)
    }
}

/// Parse `ip -o link list` output, e.g. `2: tap1234@if5: <BROADCAST> ...`.
fn parse_link_names(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split(':').nth(1))
        .map(|name| name.trim())
        .map(|name| name.split('@').next().unwrap_or(name).to_string())
        .filter(|name| !name.is_empty())
        .collect()
}
