//! Configuration data types.

use crate::render::{CompilerOptions, Dialect};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Global settings
    #[serde(default)]
    pub global: GlobalConfig,

    /// Agent host settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Proxy binary and rendering settings
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Virtual interface plumbing
    #[serde(default)]
    pub interface: InterfaceConfig,
}

/// Global configuration settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GlobalConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::Json,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Agent host settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    /// Directory holding one state directory per instance
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,

    /// Directory of logical device files, one per pool
    #[serde(default = "default_devices_path")]
    pub devices_path: PathBuf,

    /// How often the agent checks whether a resync is due
    #[serde(default = "default_periodic_interval", with = "humantime_serde")]
    pub periodic_interval: Duration,

    /// Command prefix for privileged commands, e.g. `sudo -n`
    #[serde(default = "default_root_helper")]
    pub root_helper: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            devices_path: default_devices_path(),
            periodic_interval: default_periodic_interval(),
            root_helper: default_root_helper(),
        }
    }
}

/// Proxy process settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyConfig {
    /// Proxy executable spawned inside each namespace
    #[serde(default = "default_binary")]
    pub binary: PathBuf,

    /// Installation prefix; `conf/mime.types` is resolved against it
    #[serde(default = "default_prefix")]
    pub prefix: PathBuf,

    /// User the worker processes run as
    #[serde(default = "default_user")]
    pub user: String,

    /// Group the worker processes run as
    #[serde(default = "default_user_group")]
    pub user_group: String,

    #[serde(default = "default_worker_connections")]
    pub worker_connections: u32,

    /// Prepended to the pool id to name the instance namespace
    #[serde(default = "default_namespace_prefix")]
    pub namespace_prefix: String,

    /// Configuration dialect understood by the binary
    #[serde(default)]
    pub dialect: Dialect,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            prefix: default_prefix(),
            user: default_user(),
            user_group: default_user_group(),
            worker_connections: default_worker_connections(),
            namespace_prefix: default_namespace_prefix(),
            dialect: Dialect::default(),
        }
    }
}

impl ProxyConfig {
    /// Global-section settings for the compiler.
    pub fn compiler_options(&self) -> CompilerOptions {
        CompilerOptions {
            user: self.user.clone(),
            group: self.user_group.clone(),
            worker_connections: self.worker_connections,
            mime_types: self
                .prefix
                .join("conf")
                .join("mime.types")
                .to_string_lossy()
                .into_owned(),
        }
    }
}

/// Virtual interface settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InterfaceConfig {
    /// Interface driver kind
    #[serde(default)]
    pub driver: InterfaceDriverKind,

    /// Bridge VIP ports are attached to
    #[serde(default = "default_bridge")]
    pub bridge: String,
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            driver: InterfaceDriverKind::default(),
            bridge: default_bridge(),
        }
    }
}

/// Supported interface drivers.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceDriverKind {
    #[default]
    Ovs,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Json
}

fn default_state_path() -> PathBuf {
    PathBuf::from("/var/lib/nslb/lbaas")
}

fn default_devices_path() -> PathBuf {
    PathBuf::from("/etc/nslb/devices")
}

fn default_periodic_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_root_helper() -> String {
    "sudo".to_string()
}

fn default_binary() -> PathBuf {
    PathBuf::from("/usr/local/senginx/sbin/nginx")
}

fn default_prefix() -> PathBuf {
    PathBuf::from("/usr/local/senginx")
}

fn default_user() -> String {
    "senginx".to_string()
}

fn default_user_group() -> String {
    "root".to_string()
}

fn default_worker_connections() -> u32 {
    10240
}

fn default_namespace_prefix() -> String {
    "qlbaas-".to_string()
}

fn default_bridge() -> String {
    "br-int".to_string()
}

/// Custom serde module for humantime durations.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
