//! Logical load balancer device description.
//!
//! This is the shape handed to the driver by the orchestrator: one VIP, one
//! pool, its members and health monitors. It is read-only for the duration
//! of a compile/spawn cycle.

use serde::de::value::StrDeserializer;
use serde::de::IntoDeserializer;
use serde::{Deserialize, Deserializer, Serialize};

/// Root logical configuration for one load balancer instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogicalConfig {
    /// Virtual IP the balancer listens on
    pub vip: Vip,

    /// Backend pool
    pub pool: Pool,

    /// Backend members, in orchestrator order
    #[serde(default)]
    pub members: Vec<Member>,

    /// Health monitors attached to the pool
    #[serde(default, alias = "healthmonitors")]
    pub health_monitors: Vec<HealthMonitor>,
}

impl LogicalConfig {
    /// Identifier of the pool, which also names the instance.
    pub fn pool_id(&self) -> &str {
        &self.pool.id
    }

    /// Members that may appear in the rendered backend list.
    pub fn eligible_members(&self) -> impl Iterator<Item = &Member> {
        self.members.iter().filter(|m| m.is_eligible())
    }

    /// The first administratively enabled health monitor, if any.
    pub fn active_monitor(&self) -> Option<&HealthMonitor> {
        self.health_monitors.iter().find(|m| m.admin_state_up)
    }
}

/// Virtual IP descriptor.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Vip {
    /// Listener protocol; absent or empty means there is nothing to render
    #[serde(default, deserialize_with = "deserialize_optional_protocol")]
    pub protocol: Option<Protocol>,

    /// Listen port
    pub protocol_port: u16,

    /// Network port carrying the VIP addresses
    pub port: Port,

    /// Session persistence policy
    #[serde(default)]
    pub session_persistence: Option<SessionPersistence>,
}

/// Network port bound into the instance namespace.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Port {
    pub id: String,

    #[serde(default)]
    pub network_id: String,

    #[serde(default)]
    pub mac_address: String,

    #[serde(default)]
    pub fixed_ips: Vec<FixedIp>,
}

impl Port {
    /// First fixed IP address on the port, used as the listen address.
    pub fn first_ip(&self) -> Option<&str> {
        self.fixed_ips.first().map(|ip| ip.ip_address.as_str())
    }
}

/// Fixed IP assignment on a port.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FixedIp {
    pub ip_address: String,
    pub subnet: Subnet,
}

/// Subnet of a fixed IP.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Subnet {
    /// CIDR, e.g. `10.0.0.0/24`
    pub cidr: String,

    #[serde(default)]
    pub gateway_ip: Option<String>,
}

/// Load balancing protocol.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Protocol {
    Tcp,
    Http,
    Https,
}

/// Backend pool.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Pool {
    pub id: String,
    pub protocol: Protocol,

    #[serde(default)]
    pub lb_method: LbMethod,
}

/// Pool balancing method.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LbMethod {
    #[default]
    RoundRobin,
    LeastConnections,
    SourceIp,
}

/// Backend member.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Member {
    pub address: String,
    pub protocol_port: u16,

    #[serde(default = "default_weight")]
    pub weight: u32,

    #[serde(default = "default_true")]
    pub admin_state_up: bool,

    #[serde(default)]
    pub status: MemberStatus,
}

impl Member {
    /// Whether this member belongs in the rendered backend list.
    pub fn is_eligible(&self) -> bool {
        self.admin_state_up && matches!(self.status, MemberStatus::Active | MemberStatus::Inactive)
    }
}

/// Operational status reported for a member.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberStatus {
    #[default]
    Active,
    Inactive,
    /// Pending, error and any other transitional state
    #[serde(other)]
    Other,
}

/// Health monitor definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthMonitor {
    #[serde(rename = "type")]
    pub monitor_type: MonitorType,

    /// Probe interval in seconds
    pub delay: u32,

    /// Probe timeout in seconds
    pub timeout: u32,

    /// Failures before a member is marked down
    pub max_retries: u32,

    #[serde(default = "default_true")]
    pub admin_state_up: bool,

    #[serde(default = "default_http_method")]
    pub http_method: String,

    #[serde(default = "default_url_path")]
    pub url_path: String,

    #[serde(default = "default_expected_codes")]
    pub expected_codes: String,
}

/// Health monitor type.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonitorType {
    Ping,
    Tcp,
    Http,
    Https,
    #[serde(other)]
    Other,
}

/// Session persistence policy attached to the VIP.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionPersistence {
    #[serde(rename = "type")]
    pub persistence_type: PersistenceType,

    #[serde(default)]
    pub cookie_name: Option<String>,
}

/// Session persistence type.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PersistenceType {
    SourceIp,
    HttpCookie,
    AppCookie,
}

/// Treats a blank protocol string the same as a missing one.
fn deserialize_optional_protocol<'de, D>(deserializer: D) -> Result<Option<Protocol>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => {
            let value: StrDeserializer<'_, D::Error> = value.into_deserializer();
            Protocol::deserialize(value).map(Some)
        }
    }
}

fn default_weight() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_http_method() -> String {
    "GET".to_string()
}

fn default_url_path() -> String {
    "/".to_string()
}

fn default_expected_codes() -> String {
    "200".to_string()
}
