//! Virtual interface driver boundary.

use crate::model::{FixedIp, Port};
use crate::namespace::exec::{command, CommandExecutor, ExecError};
use crate::namespace::ip::IpNetns;
use std::sync::Arc;
use tracing::{debug, info};

/// Read-only view of a port, as seen by an interface driver.
///
/// Unplugging only knows the port id, so a stub carries empty fields.
#[derive(Debug, Clone, Copy)]
pub struct PortRef<'a> {
    id: &'a str,
    network_id: &'a str,
    mac_address: &'a str,
    fixed_ips: &'a [FixedIp],
}

impl<'a> PortRef<'a> {
    /// A port known only by its id.
    pub fn stub(id: &'a str) -> Self {
        Self {
            id,
            network_id: "",
            mac_address: "",
            fixed_ips: &[],
        }
    }

    pub fn id(&self) -> &'a str {
        self.id
    }

    pub fn network_id(&self) -> &'a str {
        self.network_id
    }

    pub fn mac_address(&self) -> &'a str {
        self.mac_address
    }

    pub fn fixed_ips(&self) -> &'a [FixedIp] {
        self.fixed_ips
    }
}

impl<'a> From<&'a Port> for PortRef<'a> {
    fn from(port: &'a Port) -> Self {
        Self {
            id: &port.id,
            network_id: &port.network_id,
            mac_address: &port.mac_address,
            fixed_ips: &port.fixed_ips,
        }
    }
}

/// Plugs ports into namespaces and configures their addresses.
pub trait InterfaceDriver: Send + Sync {
    /// Device name for a port.
    fn get_device_name(&self, port: &PortRef<'_>) -> String;

    /// Create the device for a port and move it into `namespace`.
    fn plug(
        &self,
        network_id: &str,
        port_id: &str,
        device_name: &str,
        mac_address: &str,
        namespace: &str,
    ) -> Result<(), ExecError>;

    /// Remove the device from `namespace`.
    fn unplug(&self, device_name: &str, namespace: &str) -> Result<(), ExecError>;

    /// Make `cidrs` the global addresses of the device.
    fn init_l3(&self, device_name: &str, cidrs: &[String], namespace: &str) -> Result<(), ExecError>;
}

/// Device name prefix for plugged ports.
pub const DEV_NAME_PREFIX: &str = "tap";

/// Linux interface names are limited to 15 characters.
pub const DEV_NAME_LEN: usize = 14;

/// Interface driver attaching internal ports on an Open vSwitch bridge.
pub struct OvsInterfaceDriver {
    executor: Arc<dyn CommandExecutor>,
    ip: IpNetns,
    bridge: String,
}

impl OvsInterfaceDriver {
    pub fn new(executor: Arc<dyn CommandExecutor>, bridge: impl Into<String>) -> Self {
        Self {
            ip: IpNetns::new(Arc::clone(&executor)),
            executor,
            bridge: bridge.into(),
        }
    }

    fn global_addresses(&self, device_name: &str, namespace: &str) -> Result<Vec<String>, ExecError> {
        let out = self.ip.execute_in(
            namespace,
            &command(&["ip", "-o", "addr", "show", "dev", device_name, "scope", "global"]),
            true,
        )?;
        Ok(parse_addresses(&out))
    }
}

impl InterfaceDriver for OvsInterfaceDriver {
    fn get_device_name(&self, port: &PortRef<'_>) -> String {
        let max_id = DEV_NAME_LEN - DEV_NAME_PREFIX.len();
        let id: String = port.id().chars().take(max_id).collect();
        format!("{}{}", DEV_NAME_PREFIX, id)
    }

    fn plug(
        &self,
        _network_id: &str,
        port_id: &str,
        device_name: &str,
        mac_address: &str,
        namespace: &str,
    ) -> Result<(), ExecError> {
        info!(device = device_name, bridge = %self.bridge, namespace, "plugging port");

        let iface_id = format!("external-ids:iface-id={}", port_id);
        let attached_mac = format!("external-ids:attached-mac={}", mac_address);
        self.executor.execute(
            &command(&[
                "ovs-vsctl", "--", "--if-exists", "del-port", device_name,
                "--", "add-port", self.bridge.as_str(), device_name,
                "--", "set", "Interface", device_name, "type=internal",
                iface_id.as_str(), "external-ids:iface-status=active", attached_mac.as_str(),
            ]),
            true,
        )?;

        if !mac_address.is_empty() {
            self.executor.execute(
                &command(&["ip", "link", "set", device_name, "address", mac_address]),
                true,
            )?;
        }

        self.ip.ensure_namespace(namespace)?;
        self.executor.execute(
            &command(&["ip", "link", "set", device_name, "netns", namespace]),
            true,
        )?;
        self.ip
            .execute_in(namespace, &command(&["ip", "link", "set", device_name, "up"]), true)?;
        Ok(())
    }

    fn unplug(&self, device_name: &str, namespace: &str) -> Result<(), ExecError> {
        info!(device = device_name, bridge = %self.bridge, namespace, "unplugging port");
        self.executor.execute(
            &command(&["ovs-vsctl", "--if-exists", "del-port", self.bridge.as_str(), device_name]),
            true,
        )?;
        Ok(())
    }

    fn init_l3(&self, device_name: &str, cidrs: &[String], namespace: &str) -> Result<(), ExecError> {
        let current = self.global_addresses(device_name, namespace)?;

        for cidr in cidrs.iter().filter(|c| !current.contains(c)) {
            debug!(device = device_name, cidr = %cidr, "adding address");
            let mut cmd = command(&["ip", "addr", "add", cidr.as_str(), "dev", device_name]);
            if !cidr.contains(':') {
                cmd.extend(command(&["brd", "+"]));
            }
            self.ip.execute_in(namespace, &cmd, true)?;
        }

        for stale in current.iter().filter(|c| !cidrs.contains(c)) {
            debug!(device = device_name, cidr = %stale, "removing stale address");
            self.ip.execute_in(
                namespace,
                &command(&["ip", "addr", "del", stale.as_str(), "dev", device_name]),
                true,
            )?;
        }

        Ok(())
    }
}

/// Parse `ip -o addr show` output into `address/prefix` entries.
fn parse_addresses(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            fields.find(|f| *f == "inet" || *f == "inet6")?;
            fields.next().map(str::to_string)
        })
        .collect()
}
