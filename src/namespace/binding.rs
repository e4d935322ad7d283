//! Binding of VIP ports into instance namespaces.

use crate::model::Port;
use crate::namespace::exec::{command, ExecError};
use crate::namespace::ip::IpNetns;
use crate::namespace::vif::{InterfaceDriver, PortRef};
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Errors from plugging or unplugging a port.
#[derive(Debug, Error)]
pub enum BindingError {
    #[error("device '{device}' already exists in namespace '{namespace}'")]
    PreexistingDevice { device: String, namespace: String },

    #[error("invalid subnet CIDR '{0}'")]
    InvalidCidr(String),

    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Direction of a plug notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlugAction {
    Plug,
    Unplug,
}

/// Hook told about VIP ports before they are plugged or unplugged.
pub trait PlugCallback: Send + Sync {
    fn notify(&self, action: PlugAction, port_id: &str);
}

impl<F> PlugCallback for F
where
    F: Fn(PlugAction, &str) + Send + Sync,
{
    fn notify(&self, action: PlugAction, port_id: &str) {
        self(action, port_id)
    }
}

/// Callback that only records plug activity in the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingPlugCallback;

impl PlugCallback for LoggingPlugCallback {
    fn notify(&self, action: PlugAction, port_id: &str) {
        info!(port_id, action = ?action, "VIP port binding changed");
    }
}

/// Plugs VIP ports into namespaces through an interface driver.
pub struct NamespaceBinding {
    ip: IpNetns,
    driver: Arc<dyn InterfaceDriver>,
    callback: Arc<dyn PlugCallback>,
}

impl NamespaceBinding {
    pub fn new(ip: IpNetns, driver: Arc<dyn InterfaceDriver>, callback: Arc<dyn PlugCallback>) -> Self {
        Self {
            ip,
            driver,
            callback,
        }
    }

    /// Plug `port` into `namespace` and configure its addresses.
    ///
    /// An existing device is reused unless `reuse_existing` is false, in
    /// which case it is an error. Returns the device name.
    pub fn plug(&self, namespace: &str, port: &Port, reuse_existing: bool) -> Result<String, BindingError> {
        self.callback.notify(PlugAction::Plug, &port.id);
        self.ip.ensure_namespace(namespace)?;

        let port_ref = PortRef::from(port);
        let device = self.driver.get_device_name(&port_ref);

        if self.ip.device_exists(&device, namespace)? {
            if !reuse_existing {
                return Err(BindingError::PreexistingDevice {
                    device,
                    namespace: namespace.to_string(),
                });
            }
            info!(device = %device, namespace, "reusing existing device");
        } else {
            self.driver.plug(
                port_ref.network_id(),
                port_ref.id(),
                &device,
                port_ref.mac_address(),
                namespace,
            )?;
        }

        let cidrs = port
            .fixed_ips
            .iter()
            .map(|ip| host_cidr(&ip.ip_address, &ip.subnet.cidr))
            .collect::<Result<Vec<_>, _>>()?;
        self.driver.init_l3(&device, &cidrs, namespace)?;

        let gateway = port
            .fixed_ips
            .first()
            .and_then(|ip| ip.subnet.gateway_ip.as_deref())
            .filter(|gw| !gw.is_empty());
        if let Some(gateway) = gateway {
            // An existing default route makes this fail; that is fine
            self.ip.execute_in(
                namespace,
                &command(&["route", "add", "default", "gw", gateway]),
                false,
            )?;
        }

        Ok(device)
    }

    /// Unplug the port with `port_id` from `namespace`.
    pub fn unplug(&self, namespace: &str, port_id: &str) -> Result<(), BindingError> {
        self.callback.notify(PlugAction::Unplug, port_id);
        let device = self.driver.get_device_name(&PortRef::stub(port_id));
        self.driver.unplug(&device, namespace)?;
        Ok(())
    }
}

/// `address/prefixlen` for an address inside `subnet_cidr`.
fn host_cidr(address: &str, subnet_cidr: &str) -> Result<String, BindingError> {
    let invalid = || BindingError::InvalidCidr(subnet_cidr.to_string());

    let (network, prefix) = subnet_cidr.split_once('/').ok_or_else(invalid)?;
    let network: IpAddr = network.parse().map_err(|_| invalid())?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid())?;

    let max = if network.is_ipv4() { 32 } else { 128 };
    if prefix > max {
        return Err(invalid());
    }

    Ok(format!("{}/{}", address, prefix))
}
