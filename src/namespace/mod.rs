//! Network namespace plumbing: command execution, `ip netns` wrappers,
//! interface drivers and port binding.

mod binding;
mod exec;
mod ip;
#[cfg(test)]
pub(crate) mod testing;
mod vif;

pub use binding::{BindingError, LoggingPlugCallback, NamespaceBinding, PlugAction, PlugCallback};
pub use exec::{command, replace_file, CommandExecutor, ExecError, RootHelperExecutor};
pub use ip::IpNetns;
pub use vif::{InterfaceDriver, OvsInterfaceDriver, PortRef, DEV_NAME_LEN, DEV_NAME_PREFIX};
