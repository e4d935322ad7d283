//! Device-driver host: reconciles deployed instances with a device source.

mod cache;
mod manager;
mod source;
mod watcher;

pub use cache::{CachedDevice, LogicalDeviceCache};
pub use manager::{AgentError, AgentManager};
pub use source::{
    is_device_file, parse_device, DeviceSource, DirectorySource, SourceError, SourcePlugCallback,
    DEVICE_EXTENSIONS,
};
pub use watcher::{is_device_event, DeviceWatcher};
