//! nslb - namespace-scoped load balancer driver
//!
//! This crate turns a logical load balancer description into a running
//! SEnginx instance:
//! - `render` compiles the description into proxy configuration text
//! - `namespace` plugs the VIP port into a per-instance network namespace
//! - `supervisor` writes the configuration and manages the proxy process
//! - `agent` keeps deployed instances in line with a directory of devices

pub mod agent;
pub mod config;
pub mod model;
pub mod namespace;
pub mod render;
pub mod supervisor;
pub mod util;

pub use config::Config;
pub use model::LogicalConfig;
