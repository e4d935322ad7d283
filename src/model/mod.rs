//! Logical load balancer model.

mod device;

pub use device::*;
