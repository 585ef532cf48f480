//! gpushare-health: Device health for gpushare
//!
//! This crate owns the health field of every device:
//! - The device registry, the single writer of device health
//! - The watch loop turning device error events into unhealthy markings
//! - The outward stream of device list snapshots

pub mod registry;
pub mod watch;

pub use registry::DeviceRegistry;
pub use watch::{HealthTasks, HealthWatcher};
